//! Configuration for the plugin manager.
//!
//! Config files: `pluginhub.toml`, `pluginhub.yaml`, or `pluginhub.json`,
//! searched in `./` then `~/.config/pluginhub/`. `PLUGINHUB_*` environment
//! variables override file values.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::PluginsConfig,
};
