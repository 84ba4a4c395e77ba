//! Plugin catalog and per-agent installation.
//!
//! A read-only catalog directory holds agents and commands (single Markdown
//! files) and skills (folders containing `SKILL.md`). [`PluginManager`]
//! lists the catalog, installs entries into an agent's working directory
//! under `.claude/`, records them in the agent's configuration through an
//! [`AgentDirectory`], and keeps a `.claude/plugins.json` snapshot of what
//! is installed. Install and uninstall are two-phase: the artifact is
//! staged next to its destination, the store is updated, and only then is
//! the artifact renamed into place.

pub mod agents;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod fs_ops;
pub mod lock;
pub mod manager;
pub mod parse;
pub mod path_guard;
pub mod reconcile;
pub mod sanitize;
pub mod transaction;
pub mod types;

pub use {
    agents::{AgentDirectory, FileAgentDirectory, InMemoryAgentDirectory},
    error::{Error, ErrorKind, Result},
    manager::PluginManager,
    pluginhub_config::PluginsConfig,
    types::{
        Agent, AgentConfiguration, AgentUpdate, AvailablePlugins, CachedPluginsData,
        InstallOptions, InstalledPlugin, PluginChange, PluginMetadata, PluginType,
        UninstallOptions,
    },
};
