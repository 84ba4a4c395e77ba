use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, schema::PluginsConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "pluginhub.toml",
    "pluginhub.yaml",
    "pluginhub.yml",
    "pluginhub.json",
];

/// Load config from the given path (any supported format), then apply
/// environment overrides.
pub fn load_config(path: &Path) -> Result<PluginsConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&raw, path)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./pluginhub.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/pluginhub/pluginhub.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to defaults (plus env overrides) if nothing loads.
pub fn discover_and_load() -> PluginsConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    let mut config = PluginsConfig::default();
    apply_env_overrides(&mut config);
    config
}

/// Returns the user-global config directory (`~/.config/pluginhub/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "pluginhub").map(|d| d.config_dir().to_path_buf())
}

/// Override config values from `PLUGINHUB_*` environment variables.
pub fn apply_env_overrides(config: &mut PluginsConfig) {
    apply_overrides_with(config, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with a custom lookup, so tests don't
/// have to mutate the process environment.
fn apply_overrides_with(config: &mut PluginsConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(dir) = lookup("PLUGINHUB_CATALOG_DIR").filter(|v| !v.is_empty()) {
        config.catalog_dir = PathBuf::from(dir);
    }
    if let Some(raw) = lookup("PLUGINHUB_SCAN_CACHE_TTL_SECS") {
        match raw.trim().parse() {
            Ok(secs) => config.scan_cache_ttl_secs = secs,
            Err(e) => warn!(
                value = %raw,
                error = %e,
                "ignoring invalid PLUGINHUB_SCAN_CACHE_TTL_SECS"
            ),
        }
    }
    if let Some(raw) = lookup("PLUGINHUB_MAX_FILE_SIZE") {
        match raw.trim().parse() {
            Ok(bytes) => config.max_file_size = bytes,
            Err(e) => warn!(value = %raw, error = %e, "ignoring invalid PLUGINHUB_MAX_FILE_SIZE"),
        }
    }
    if let Some(file) = lookup("PLUGINHUB_AGENTS_FILE").filter(|v| !v.is_empty()) {
        config.agents_file = Some(PathBuf::from(file));
    }
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn parse_config(raw: &str, path: &Path) -> Result<PluginsConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}
