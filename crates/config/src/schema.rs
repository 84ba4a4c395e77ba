use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default catalog scan cache lifetime: five minutes.
pub const DEFAULT_SCAN_CACHE_TTL_SECS: u64 = 300;

/// Default upper bound for a single plugin file: 1 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Plugin manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Root of the read-only plugin catalog (`agents/`, `commands/`, `skills/`).
    pub catalog_dir: PathBuf,
    /// How long a catalog scan stays valid, in seconds.
    pub scan_cache_ttl_secs: u64,
    /// Maximum accepted size of a plugin file, in bytes.
    pub max_file_size: u64,
    /// JSON file backing the file-based agent directory.
    pub agents_file: Option<PathBuf>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            catalog_dir: PathBuf::from("resources/plugins"),
            scan_cache_ttl_secs: DEFAULT_SCAN_CACHE_TTL_SECS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            agents_file: None,
        }
    }
}

impl PluginsConfig {
    pub fn with_catalog_dir(catalog_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_dir: catalog_dir.into(),
            ..Self::default()
        }
    }

    pub fn scan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_cache_ttl_secs)
    }

    /// Reject values the plugin manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.catalog_dir.as_os_str().is_empty() {
            return Err(Error::invalid("catalog_dir", "must not be empty"));
        }
        if self.max_file_size == 0 {
            return Err(Error::invalid("max_file_size", "must be greater than zero"));
        }
        Ok(())
    }
}
