//! Per-working-directory snapshot of installed plugins (`.claude/plugins.json`).
//!
//! The snapshot is a derived view: it is rebuilt from the filesystem whenever
//! it is missing, malformed, or references artifacts that no longer exist.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use {
    tokio::fs,
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    catalog::DEFAULT_CATEGORY,
    fs_ops,
    parse,
    sanitize::has_markdown_extension,
    types::{
        CACHE_FILE, CACHE_VERSION, CachedPluginsData, INSTALL_ROOT, InstalledPlugin,
        PluginMetadata, PluginType, SKILL_MANIFEST, now_ms,
    },
};

pub struct PluginCacheStore {
    workdir: PathBuf,
    path: PathBuf,
}

impl PluginCacheStore {
    pub fn for_workdir(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            path: workdir.join(INSTALL_ROOT).join(CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate the snapshot. Any problem reads as "no snapshot".
    pub async fn read(&self) -> Option<CachedPluginsData> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "plugin cache unavailable");
                return None;
            },
        };
        let data: CachedPluginsData = match serde_json::from_str(&raw) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "plugin cache is malformed");
                return None;
            },
        };
        if let Err(reason) = validate_snapshot(&data) {
            warn!(path = %self.path.display(), %reason, "plugin cache failed validation");
            return None;
        }
        Some(data)
    }

    /// Replace the snapshot atomically.
    pub async fn write(&self, plugins: &[InstalledPlugin]) -> Result<()> {
        let data = CachedPluginsData {
            version: CACHE_VERSION,
            last_updated: now_ms(),
            plugins: plugins.to_vec(),
        };
        let json = serde_json::to_vec_pretty(&data)?;
        fs_ops::write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), count = plugins.len(), "wrote plugin cache");
        Ok(())
    }

    /// Re-derive the installed set from disk and write it back.
    ///
    /// A failed write-back is logged; the freshly scanned list is returned
    /// either way.
    pub async fn rebuild(&self) -> Vec<InstalledPlugin> {
        let mut plugins = Vec::new();
        for plugin_type in PluginType::ALL {
            scan_installed(&self.workdir, plugin_type, &mut plugins).await;
        }
        if let Err(e) = self.write(&plugins).await {
            warn!(path = %self.path.display(), error = %e, "failed to write rebuilt plugin cache");
        }
        info!(workdir = %self.workdir.display(), count = plugins.len(), "rebuilt plugin cache");
        plugins
    }

    /// Installed plugins from the snapshot, rebuilding when it cannot be
    /// trusted.
    pub async fn list(&self) -> Vec<InstalledPlugin> {
        if let Some(data) = self.read().await {
            let mut stale = false;
            for plugin in &data.plugins {
                if !fs_ops::exists(&plugin.artifact_path(&self.workdir)).await {
                    debug!(filename = %plugin.filename, "cached plugin missing on disk");
                    stale = true;
                    break;
                }
            }
            if !stale {
                return data.plugins;
            }
        }
        self.rebuild().await
    }
}

fn validate_snapshot(data: &CachedPluginsData) -> std::result::Result<(), String> {
    if data.version != CACHE_VERSION {
        return Err(format!("unsupported version {}", data.version));
    }
    let mut seen = HashSet::new();
    for plugin in &data.plugins {
        if plugin.filename.is_empty() {
            return Err("entry with empty filename".into());
        }
        if plugin.plugin_type != plugin.metadata.plugin_type
            || plugin.filename != plugin.metadata.filename
        {
            return Err(format!("entry '{}' disagrees with its metadata", plugin.filename));
        }
        if !seen.insert((plugin.filename.as_str(), plugin.plugin_type)) {
            return Err(format!("duplicate entry '{}'", plugin.filename));
        }
    }
    Ok(())
}

async fn scan_installed(workdir: &Path, plugin_type: PluginType, out: &mut Vec<InstalledPlugin>) {
    let dir = plugin_type.install_dir(workdir);
    let Ok(mut entries) = fs::read_dir(&dir).await else {
        return;
    };

    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        let source_path = format!("{}/{name}", plugin_type.dir_name());

        let parsed = if plugin_type.is_file_based() {
            if !file_type.is_file() || !has_markdown_extension(&name) {
                continue;
            }
            parse::parse_metadata(&path, &source_path, DEFAULT_CATEGORY, plugin_type).await
        } else {
            if !file_type.is_dir()
                || name.ends_with(".tmp")
                || !fs_ops::exists(&path.join(SKILL_MANIFEST)).await
            {
                continue;
            }
            parse::parse_skill_metadata(&path, &source_path, DEFAULT_CATEGORY).await
        };

        match parsed {
            Ok(mut meta) => {
                // The on-disk name is authoritative for an existing artifact.
                meta.filename = name;
                stamp_times(&mut meta, &path).await;
                found.push(InstalledPlugin::new(meta));
            },
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "skipping unparseable installed plugin"
            ),
        }
    }

    found.sort_by(|a, b| a.filename.cmp(&b.filename));
    out.extend(found);
}

async fn stamp_times(meta: &mut PluginMetadata, path: &Path) {
    let modified = fs::metadata(path)
        .await
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64);
    meta.installed_at = modified;
    meta.updated_at = modified;
}
