//! Read-only plugin catalog enumeration with a TTL-bounded scan cache.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    parse::{self, find_all_skill_directories},
    path_guard::relative_to,
    sanitize::has_markdown_extension,
    types::{AvailablePlugins, PluginMetadata, PluginType},
};

/// Category assigned to catalog entries that sit directly under their
/// type directory.
pub const DEFAULT_CATEGORY: &str = "general";

/// A single memoized value with a lifetime.
///
/// Concurrent misses are not coalesced: every caller that finds the slot
/// empty or stale recomputes, and the last store wins.
pub struct ScanCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> ScanCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value, if one exists and is younger than the TTL.
    pub fn get(&self) -> Option<T> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn store(&self, value: T) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((Instant::now(), value));
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// Scans `<base>/agents`, `<base>/commands` and `<base>/skills`.
pub struct CatalogScanner {
    base: PathBuf,
    cache: ScanCache<Arc<AvailablePlugins>>,
}

impl CatalogScanner {
    pub fn new(base: PathBuf, ttl: Duration) -> Self {
        Self {
            base,
            cache: ScanCache::new(ttl),
        }
    }

    /// Every parseable plugin in the catalog, served from cache while fresh.
    pub async fn list_available(&self) -> Arc<AvailablePlugins> {
        if let Some(cached) = self.cache.get() {
            debug!("catalog scan served from cache");
            return cached;
        }

        let scanned = Arc::new(self.scan().await);
        self.cache.store(Arc::clone(&scanned));
        scanned
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    async fn scan(&self) -> AvailablePlugins {
        let agents = scan_markdown_tree(&self.base, PluginType::Agent).await;
        let commands = scan_markdown_tree(&self.base, PluginType::Command).await;
        let skills = scan_skills(&self.base).await;
        let total = agents.len() + commands.len() + skills.len();
        info!(
            agents = agents.len(),
            commands = commands.len(),
            skills = skills.len(),
            base = %self.base.display(),
            "scanned plugin catalog"
        );
        AvailablePlugins {
            agents,
            commands,
            skills,
            total,
        }
    }
}

/// Category of a catalog entry: the directory right below the type root,
/// or [`DEFAULT_CATEGORY`] for entries placed directly in it.
pub(crate) fn category_for(source_path: &str) -> String {
    let parts: Vec<&str> = source_path.split('/').collect();
    if parts.len() > 2 {
        parts[1].to_string()
    } else {
        DEFAULT_CATEGORY.to_string()
    }
}

/// `<base>/<agents|commands>/[<category>/]*.md`
async fn scan_markdown_tree(base: &Path, plugin_type: PluginType) -> Vec<PluginMetadata> {
    let root = base.join(plugin_type.dir_name());
    let mut files = Vec::new();
    collect_markdown_files(&root, &mut files).await;
    for dir in list_dirs(&root).await {
        collect_markdown_files(&dir, &mut files).await;
    }

    let mut entries = Vec::new();
    for file in files {
        let source_path = relative_to(base, &file);
        let category = category_for(&source_path);
        match parse::parse_metadata(&file, &source_path, &category, plugin_type).await {
            Ok(meta) => entries.push(meta),
            Err(e) => warn!(
                path = %file.display(),
                error = %e,
                "skipping unparseable catalog entry"
            ),
        }
    }

    sort_entries(&mut entries);
    entries
}

async fn scan_skills(base: &Path) -> Vec<PluginMetadata> {
    let root = base.join(PluginType::Skill.dir_name());
    let mut entries = Vec::new();
    for skill in find_all_skill_directories(&root, base).await {
        let category = category_for(&skill.source_path);
        match parse::parse_skill_metadata(&skill.folder_path, &skill.source_path, &category).await {
            Ok(meta) => entries.push(meta),
            Err(e) => warn!(
                path = %skill.folder_path.display(),
                error = %e,
                "skipping unparseable skill"
            ),
        }
    }
    sort_entries(&mut entries);
    entries
}

fn sort_entries(entries: &mut [PluginMetadata]) {
    entries.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.source_path.cmp(&b.source_path))
    });
}

async fn list_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return dirs;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs
}

async fn collect_markdown_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        let name = entry.file_name();
        if is_file && has_markdown_extension(&name.to_string_lossy()) {
            out.push(entry.path());
        }
    }
}
