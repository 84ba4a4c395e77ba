//! Cross-check stored plugin records against the working directory.

use std::path::Path;

use {
    tokio::fs,
    tracing::{debug, warn},
};

use crate::{fs_ops, parse, types::InstalledPlugin};

/// Outcome of checking an agent's stored plugins against disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Records whose artifact exists, in store order.
    pub present: Vec<InstalledPlugin>,
    /// Records whose artifact is gone. Not returned to callers as installed.
    pub missing: Vec<InstalledPlugin>,
    /// Filenames of present file plugins whose bytes no longer match the
    /// stored hash.
    pub drifted: Vec<String>,
}

pub async fn reconcile(workdir: &Path, plugins: &[InstalledPlugin]) -> Reconciled {
    let mut out = Reconciled::default();
    for plugin in plugins {
        let path = plugin.artifact_path(workdir);
        if !fs_ops::exists(&path).await {
            debug!(
                filename = %plugin.filename,
                plugin_type = %plugin.plugin_type,
                path = %path.display(),
                "installed plugin missing on disk, skipping"
            );
            out.missing.push(plugin.clone());
            continue;
        }

        if plugin.plugin_type.is_file_based()
            && let Some(expected) = &plugin.metadata.content_hash
        {
            match fs::read(&path).await {
                Ok(bytes) if &parse::content_hash(&bytes) != expected => {
                    warn!(
                        filename = %plugin.filename,
                        plugin_type = %plugin.plugin_type,
                        "installed plugin content differs from recorded hash"
                    );
                    out.drifted.push(plugin.filename.clone());
                },
                Ok(_) => {},
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "could not read installed plugin for hash check"
                    );
                },
            }
        }
        out.present.push(plugin.clone());
    }
    out
}
