//! Validation of untrusted relative paths and entry names.

use std::path::{Component, Path, PathBuf};

use crate::{Error, Result};

/// Resolve `relative` under `base`, refusing anything that could escape it.
///
/// Rejects empty and absolute paths and any `..` segment. `.` segments and
/// backslash separators are normalized away. When the resolved path exists
/// it is canonicalized and must still sit under the canonical base, so a
/// symlink inside the catalog cannot point outside of it.
pub fn validate_source_path(base: &Path, relative: &str) -> Result<PathBuf> {
    if relative.contains('\0') {
        return Err(Error::path_traversal(relative));
    }
    let normalized = relative.replace('\\', "/");
    let candidate = Path::new(&normalized);
    if normalized.trim().is_empty() || candidate.has_root() {
        return Err(Error::path_traversal(relative));
    }

    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::path_traversal(relative));
            },
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(Error::path_traversal(relative));
    }

    let resolved = base.join(&clean);
    if !resolved.starts_with(base) {
        return Err(Error::path_traversal(relative));
    }

    if let (Ok(canonical_base), Ok(canonical)) =
        (std::fs::canonicalize(base), std::fs::canonicalize(&resolved))
        && !canonical.starts_with(&canonical_base)
    {
        return Err(Error::path_traversal(relative));
    }

    Ok(resolved)
}

/// Check that a caller-supplied installed name is one plain path component.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !name.contains(['/', '\\', '\0']) && name != "." && name != ".." =>
        {
            Ok(())
        },
        _ => Err(Error::path_traversal(name)),
    }
}

/// Catalog-relative form of a path that is known to live under `base`.
pub(crate) fn relative_to(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
