//! Filesystem primitives used by the transaction engine.
//!
//! Recursive copy and delete run on the blocking pool over a [`WalkDir`]
//! and check a [`CancellationToken`] between entries, so a long skill copy
//! can be interrupted without leaving the caller blocked until it finishes.

use std::{
    ffi::OsString,
    io::{self, ErrorKind as IoErrorKind, Write},
    path::{Path, PathBuf},
};

use {
    tokio::fs,
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    walkdir::WalkDir,
};

use crate::{Error, Result};

/// `<dest>.tmp` next to `dest`, so the final rename stays on one filesystem.
pub fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Copy one file. A missing source reports [`Error::FileNotFound`].
pub async fn copy_file(src: &Path, dest: &Path) -> Result<u64> {
    fs::copy(src, dest)
        .await
        .map_err(|e| copy_error(src, dest, e))
}

fn copy_error(src: &Path, dest: &Path, e: io::Error) -> Error {
    if e.kind() == IoErrorKind::NotFound {
        Error::file_not_found(src)
    } else {
        Error::write(dest, e)
    }
}

fn walk_error(root: &Path, e: walkdir::Error) -> Error {
    let path = e.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    Error::read(&path, io::Error::from(e))
}

fn join_error(path: &Path, e: tokio::task::JoinError) -> Error {
    Error::write(path, io::Error::other(e))
}

/// Recursively copy `src` into a new directory `dest`.
///
/// Symlinks are skipped. Returns the number of files copied.
pub async fn copy_dir_recursive(
    src: &Path,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<usize> {
    let (from, to, token) = (src.to_path_buf(), dest.to_path_buf(), cancel.clone());
    let copied = tokio::task::spawn_blocking(move || copy_tree(&from, &to, &token))
        .await
        .map_err(|e| join_error(dest, e))??;
    debug!(src = %src.display(), dest = %dest.display(), files = copied, "copied directory");
    Ok(copied)
}

fn copy_tree(src: &Path, dest: &Path, cancel: &CancellationToken) -> Result<usize> {
    ensure_not_cancelled(cancel, "copy")?;
    std::fs::create_dir_all(dest).map_err(|e| Error::write(dest, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        ensure_not_cancelled(cancel, "copy")?;
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let from = entry.path();
        let relative = from
            .strip_prefix(src)
            .map_err(|e| Error::read(from, io::Error::other(e)))?;
        let to = dest.join(relative);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            warn!(path = %from.display(), "skipping symlink in skill directory");
        } else if file_type.is_dir() {
            std::fs::create_dir_all(&to).map_err(|e| Error::write(&to, e))?;
        } else {
            std::fs::copy(from, &to).map_err(|e| copy_error(from, &to, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Recursively delete `dir`. A missing directory is not an error.
///
/// Symlinks are unlinked, never followed.
pub async fn remove_dir_recursive(dir: &Path, cancel: &CancellationToken) -> Result<()> {
    match fs::symlink_metadata(dir).await {
        Ok(meta) if !meta.is_dir() => return remove_file_if_exists(dir).await,
        Ok(_) => {},
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::read(dir, e)),
    }

    let (root, token) = (dir.to_path_buf(), cancel.clone());
    tokio::task::spawn_blocking(move || remove_tree(&root, &token))
        .await
        .map_err(|e| join_error(dir, e))?
}

/// Post-order delete: children are yielded before their directory.
fn remove_tree(dir: &Path, cancel: &CancellationToken) -> Result<()> {
    for entry in WalkDir::new(dir).contents_first(true) {
        ensure_not_cancelled(cancel, "delete")?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.io_error().is_some_and(|io| io.kind() == IoErrorKind::NotFound) => {
                continue;
            },
            Err(e) => return Err(walk_error(dir, e)),
        };
        let path = entry.path();
        let removed = if entry.file_type().is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        match removed {
            Ok(()) => {},
            Err(e) if e.kind() == IoErrorKind::NotFound => {},
            Err(e) => return Err(Error::write(path, e)),
        }
    }
    Ok(())
}

/// Unlink `path`, treating "already absent" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::write(path, e)),
    }
}

/// Best-effort removal of a staging artifact. Failures are logged only.
pub async fn discard_staging(path: &Path, is_dir: bool) {
    let result = if is_dir {
        remove_dir_recursive(path, &CancellationToken::new()).await
    } else {
        remove_file_if_exists(path).await
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to clean up staging artifact");
    }
}

/// Write `bytes` to `path` through a uniquely named sibling temp file and a
/// rename. Concurrent writers to the same path never share a temp file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)
        .await
        .map_err(|e| Error::write(&dir, e))?;
    let (target, bytes) = (path.to_path_buf(), bytes.to_vec());
    tokio::task::spawn_blocking(move || persist_atomic(&dir, &target, &bytes))
        .await
        .map_err(|e| join_error(path, e))?
}

/// The temp file is removed on drop if anything before `persist` fails.
fn persist_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let prefix = path
        .file_name()
        .map_or_else(|| ".".to_string(), |n| format!(".{}.", n.to_string_lossy()));
    let mut tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::write(dir, e))?;
    tmp.write_all(bytes)
        .map_err(|e| Error::write(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| Error::write(path, e.error))?;
    Ok(())
}

pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

fn ensure_not_cancelled(cancel: &CancellationToken, operation: &'static str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled { operation });
    }
    Ok(())
}
