use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::PluginType;

/// Discriminant of [`Error`], for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PathTraversal,
    InvalidWorkdir,
    WorkdirNotFound,
    FileNotFound,
    FileTooLarge,
    InvalidFileType,
    InvalidMetadata,
    PermissionDenied,
    PluginNotInstalled,
    ReadFailed,
    WriteFailed,
    TransactionFailed,
    Cancelled,
    AgentStore,
    Json,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("path escapes the allowed directory: {path}")]
    PathTraversal { path: String },

    #[error("agent '{agent_id}' has no usable working directory: {reason}")]
    InvalidWorkdir { agent_id: String, reason: String },

    #[error("working directory does not exist: {path}")]
    WorkdirNotFound { path: PathBuf },

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("file too large: {path} is {size} bytes (max {max})")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("invalid plugin file type: {path}")]
    InvalidFileType { path: PathBuf },

    #[error("invalid plugin metadata in {path}: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("{plugin_type} '{filename}' is not installed for agent '{agent_id}'")]
    PluginNotInstalled {
        agent_id: String,
        filename: String,
        plugin_type: PluginType,
    },

    #[error("failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed: {reason}")]
    TransactionFailed {
        operation: &'static str,
        reason: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("agent store: {context}: {source}")]
    AgentStore {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::InvalidWorkdir { .. } => ErrorKind::InvalidWorkdir,
            Self::WorkdirNotFound { .. } => ErrorKind::WorkdirNotFound,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Self::InvalidFileType { .. } => ErrorKind::InvalidFileType,
            Self::InvalidMetadata { .. } => ErrorKind::InvalidMetadata,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::PluginNotInstalled { .. } => ErrorKind::PluginNotInstalled,
            Self::ReadFailed { .. } => ErrorKind::ReadFailed,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::AgentStore { .. } => ErrorKind::AgentStore,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    #[must_use]
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    #[must_use]
    pub fn invalid_workdir(agent_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkdir {
            agent_id: agent_id.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn file_not_found(path: &Path) -> Self {
        Self::FileNotFound {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn invalid_file_type(path: &Path) -> Self {
        Self::InvalidFileType {
            path: path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn invalid_metadata(path: &Path, reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn plugin_not_installed(
        agent_id: impl Into<String>,
        filename: impl Into<String>,
        plugin_type: PluginType,
    ) -> Self {
        Self::PluginNotInstalled {
            agent_id: agent_id.into(),
            filename: filename.into(),
            plugin_type,
        }
    }

    /// Map an I/O error from reading `path` into the taxonomy.
    #[must_use]
    pub fn read(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::ReadFailed {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Map an I/O error from writing `path` into the taxonomy.
    #[must_use]
    pub fn write(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Self::WriteFailed {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    /// Wrap a failure raised after side effects started.
    #[must_use]
    pub fn transaction(operation: &'static str, cause: Error) -> Self {
        Self::TransactionFailed {
            operation,
            reason: cause.to_string(),
            source: Some(Box::new(cause)),
        }
    }

    #[must_use]
    pub fn agent_store(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AgentStore {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
