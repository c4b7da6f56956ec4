use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Cannot access {}: {reason}", path.display())]
    Access { path: PathBuf, reason: String },

    #[error("No usable capture date in metadata: {0}")]
    MetadataRead(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Replace failed: {0}")]
    Replace(String),

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Cancelled before processing started")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    pub fn access(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Access { path: path.into(), reason: reason.to_string() }
    }

    pub fn conversion(cause: impl fmt::Display) -> Self {
        Self::Conversion(cause.to_string())
    }

    pub fn backup(cause: impl fmt::Display) -> Self {
        Self::Backup(cause.to_string())
    }

    pub fn replace(cause: impl fmt::Display) -> Self {
        Self::Replace(cause.to_string())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    /// Report category for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Access { .. } => FailureKind::Access,
            Self::MetadataRead(_) => FailureKind::MetadataRead,
            Self::Conversion(_) => FailureKind::Conversion,
            Self::Backup(_) => FailureKind::Backup,
            Self::Replace(_) => FailureKind::Replace,
            Self::Tool { .. } => FailureKind::Tool,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Io(_) => FailureKind::Io,
        }
    }
}

/// Failure category recorded in an operation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Access,
    MetadataRead,
    Conversion,
    Backup,
    Replace,
    Tool,
    Cancelled,
    Io,
    Skipped,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Access => "access",
            FailureKind::MetadataRead => "metadata",
            FailureKind::Conversion => "conversion",
            FailureKind::Backup => "backup",
            FailureKind::Replace => "replace",
            FailureKind::Tool => "tool",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Io => "io",
            FailureKind::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
