//! Error type shared by the linking, metadata and orchestration layers

use std::path::PathBuf;

use stream_dl::TransferError;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("failed to {action} {}: {message}", path.display())]
    Link {
        action: &'static str,
        path: PathBuf,
        message: String,
    },
    #[error("{}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("state store error: {0}")]
    State(String),
    #[error("maps API error: {0}")]
    Api(String),
    #[error("installer error: {0}")]
    Installer(String),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("folder \"{folder}\" cannot be shared: {reason}")]
    InvalidFolder { folder: String, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn state(err: impl std::fmt::Display) -> Self {
        SyncError::State(err.to_string())
    }

    /// Deliberate cancellations are not failures and should not be surfaced as errors
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Cancelled | SyncError::Transfer(TransferError::Cancelled)
        )
    }
}

impl From<zip::result::ZipError> for SyncError {
    fn from(err: zip::result::ZipError) -> Self {
        SyncError::Archive(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::State(format!("invalid JSON value: {}", err))
    }
}
