//! Transfer error type

use std::path::PathBuf;

/// Errors produced by the download engine.
///
/// Foreign errors are captured as messages so the same terminal error can be
/// replayed to every observer of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
    #[error("{url} responded with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to write {}: {message}", path.display())]
    Io { path: PathBuf, message: String },
    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub(crate) fn request(url: &str, err: reqwest::Error) -> Self {
        TransferError::Request {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
