//! Progress snapshots published by a transfer

use std::sync::Arc;

use serde::Serialize;

use crate::error::TransferError;

/// In-memory download result, shared between every observer
pub type SharedBuffer = Arc<Vec<u8>>;

/// Byte-level progress of one transfer.
///
/// `total` is 0 until the response headers announce a length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress<T> {
    pub current: u64,
    pub total: u64,
    pub data: T,
}

impl<T> Progress<T> {
    pub fn new(data: T) -> Self {
        Self {
            current: 0,
            total: 0,
            data,
        }
    }

    /// Completion percentage in `0..=100`; 0 while the total is unknown
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        ((self.current as f64 / self.total as f64) * 100.0).min(100.0)
    }
}

/// Latest known state of a transfer, as replayed to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum TransferState<T> {
    Running(Progress<T>),
    Completed(Progress<T>),
    Failed(TransferError),
    Cancelled,
}

impl<T> TransferState<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferState::Running(_))
    }

    pub fn progress(&self) -> Option<&Progress<T>> {
        match self {
            TransferState::Running(p) | TransferState::Completed(p) => Some(p),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            TransferState::Running(_) => "downloading",
            TransferState::Completed(_) => "completed",
            TransferState::Failed(_) => "failed",
            TransferState::Cancelled => "cancelled",
        }
    }
}

impl<T: Clone> TransferState<T> {
    /// Collapse a terminal state into the transfer's result
    pub fn into_result(self) -> Option<Result<Progress<T>, TransferError>> {
        match self {
            TransferState::Running(_) => None,
            TransferState::Completed(p) => Some(Ok(p)),
            TransferState::Failed(err) => Some(Err(err)),
            TransferState::Cancelled => Some(Err(TransferError::Cancelled)),
        }
    }
}
