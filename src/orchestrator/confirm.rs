//! User confirmations awaited before destructive operations

use async_trait::async_trait;

/// What the user is asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmRequest {
    LinkMaps,
    UnlinkMaps,
    DeleteMaps { count: usize, linked: bool },
    /// A folder that is usually not worth sharing
    ShareFolder { folder: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfirmAnswer {
    pub accepted: bool,
    /// Link: merge existing files into the shared folder. Unlink: copy them back.
    pub keep_contents: bool,
    /// Skip this confirmation next time
    pub remember: bool,
}

impl ConfirmAnswer {
    pub fn declined() -> Self {
        Self::default()
    }

    pub fn accepted(keep_contents: bool) -> Self {
        Self {
            accepted: true,
            keep_contents,
            remember: false,
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmAnswer;
}

/// Approves every request with a fixed answer, for headless use
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm(pub ConfirmAnswer);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _request: ConfirmRequest) -> ConfirmAnswer {
        self.0
    }
}
