//! Streaming HTTP download engine
//!
//! - Streams response bodies to a file or into memory
//! - Multicast progress: every observer of a transfer shares one request and
//!   a late observer immediately gets the latest snapshot
//! - Cooperative cancellation, with partial output deleted before the
//!   cancellation is published
//! - A plain JSON helper for non-streamed calls

mod client;
mod error;
mod progress;
mod transfer;

pub use client::{default_user_agent, ClientOptions, HttpClient, JsonResponse};
pub use error::TransferError;
pub use progress::{Progress, SharedBuffer, TransferState};
pub use transfer::{
    Downloader, TransferHandle, TransferOptions, WeakTransferHandle, DEFAULT_WRITE_BUFFER_SIZE,
};
