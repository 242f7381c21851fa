//! Content sync engine of a game installation manager.
//!
//! Serializes link/unlink operations on shared folders, resolves map details
//! through a batch cache and drives downloads with multicast progress.

pub mod beatsaver;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod installer;
pub mod linker;
pub mod orchestrator;
pub mod version;

pub use config::{LinkOptions, LinkedFoldersOptions, SyncConfig};
pub use context::{ContextParts, SyncContext};
pub use db::StateStore;
pub use error::{SyncError, SyncResult};
pub use version::{BsVersion, InstallationLayout};

pub use stream_dl;
