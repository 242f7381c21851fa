mod primitive;
mod queue;
mod types;

pub use primitive::{LinkPrimitive, LocalLinkPrimitive, LINKED_FOLDER_SCAN_DEPTH};
pub use queue::LinkQueue;
pub use types::{LinkAction, LinkEntry, LinkOutcome, LinkState, ResourceKey};
