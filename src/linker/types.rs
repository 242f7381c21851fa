//! Link queue entry types and states

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::LinkOptions;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkState {
    #[serde(rename = "unlinked")]
    Unlinked,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "linked")]
    Linked,
    #[serde(rename = "error")]
    Error,
}

impl LinkState {
    /// Pending or processing
    pub fn is_active(self) -> bool {
        matches!(self, LinkState::Pending | LinkState::Processing)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Unlinked => write!(f, "unlinked"),
            LinkState::Pending => write!(f, "pending"),
            LinkState::Processing => write!(f, "processing"),
            LinkState::Linked => write!(f, "linked"),
            LinkState::Error => write!(f, "error"),
        }
    }
}

impl From<String> for LinkState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => LinkState::Pending,
            "processing" => LinkState::Processing,
            "linked" => LinkState::Linked,
            "error" => LinkState::Error,
            _ => LinkState::Unlinked,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LinkAction {
    #[serde(rename = "link")]
    Link,
    #[serde(rename = "unlink")]
    Unlink,
}

impl LinkAction {
    /// State reached when the action succeeds
    pub fn settled_state(self) -> LinkState {
        match self {
            LinkAction::Link => LinkState::Linked,
            LinkAction::Unlink => LinkState::Unlinked,
        }
    }

    pub(crate) fn verb(self) -> &'static str {
        match self {
            LinkAction::Link => "link",
            LinkAction::Unlink => "unlink",
        }
    }
}

impl fmt::Display for LinkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Lexically normalized absolute path of a linkable folder.
///
/// Symlinks are not resolved: the key names the link itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey(PathBuf);

impl ResourceKey {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut normalized = PathBuf::new();
        for component in path.as_ref().components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        Self(normalized)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn folder_name(&self) -> Option<&std::ffi::OsStr> {
        self.0.file_name()
    }

    /// True when `self` is `other` or lies inside it
    pub fn is_within(&self, other: &Path) -> bool {
        self.0.starts_with(other)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// One queued or running operation, as rendered by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEntry {
    pub id: u64,
    pub key: ResourceKey,
    pub action: LinkAction,
    pub state: LinkState,
    pub options: LinkOptions,
    /// Unix timestamp (ms) of the request
    pub requested_at: i64,
}

/// How a link/unlink request ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The filesystem operation ran; carries `Linked` or `Unlinked`
    Completed(LinkState),
    /// Removed from the queue before it started, or declined by the user
    Cancelled,
}
