use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stream_dl::{default_user_agent, ClientOptions};

use crate::error::{SyncError, SyncResult};

/// Remote map API batch-size ceiling
pub const DEFAULT_BATCH_SIZE: usize = 50;

pub const DEFAULT_BEATSAVER_API_URL: &str = "https://api.beatsaver.com";

/// Application-level settings for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory holding every installed version and the shared contents
    pub installation_dir: PathBuf,
    /// Version reported in the `User-Agent` header
    pub app_version: String,
    pub beatsaver_api_url: String,
    /// Identifiers per remote batch request
    pub batch_size: usize,
    /// Database file of the persisted key/value state
    pub state_db: PathBuf,
    /// Resolve every request over IPv4
    pub force_ipv4: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            installation_dir: PathBuf::from("BSManager"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            beatsaver_api_url: DEFAULT_BEATSAVER_API_URL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            state_db: PathBuf::from("bsm-state.db"),
            force_ipv4: true,
        }
    }
}

impl SyncConfig {
    /// Load settings from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let mut config: SyncConfig = serde_json::from_str(&raw)?;
        if config.batch_size == 0 {
            config.batch_size = DEFAULT_BATCH_SIZE;
        }
        Ok(config)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            user_agent: default_user_agent(&self.app_version),
            force_ipv4: self.force_ipv4,
            ..ClientOptions::default()
        }
    }
}

/// Options of a link or unlink request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOptions {
    /// Link: merge the folder's existing files into the shared target first.
    /// Unlink: copy the shared files back into the restored folder.
    pub keep_contents: bool,
    /// Sub-folder of the shared root the target lives in
    pub intermediate_folder: Option<String>,
}

/// Options of a linked-folder listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedFoldersOptions {
    /// Return paths relative to the version folder instead of absolute ones
    pub relative: bool,
}
