//! Linking the folders of an installed version to the shared contents

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{info, warn};
use tokio::sync::watch;

use super::confirm::{ConfirmRequest, Confirmer};
use crate::config::{LinkOptions, LinkedFoldersOptions};
use crate::db::StateStore;
use crate::error::{SyncError, SyncResult};
use crate::linker::{LinkOutcome, LinkQueue, LinkState, ResourceKey};
use crate::version::{relative_parts, BsVersion, InstallationLayout};

/// Persisted list of version-relative folders the user shares
pub const SHARED_FOLDERS_KEY: &str = "default-shared-folders";

/// Folders that would break an installation once shared
pub const SHARED_FOLDER_BLACKLIST: &[&str] = &[
    ".DepotDownloader",
    "Beat Saber_Data",
    "IPA",
    "Libs",
    "Plugins",
    "MonoBleedingEdge",
];

/// Folders that can be shared but rarely should be
pub const SHARED_FOLDER_WARNLIST: &[&str] = &["DLC", "Logs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedFolderAdd {
    Added(String),
    AlreadyPresent(String),
    /// Warn-listed and the user said no
    Declined(String),
}

pub struct VersionFolderLinker {
    layout: InstallationLayout,
    queue: LinkQueue,
    store: Arc<StateStore>,
    confirmer: Arc<dyn Confirmer>,
}

impl VersionFolderLinker {
    pub fn new(
        layout: InstallationLayout,
        queue: LinkQueue,
        store: Arc<StateStore>,
        confirmer: Arc<dyn Confirmer>,
    ) -> Self {
        Self {
            layout,
            queue,
            store,
            confirmer,
        }
    }

    pub fn layout(&self) -> &InstallationLayout {
        &self.layout
    }

    pub fn queue(&self) -> &LinkQueue {
        &self.queue
    }

    /// Key of a folder inside `version`; folders escaping the version are refused
    pub fn folder_key(&self, version: &BsVersion, relative_folder: &str) -> SyncResult<ResourceKey> {
        Ok(ResourceKey::new(self.layout.version_folder(version, relative_folder)?))
    }

    /// The shared target mirrors the folder's place inside the version
    fn options_for(relative_folder: &str, mut options: LinkOptions) -> SyncResult<LinkOptions> {
        if options.intermediate_folder.is_none() {
            let parts = relative_parts(relative_folder)?;
            if parts.len() > 1 {
                options.intermediate_folder = Some(parts[..parts.len() - 1].join("/"));
            }
        }
        Ok(options)
    }

    pub async fn link_version_folder(
        &self,
        version: &BsVersion,
        relative_folder: &str,
        options: LinkOptions,
    ) -> SyncResult<LinkOutcome> {
        let key = self.folder_key(version, relative_folder)?;
        self.queue
            .link_folder(key, Self::options_for(relative_folder, options)?)
            .await
    }

    pub async fn unlink_version_folder(
        &self,
        version: &BsVersion,
        relative_folder: &str,
        options: LinkOptions,
    ) -> SyncResult<LinkOutcome> {
        let key = self.folder_key(version, relative_folder)?;
        self.queue
            .unlink_folder(key, Self::options_for(relative_folder, options)?)
            .await
    }

    pub async fn cancel_action(&self, version: &BsVersion, relative_folder: &str) -> SyncResult<()> {
        self.queue
            .cancel_action(&self.folder_key(version, relative_folder)?)
            .await;
        Ok(())
    }

    pub async fn folder_link_state(
        &self,
        version: &BsVersion,
        relative_folder: &str,
    ) -> SyncResult<watch::Receiver<LinkState>> {
        Ok(self
            .queue
            .state(&self.folder_key(version, relative_folder)?)
            .await)
    }

    pub async fn is_version_folder_linked(&self, version: &BsVersion, relative_folder: &str) -> SyncResult<bool> {
        Ok(self
            .queue
            .is_folder_linked(&self.folder_key(version, relative_folder)?)
            .await)
    }

    /// Linked folders of a version, absolute or relative to the version folder
    pub async fn linked_folders(&self, version: &BsVersion, options: LinkedFoldersOptions) -> SyncResult<Vec<PathBuf>> {
        let version_path = self.layout.version_path(version);
        let linked = self
            .queue
            .primitive()
            .list_linked_folders(&version_path)
            .await
            .map_err(|e| SyncError::io(&version_path, e))?;

        if !options.relative {
            return Ok(linked);
        }
        linked
            .iter()
            .map(|path| {
                self.layout
                    .full_path_to_relative(version, path)
                    .map(PathBuf::from)
            })
            .collect()
    }

    pub async fn shared_folders(&self) -> SyncResult<Vec<String>> {
        Ok(self
            .store
            .get_json::<Vec<String>>(SHARED_FOLDERS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save_shared_folders(&self, folders: &[String]) -> SyncResult<()> {
        if folders.is_empty() {
            return self.store.delete(SHARED_FOLDERS_KEY).await;
        }
        self.store.set_json(SHARED_FOLDERS_KEY, &folders).await
    }

    /// Add a folder picked inside `version` to the shared list. Warn-listed
    /// folders are only added once the confirmer accepts them.
    pub async fn add_shared_folder(&self, version: &BsVersion, full_path: &std::path::Path) -> SyncResult<SharedFolderAdd> {
        let relative = self.layout.full_path_to_relative(version, full_path)?;
        let mut folders = self.shared_folders().await?;

        if folders.contains(&relative) {
            return Ok(SharedFolderAdd::AlreadyPresent(relative));
        }
        if SHARED_FOLDER_BLACKLIST.contains(&relative.as_str()) {
            warn!("refusing to share {}", relative);
            return Err(SyncError::InvalidFolder {
                folder: relative,
                reason: "sharing it would break the installation".to_string(),
            });
        }
        if SHARED_FOLDER_WARNLIST.contains(&relative.as_str()) {
            let answer = self
                .confirmer
                .confirm(ConfirmRequest::ShareFolder {
                    folder: relative.clone(),
                })
                .await;
            if !answer.accepted {
                info!("sharing of {} declined", relative);
                return Ok(SharedFolderAdd::Declined(relative));
            }
        }

        info!("sharing folder {}", relative);
        folders.push(relative.clone());
        self.save_shared_folders(&folders).await?;
        Ok(SharedFolderAdd::Added(relative))
    }

    pub async fn remove_shared_folder(&self, relative_folder: &str) -> SyncResult<()> {
        let mut folders = self.shared_folders().await?;
        folders.retain(|f| f != relative_folder);
        self.save_shared_folders(&folders).await
    }

    /// Link every shared folder of `version`: the persisted list plus the
    /// folders already linked. Each folder runs in its own lane.
    pub async fn link_all(&self, version: &BsVersion) -> SyncResult<Vec<(String, SyncResult<LinkOutcome>)>> {
        let mut folders = self.shared_folders().await?;
        let linked = self
            .linked_folders(version, LinkedFoldersOptions { relative: true })
            .await?;
        for folder in linked {
            let folder = folder.to_string_lossy().replace('\\', "/");
            if !folders.contains(&folder) {
                folders.push(folder);
            }
        }

        let results = join_all(folders.iter().map(|folder| {
            self.link_version_folder(version, folder, LinkOptions::default())
        }))
        .await;
        Ok(folders.into_iter().zip(results).collect())
    }
}
