//! Composition root: builds every service once and hands out shared handles

use std::sync::Arc;

use log::info;
use stream_dl::{Downloader, HttpClient};

use crate::beatsaver::{BeatSaverApi, MapDetailsResolver, MapsApi};
use crate::config::SyncConfig;
use crate::db::StateStore;
use crate::error::SyncResult;
use crate::installer::{InstallerBridge, TwoFactorPrompt};
use crate::linker::{LinkPrimitive, LinkQueue, LocalLinkPrimitive};
use crate::orchestrator::{Confirmer, DownloadTracker, MapsManager, VersionFolderLinker};
use crate::version::InstallationLayout;

/// Collaborators supplied by the embedding application
pub struct ContextParts {
    pub config: SyncConfig,
    pub store: Arc<StateStore>,
    pub downloader: Downloader,
    pub primitive: Arc<dyn LinkPrimitive>,
    pub maps_api: Arc<dyn MapsApi>,
    pub confirmer: Arc<dyn Confirmer>,
    pub two_factor: Arc<dyn TwoFactorPrompt>,
}

pub struct SyncContext {
    pub config: SyncConfig,
    pub layout: InstallationLayout,
    pub store: Arc<StateStore>,
    pub queue: LinkQueue,
    pub resolver: Arc<MapDetailsResolver>,
    pub folders: Arc<VersionFolderLinker>,
    pub maps: Arc<MapsManager>,
    pub downloads: DownloadTracker,
    pub installer: Arc<InstallerBridge>,
}

impl SyncContext {
    /// Default collaborators: HTTP client, BeatSaver API and local symlinks
    pub async fn new(
        config: SyncConfig,
        confirmer: Arc<dyn Confirmer>,
        two_factor: Arc<dyn TwoFactorPrompt>,
    ) -> SyncResult<Self> {
        let client = HttpClient::new(config.client_options())?;
        let store = Arc::new(StateStore::open(&config.state_db).await?);
        let maps_api: Arc<dyn MapsApi> = Arc::new(BeatSaverApi::new(client.clone(), config.beatsaver_api_url.clone()));

        Ok(Self::with_parts(ContextParts {
            config,
            store,
            downloader: Downloader::new(client),
            primitive: Arc::new(LocalLinkPrimitive),
            maps_api,
            confirmer,
            two_factor,
        }))
    }

    pub fn with_parts(parts: ContextParts) -> Self {
        let ContextParts {
            config,
            store,
            downloader,
            primitive,
            maps_api,
            confirmer,
            two_factor,
        } = parts;

        let layout = InstallationLayout::new(config.installation_dir.clone());
        let queue = LinkQueue::new(primitive, layout.shared_dir());
        let resolver = Arc::new(MapDetailsResolver::new(maps_api, config.batch_size));
        let folders = Arc::new(VersionFolderLinker::new(
            layout.clone(),
            queue.clone(),
            Arc::clone(&store),
            Arc::clone(&confirmer),
        ));
        let maps = Arc::new(MapsManager::new(
            Arc::clone(&folders),
            Arc::clone(&resolver),
            downloader.clone(),
            confirmer,
            Arc::clone(&store),
        ));
        let downloads = DownloadTracker::new(downloader);
        let installer = Arc::new(InstallerBridge::new(two_factor));

        info!(
            "sync context ready: installation {:?}, shared root {:?}",
            layout.installation_dir(),
            queue.shared_root()
        );

        Self {
            config,
            layout,
            store,
            queue,
            resolver,
            folders,
            maps,
            downloads,
            installer,
        }
    }
}
