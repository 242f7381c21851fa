use std::collections::HashSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bsm_sync::beatsaver::{BeatSaverApi, MapDetail, MapMetadata, MapVersion};
use bsm_sync::installer::TwoFactorPrompt;
use bsm_sync::linker::{LinkOutcome, LinkPrimitive, LinkState};
use bsm_sync::orchestrator::{
    ConfirmAnswer, ConfirmRequest, Confirmer, DeleteMapsProgress, LocalMap, SharedFolderAdd,
    NOT_CONFIRM_DELETE_MAP_KEY,
};
use bsm_sync::{BsVersion, ContextParts, LinkOptions, LinkedFoldersOptions, StateStore, SyncConfig, SyncContext, SyncError};
use stream_dl::{Downloader, HttpClient};
use tokio::sync::Semaphore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-memory link table; optionally holds every call until released
struct MemoryPrimitive {
    linked: Mutex<HashSet<PathBuf>>,
    gate: Option<Semaphore>,
}

impl MemoryPrimitive {
    fn new() -> Self {
        Self {
            linked: Mutex::new(HashSet::new()),
            gate: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    fn linked(&self) -> HashSet<PathBuf> {
        self.linked.lock().unwrap().clone()
    }

    async fn wait_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }
}

#[async_trait]
impl LinkPrimitive for MemoryPrimitive {
    async fn create_link(&self, _target: &Path, link_path: &Path, _keep_contents: bool) -> io::Result<()> {
        self.wait_gate().await;
        self.linked.lock().unwrap().insert(link_path.to_path_buf());
        Ok(())
    }

    async fn remove_link(&self, _target: &Path, link_path: &Path, _keep_contents: bool) -> io::Result<()> {
        self.wait_gate().await;
        self.linked.lock().unwrap().remove(link_path);
        Ok(())
    }

    async fn is_link(&self, path: &Path) -> bool {
        self.linked.lock().unwrap().contains(path)
    }

    async fn list_linked_folders(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut linked: Vec<PathBuf> = self
            .linked
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect();
        linked.sort();
        Ok(linked)
    }
}

struct ScriptedConfirmer {
    answer: Mutex<ConfirmAnswer>,
    asked: Mutex<Vec<ConfirmRequest>>,
}

impl ScriptedConfirmer {
    fn new(answer: ConfirmAnswer) -> Self {
        Self {
            answer: Mutex::new(answer),
            asked: Mutex::new(Vec::new()),
        }
    }

    fn set(&self, answer: ConfirmAnswer) {
        *self.answer.lock().unwrap() = answer;
    }

    fn asked(&self) -> Vec<ConfirmRequest> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirmer for ScriptedConfirmer {
    async fn confirm(&self, request: ConfirmRequest) -> ConfirmAnswer {
        self.asked.lock().unwrap().push(request);
        *self.answer.lock().unwrap()
    }
}

struct NoTwoFactor;

#[async_trait]
impl TwoFactorPrompt for NoTwoFactor {
    async fn ask_code(&self) -> Option<String> {
        None
    }
}

struct Harness {
    ctx: SyncContext,
    primitive: Arc<MemoryPrimitive>,
    confirmer: Arc<ScriptedConfirmer>,
    _dir: tempfile::TempDir,
}

async fn harness(primitive: MemoryPrimitive, api_url: &str) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        installation_dir: dir.path().join("bsm"),
        state_db: dir.path().join("state.db"),
        beatsaver_api_url: api_url.to_string(),
        ..SyncConfig::default()
    };
    let client = HttpClient::new(config.client_options()).unwrap();
    let store = Arc::new(StateStore::open(&config.state_db).await.unwrap());
    let primitive = Arc::new(primitive);
    let confirmer = Arc::new(ScriptedConfirmer::new(ConfirmAnswer::accepted(false)));

    let ctx = SyncContext::with_parts(ContextParts {
        maps_api: Arc::new(BeatSaverApi::new(client.clone(), config.beatsaver_api_url.clone())),
        downloader: Downloader::new(client),
        config,
        store,
        primitive: primitive.clone(),
        confirmer: confirmer.clone(),
        two_factor: Arc::new(NoTwoFactor),
    });

    Harness {
        ctx,
        primitive,
        confirmer,
        _dir: dir,
    }
}

fn version() -> BsVersion {
    BsVersion::new("1.29.1")
}

#[tokio::test]
async fn shared_folder_list_rejects_blacklisted_confirms_warned_and_persists() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    let folders = &h.ctx.folders;
    let version_path = h.ctx.layout.version_path(&version());

    let err = folders
        .add_shared_folder(&version(), &version_path.join("Plugins"))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidFolder { .. }));

    h.confirmer.set(ConfirmAnswer::declined());
    let logs = folders
        .add_shared_folder(&version(), &version_path.join("Logs"))
        .await
        .unwrap();
    assert_eq!(logs, SharedFolderAdd::Declined("Logs".to_string()));
    assert_eq!(
        h.confirmer.asked(),
        vec![ConfirmRequest::ShareFolder {
            folder: "Logs".to_string()
        }]
    );
    assert!(folders.shared_folders().await.unwrap().is_empty());
    h.confirmer.set(ConfirmAnswer::accepted(false));

    let user_data = folders
        .add_shared_folder(&version(), &version_path.join("UserData"))
        .await
        .unwrap();
    assert_eq!(user_data, SharedFolderAdd::Added("UserData".to_string()));
    let again = folders
        .add_shared_folder(&version(), &version_path.join("UserData"))
        .await
        .unwrap();
    assert_eq!(again, SharedFolderAdd::AlreadyPresent("UserData".to_string()));

    assert_eq!(h.confirmer.asked().len(), 1);

    let logs = folders
        .add_shared_folder(&version(), &version_path.join("Logs"))
        .await
        .unwrap();
    assert_eq!(logs, SharedFolderAdd::Added("Logs".to_string()));
    assert_eq!(h.confirmer.asked().len(), 2);

    let reopened = StateStore::open(&h.ctx.config.state_db).await.unwrap();
    let persisted: Vec<String> = reopened
        .get_json(bsm_sync::orchestrator::SHARED_FOLDERS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted, vec!["UserData", "Logs"]);

    folders.remove_shared_folder("UserData").await.unwrap();
    folders.remove_shared_folder("Logs").await.unwrap();
    assert!(folders.shared_folders().await.unwrap().is_empty());
}

#[tokio::test]
async fn link_all_links_persisted_and_already_linked_folders() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    let folders = &h.ctx.folders;
    let version_path = h.ctx.layout.version_path(&version());
    h.primitive
        .linked
        .lock()
        .unwrap()
        .insert(version_path.join("CustomSabers"));

    for name in ["UserData", "Playlists"] {
        folders
            .add_shared_folder(&version(), &version_path.join(name))
            .await
            .unwrap();
    }

    let results = folders.link_all(&version()).await.unwrap();
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["UserData", "Playlists", "CustomSabers"]);
    for (_, result) in &results {
        assert_eq!(result.as_ref().unwrap(), &LinkOutcome::Completed(LinkState::Linked));
    }

    let mut relative = folders
        .linked_folders(&version(), LinkedFoldersOptions { relative: true })
        .await
        .unwrap();
    relative.sort();
    assert_eq!(
        relative,
        vec![PathBuf::from("CustomSabers"), PathBuf::from("Playlists"), PathBuf::from("UserData")]
    );
    assert!(folders.is_version_folder_linked(&version(), "Playlists").await.unwrap());
}

#[tokio::test]
async fn folders_escaping_the_version_are_refused() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    let folders = &h.ctx.folders;

    for folder in ["", ".", "..", "../1.34.2", "UserData/../..", "/etc"] {
        let err = folders
            .link_version_folder(&version(), folder, LinkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidFolder { .. }), "{folder:?} accepted");

        let err = folders
            .unlink_version_folder(&version(), folder, LinkOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidFolder { .. }));
        assert!(folders.cancel_action(&version(), folder).await.is_err());
        assert!(folders.folder_link_state(&version(), folder).await.is_err());
        assert!(folders.is_version_folder_linked(&version(), folder).await.is_err());
    }

    assert!(h.primitive.linked().is_empty());
    assert!(h.ctx.queue.entries().is_empty());
}

#[tokio::test]
async fn link_all_skips_escaping_entries_of_the_persisted_list() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    h.ctx
        .store
        .set_json(
            bsm_sync::orchestrator::SHARED_FOLDERS_KEY,
            &vec!["..".to_string(), "UserData".to_string()],
        )
        .await
        .unwrap();

    let results = h.ctx.folders.link_all(&version()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].1, Err(SyncError::InvalidFolder { .. })));
    assert_eq!(
        results[1].1.as_ref().unwrap(),
        &LinkOutcome::Completed(LinkState::Linked)
    );

    let linked = h.primitive.linked();
    assert_eq!(linked.len(), 1);
    assert!(linked.contains(&h.ctx.layout.version_path(&version()).join("UserData")));
}

#[tokio::test]
async fn declined_maps_link_never_reaches_the_queue() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    h.confirmer.set(ConfirmAnswer::declined());

    let outcome = h.ctx.maps.link_maps(&version()).await.unwrap();

    assert_eq!(outcome, LinkOutcome::Cancelled);
    assert_eq!(h.confirmer.asked(), vec![ConfirmRequest::LinkMaps]);
    assert!(h.primitive.linked().is_empty());
    assert!(h.ctx.queue.entries().is_empty());
}

#[tokio::test]
async fn maps_link_and_unlink_round_trip() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;

    let linked = h.ctx.maps.link_maps(&version()).await.unwrap();
    assert_eq!(linked, LinkOutcome::Completed(LinkState::Linked));
    assert!(h.ctx.maps.version_have_maps_linked(&version()).await);
    assert!(h.primitive.linked().contains(&h.ctx.maps.maps_path(&version())));

    let unlinked = h.ctx.maps.unlink_maps(&version()).await.unwrap();
    assert_eq!(unlinked, LinkOutcome::Completed(LinkState::Unlinked));
    assert!(!h.ctx.maps.version_have_maps_linked(&version()).await);
}

#[tokio::test]
async fn maps_linking_pending_follows_the_queue() {
    let h = harness(MemoryPrimitive::gated(), "http://127.0.0.1:9").await;
    let mut pending = h.ctx.maps.maps_linking_pending(&version());
    assert!(!*pending.borrow());

    let maps = Arc::clone(&h.ctx.maps);
    let link = tokio::spawn(async move { maps.link_maps(&version()).await });

    tokio::time::timeout(Duration::from_secs(5), pending.wait_for(|p| *p))
        .await
        .unwrap()
        .unwrap();
    h.primitive.release();
    assert!(link.await.unwrap().is_ok());
    tokio::time::timeout(Duration::from_secs(5), pending.wait_for(|p| !*p))
        .await
        .unwrap()
        .unwrap();
}

fn make_maps(root: &Path, names: &[&str]) -> Vec<LocalMap> {
    names
        .iter()
        .map(|name| {
            let folder = root.join(name);
            std::fs::create_dir_all(&folder).unwrap();
            std::fs::write(folder.join("Info.dat"), name.as_bytes()).unwrap();
            std::fs::write(folder.join("song.egg"), b"egg").unwrap();
            LocalMap::new(folder)
        })
        .collect()
}

#[tokio::test]
async fn deleting_maps_reports_aggregate_progress() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    let maps_path = h.ctx.maps.maps_path(&version());
    let maps = make_maps(&maps_path, &["1a (A - X)", "2b (B - Y)", "3c (C - Z)"]);
    let progress = h.ctx.maps.subscribe_delete_progress();

    let deleted = h.ctx.maps.delete_maps(&maps, Some(&version())).await.unwrap();

    assert!(deleted);
    assert_eq!(*progress.borrow(), DeleteMapsProgress { deleted: 3, total: 3 });
    assert!(maps.iter().all(|map| !map.path.exists()));
    assert_eq!(
        h.confirmer.asked(),
        vec![ConfirmRequest::DeleteMaps { count: 3, linked: false }]
    );
}

#[tokio::test]
async fn remembered_choice_skips_confirmation_for_single_maps() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    let maps_path = h.ctx.maps.maps_path(&version());
    let maps = make_maps(&maps_path, &["1a (A - X)", "2b (B - Y)"]);

    h.confirmer.set(ConfirmAnswer::declined());
    assert!(!h.ctx.maps.delete_maps(&maps[..1], None).await.unwrap());
    assert!(maps[0].path.exists());

    h.confirmer.set(ConfirmAnswer {
        accepted: true,
        keep_contents: false,
        remember: true,
    });
    assert!(h.ctx.maps.delete_maps(&maps[..1], None).await.unwrap());
    assert_eq!(
        h.ctx.store.get(NOT_CONFIRM_DELETE_MAP_KEY).await.unwrap().as_deref(),
        Some("true")
    );

    h.confirmer.set(ConfirmAnswer::declined());
    assert!(h.ctx.maps.delete_maps(&maps[1..], None).await.unwrap());
    assert_eq!(h.confirmer.asked().len(), 2);
    assert!(!maps[1].path.exists());
}

#[tokio::test]
async fn exporting_every_map_of_a_version() {
    let h = harness(MemoryPrimitive::new(), "http://127.0.0.1:9").await;
    make_maps(&h.ctx.maps.maps_path(&version()), &["1a (A - X)", "2b (B - Y)"]);
    let out = h.ctx.layout.installation_dir().join("exports").join("1.29.1Maps.zip");

    let done = h.ctx.maps.export_maps(&version(), None, &out).await.unwrap();

    assert_eq!(done.total_files, 4);
    assert_eq!(done.processed_files, 4);
    assert_eq!(*h.ctx.maps.subscribe_export_progress().borrow(), done);
    let archive = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
    assert_eq!(archive.len(), 4);
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn one_click_install_extracts_into_a_named_folder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cdn/abcd.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_bytes(&[("Info.dat", b"{}"), ("song.egg", b"egg")])),
        )
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(MemoryPrimitive::new(), &server.uri()).await;

    let detail = MapDetail {
        id: "1f2e".to_string(),
        metadata: MapMetadata {
            song_name: "Song".to_string(),
            level_author_name: "Mapper".to_string(),
            ..MapMetadata::default()
        },
        versions: vec![MapVersion {
            hash: "abcd".to_string(),
            download_url: format!("{}/cdn/abcd.zip", server.uri()),
            ..MapVersion::default()
        }],
        ..MapDetail::default()
    };

    let installed = h.ctx.maps.one_click_install_map(&detail, &version()).await.unwrap();

    assert_eq!(installed, h.ctx.maps.maps_path(&version()).join("1f2e (Song - Mapper)"));
    assert_eq!(std::fs::read(installed.join("song.egg")).unwrap(), b"egg");
}

#[tokio::test]
async fn map_details_are_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/hash/abcd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "1f2e",
            "versions": [{ "hash": "ABCD", "downloadURL": "", "coverURL": "" }]
        })))
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(MemoryPrimitive::new(), &server.uri()).await;

    let first = h.ctx.maps.map_details(&["ABCD".to_string()]).await;
    let second = h.ctx.maps.map_details(&["abcd".to_string()]).await;

    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn concurrent_downloads_of_one_file_share_a_transfer() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..64 * 1024).map(|i| (i % 7) as u8).collect();
    Mock::given(method("GET"))
        .and(path("/installer.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let h = harness(MemoryPrimitive::new(), &server.uri()).await;
    let dest = h.ctx.layout.installation_dir().join("downloads").join("installer.zip");
    let url = format!("{}/installer.zip", server.uri());

    let first = h.ctx.downloads.download_with_progress(&url, &dest).await;
    let second = h.ctx.downloads.download_with_progress(&url, &dest).await;
    assert_eq!(h.ctx.downloads.in_flight().await, 1);

    assert_eq!(first.wait().await.unwrap(), dest);
    assert_eq!(second.wait().await.unwrap(), dest);
    assert_eq!(std::fs::read(&dest).unwrap(), body);

    let mut percent = first.percent();
    tokio::time::timeout(Duration::from_secs(5), percent.wait_for(|p| *p >= 100.0))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn dropping_every_progress_bar_aborts_the_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/abandoned.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![7u8; 1024])
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;
    let h = harness(MemoryPrimitive::new(), &server.uri()).await;
    let dest = h.ctx.layout.installation_dir().join("downloads").join("abandoned.zip");
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, b"partial").unwrap();
    let url = format!("{}/abandoned.zip", server.uri());

    let first = h.ctx.downloads.download_with_progress(&url, &dest).await;
    let second = h.ctx.downloads.download_with_progress(&url, &dest).await;
    assert_eq!(h.ctx.downloads.in_flight().await, 1);
    drop(first);
    drop(second);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while dest.exists() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!dest.exists());
    assert_eq!(h.ctx.downloads.in_flight().await, 0);
}
