//! Custom maps of a version: linking, deleting, exporting and one-click installs

use std::fs::File;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use stream_dl::{Downloader, TransferOptions};
use tokio::sync::watch;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::confirm::{ConfirmRequest, Confirmer};
use super::folders::VersionFolderLinker;
use crate::beatsaver::{MapDetail, MapDetailsResolver, SearchParams};
use crate::config::LinkOptions;
use crate::db::StateStore;
use crate::error::{SyncError, SyncResult};
use crate::linker::{LinkEntry, LinkOutcome, ResourceKey};
use crate::version::{BsVersion, MAPS_RELATIVE_FOLDER};

/// Skip the confirmation when a single map is deleted
pub const NOT_CONFIRM_DELETE_MAP_KEY: &str = "not-confirm-delete-map";

/// A map folder on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMap {
    pub path: PathBuf,
    #[serde(default)]
    pub hash: Option<String>,
}

impl LocalMap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteMapsProgress {
    pub deleted: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveProgress {
    pub processed_files: usize,
    pub total_files: usize,
}

pub struct MapsManager {
    folders: Arc<VersionFolderLinker>,
    resolver: Arc<MapDetailsResolver>,
    downloader: Downloader,
    confirmer: Arc<dyn Confirmer>,
    store: Arc<StateStore>,
    delete_progress: watch::Sender<DeleteMapsProgress>,
    export_progress: Arc<watch::Sender<ArchiveProgress>>,
}

impl MapsManager {
    pub fn new(
        folders: Arc<VersionFolderLinker>,
        resolver: Arc<MapDetailsResolver>,
        downloader: Downloader,
        confirmer: Arc<dyn Confirmer>,
        store: Arc<StateStore>,
    ) -> Self {
        let (delete_progress, _) = watch::channel(DeleteMapsProgress::default());
        let (export_progress, _) = watch::channel(ArchiveProgress::default());
        Self {
            folders,
            resolver,
            downloader,
            confirmer,
            store,
            delete_progress,
            export_progress: Arc::new(export_progress),
        }
    }

    pub fn maps_path(&self, version: &BsVersion) -> PathBuf {
        self.folders.layout().maps_path(version)
    }

    fn maps_key(&self, version: &BsVersion) -> ResourceKey {
        ResourceKey::new(self.maps_path(version))
    }

    pub async fn version_have_maps_linked(&self, version: &BsVersion) -> bool {
        self.folders
            .queue()
            .is_folder_linked(&self.maps_key(version))
            .await
    }

    pub async fn link_maps(&self, version: &BsVersion) -> SyncResult<LinkOutcome> {
        let answer = self.confirmer.confirm(ConfirmRequest::LinkMaps).await;
        if !answer.accepted {
            return Ok(LinkOutcome::Cancelled);
        }
        let options = LinkOptions {
            keep_contents: answer.keep_contents,
            ..LinkOptions::default()
        };
        self.folders
            .link_version_folder(version, MAPS_RELATIVE_FOLDER, options)
            .await
    }

    pub async fn unlink_maps(&self, version: &BsVersion) -> SyncResult<LinkOutcome> {
        let answer = self.confirmer.confirm(ConfirmRequest::UnlinkMaps).await;
        if !answer.accepted {
            return Ok(LinkOutcome::Cancelled);
        }
        let options = LinkOptions {
            keep_contents: answer.keep_contents,
            ..LinkOptions::default()
        };
        self.folders
            .unlink_version_folder(version, MAPS_RELATIVE_FOLDER, options)
            .await
    }

    /// True while a link or unlink of the version's maps folder is queued or running
    pub fn maps_linking_pending(&self, version: &BsVersion) -> watch::Receiver<bool> {
        let maps_key = self.maps_key(version);
        let mut queue = self.folders.queue().subscribe_queue();
        let pending = move |entries: &[LinkEntry]| {
            entries
                .iter()
                .any(|entry| entry.key.is_within(maps_key.as_path()))
        };

        let initial = pending(queue.borrow_and_update().as_slice());
        let (tx, rx) = watch::channel(initial);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    changed = queue.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now = pending(queue.borrow_and_update().as_slice());
                        tx.send_if_modified(|value| {
                            let modified = *value != now;
                            *value = now;
                            modified
                        });
                    }
                }
            }
        });
        rx
    }

    pub fn subscribe_delete_progress(&self) -> watch::Receiver<DeleteMapsProgress> {
        self.delete_progress.subscribe()
    }

    pub fn subscribe_export_progress(&self) -> watch::Receiver<ArchiveProgress> {
        self.export_progress.subscribe()
    }

    /// Delete map folders. Returns `false` when the user declined.
    pub async fn delete_maps(&self, maps: &[LocalMap], version: Option<&BsVersion>) -> SyncResult<bool> {
        if maps.is_empty() {
            return Ok(true);
        }

        let linked = match version {
            Some(version) => self.version_have_maps_linked(version).await,
            None => false,
        };
        let remembered = self.store.get(NOT_CONFIRM_DELETE_MAP_KEY).await?.as_deref() == Some("true");

        if maps.len() > 1 || !remembered {
            let answer = self
                .confirmer
                .confirm(ConfirmRequest::DeleteMaps {
                    count: maps.len(),
                    linked,
                })
                .await;
            if !answer.accepted {
                return Ok(false);
            }
            if answer.remember && maps.len() == 1 {
                self.store.set(NOT_CONFIRM_DELETE_MAP_KEY, "true").await?;
            }
        }

        let total = maps.len();
        self.delete_progress
            .send_replace(DeleteMapsProgress { deleted: 0, total });
        for (index, map) in maps.iter().enumerate() {
            match tokio::fs::remove_dir_all(&map.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("map {:?} already gone", map.path);
                }
                Err(e) => return Err(SyncError::io(&map.path, e)),
            }
            self.delete_progress.send_replace(DeleteMapsProgress {
                deleted: index + 1,
                total,
            });
        }
        info!("deleted {} maps", total);
        Ok(true)
    }

    /// Zip map folders into `out_path`; every map of the version when `maps` is `None`
    pub async fn export_maps(
        &self,
        version: &BsVersion,
        maps: Option<&[LocalMap]>,
        out_path: &Path,
    ) -> SyncResult<ArchiveProgress> {
        let folders: Vec<PathBuf> = match maps {
            Some(maps) => maps.iter().map(|map| map.path.clone()).collect(),
            None => list_map_folders(&self.maps_path(version)).await?,
        };
        let out_path = out_path.to_path_buf();
        let progress = Arc::clone(&self.export_progress);

        let result = tokio::task::spawn_blocking(move || write_archive(&folders, &out_path, &progress))
            .await
            .map_err(|e| SyncError::Archive(e.to_string()))?;
        if let Ok(done) = &result {
            info!("exported {} files", done.total_files);
        }
        result
    }

    /// Download a map archive and unpack it into the version's maps folder
    pub async fn one_click_install_map(&self, detail: &MapDetail, version: &BsVersion) -> SyncResult<PathBuf> {
        let url = detail
            .download_url()
            .ok_or_else(|| SyncError::NotFound(format!("download url of map {}", detail.id)))?;
        let handle = self
            .downloader
            .download_to_buffer(url, TransferOptions::default());
        let progress = handle.wait().await?;
        let buffer = progress
            .data
            .ok_or_else(|| SyncError::Archive(format!("empty download for map {}", detail.id)))?;

        let destination = self.maps_path(version).join(detail.folder_name());
        let dest = destination.clone();
        tokio::task::spawn_blocking(move || extract_archive(buffer.as_slice(), &dest))
            .await
            .map_err(|e| SyncError::Archive(e.to_string()))??;

        info!("installed map {} into {:?}", detail.id, destination);
        Ok(destination)
    }

    pub async fn map_details(&self, hashes: &[String]) -> Vec<MapDetail> {
        self.resolver.resolve_by_hashes(hashes).await
    }

    pub async fn map_details_by_id(&self, id: &str) -> Option<MapDetail> {
        self.resolver.get_by_id(id).await
    }

    pub async fn search_maps(&self, params: &SearchParams) -> Vec<MapDetail> {
        self.resolver.search(params).await
    }
}

async fn list_map_folders(maps_path: &Path) -> SyncResult<Vec<PathBuf>> {
    let mut folders = Vec::new();
    let mut entries = match tokio::fs::read_dir(maps_path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(folders),
        Err(e) => return Err(SyncError::io(maps_path, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::io(maps_path, e))?
    {
        if entry.path().is_dir() {
            folders.push(entry.path());
        }
    }
    folders.sort();
    Ok(folders)
}

fn write_archive(
    folders: &[PathBuf],
    out_path: &Path,
    progress: &watch::Sender<ArchiveProgress>,
) -> SyncResult<ArchiveProgress> {
    let mut files = Vec::new();
    for folder in folders {
        let Some(root) = folder.parent() else {
            continue;
        };
        for entry in WalkDir::new(folder) {
            let entry = entry.map_err(|e| SyncError::io(folder, io::Error::other(e)))?;
            if entry.file_type().is_file() {
                let name = entry
                    .path()
                    .strip_prefix(root)
                    .map_err(|e| SyncError::Archive(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((entry.into_path(), name));
            }
        }
    }

    let mut done = ArchiveProgress {
        processed_files: 0,
        total_files: files.len(),
    };
    progress.send_replace(done);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }
    let file = File::create(out_path).map_err(|e| SyncError::io(out_path, e))?;
    if let Err(err) = fill_archive(file, files, &mut done, progress) {
        match std::fs::remove_file(out_path) {
            Ok(()) => info!("removed partial archive {:?}", out_path),
            Err(e) => warn!("failed to remove partial archive {:?}: {}", out_path, e),
        }
        return Err(err);
    }
    Ok(done)
}

fn fill_archive(
    file: File,
    files: Vec<(PathBuf, String)>,
    done: &mut ArchiveProgress,
    progress: &watch::Sender<ArchiveProgress>,
) -> SyncResult<()> {
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, name) in files {
        zip.start_file(name, options)?;
        let mut source = File::open(&path).map_err(|e| SyncError::io(&path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| SyncError::io(&path, e))?;
        done.processed_files += 1;
        progress.send_replace(*done);
    }
    zip.finish()?;
    Ok(())
}

/// Unpack into `destination`. A folder created here is removed again if
/// unpacking fails; an existing one is left as is.
fn extract_archive(bytes: &[u8], destination: &Path) -> SyncResult<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let existed = destination.exists();
    std::fs::create_dir_all(destination).map_err(|e| SyncError::io(destination, e))?;

    let result = unpack_entries(&mut archive, destination);
    if result.is_err() && !existed {
        match std::fs::remove_dir_all(destination) {
            Ok(()) => info!("removed partial map folder {:?}", destination),
            Err(e) => warn!("failed to remove partial map folder {:?}: {}", destination, e),
        }
    }
    result
}

fn unpack_entries(archive: &mut ZipArchive<Cursor<&[u8]>>, destination: &Path) -> SyncResult<()> {
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(relative) = file.enclosed_name() else {
            warn!("skipping unsafe archive entry {}", file.name());
            continue;
        };
        let out_path = destination.join(relative);
        if file.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| SyncError::io(&out_path, e))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }
        let mut out_file = File::create(&out_path).map_err(|e| SyncError::io(&out_path, e))?;
        io::copy(&mut file, &mut out_file).map_err(|e| SyncError::io(&out_path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{extract_archive, write_archive, ArchiveProgress};
    use std::fs;
    use std::io::Write;
    use tokio::sync::watch;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    #[test]
    fn exported_archive_extracts_back() {
        let dir = tempfile::tempdir().unwrap();
        let maps = dir.path().join("CustomLevels");
        fs::create_dir_all(maps.join("1a (Song - Mapper)")).unwrap();
        fs::write(maps.join("1a (Song - Mapper)").join("Info.dat"), b"info").unwrap();
        fs::write(maps.join("1a (Song - Mapper)").join("song.egg"), b"egg").unwrap();
        fs::create_dir_all(maps.join("2b (Other - Mapper)")).unwrap();
        fs::write(maps.join("2b (Other - Mapper)").join("Info.dat"), b"other").unwrap();

        let (tx, rx) = watch::channel(ArchiveProgress::default());
        let out = dir.path().join("export").join("maps.zip");
        let folders = vec![maps.join("1a (Song - Mapper)"), maps.join("2b (Other - Mapper)")];
        let done = write_archive(&folders, &out, &tx).unwrap();

        assert_eq!(done.total_files, 3);
        assert_eq!(done.processed_files, 3);
        assert_eq!(*rx.borrow(), done);

        let bytes = fs::read(&out).unwrap();
        let restored = dir.path().join("restored");
        extract_archive(&bytes, &restored).unwrap();
        assert_eq!(fs::read(restored.join("1a (Song - Mapper)").join("song.egg")).unwrap(), b"egg");
        assert_eq!(fs::read(restored.join("2b (Other - Mapper)").join("Info.dat")).unwrap(), b"other");
    }

    #[test]
    fn failed_export_leaves_no_partial_archive() {
        let dir = tempfile::tempdir().unwrap();
        let map = dir.path().join("CustomLevels").join("1a (Song - Mapper)");
        fs::create_dir_all(&map).unwrap();
        fs::write(map.join("Info.dat"), b"info").unwrap();

        let (tx, rx) = watch::channel(ArchiveProgress::default());
        let out = dir.path().join("maps.zip");
        let result = write_archive(&[map.clone(), map], &out, &tx);

        assert!(result.is_err());
        assert_eq!(rx.borrow().processed_files, 1);
        assert!(!out.exists());
    }

    #[test]
    fn corrupt_entry_removes_the_half_extracted_folder() {
        let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file("Info.dat", options).unwrap();
        zip.write_all(b"info").unwrap();
        zip.start_file("song.egg", options).unwrap();
        zip.write_all(b"EGGDATA-EGGDATA-EGGDATA").unwrap();
        let mut bytes = zip.finish().unwrap().into_inner();

        let at = bytes
            .windows(7)
            .position(|window| window == b"EGGDATA")
            .unwrap();
        bytes[at] = b'X';

        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("1a (Song - Mapper)");
        assert!(extract_archive(&bytes, &destination).is_err());
        assert!(!destination.exists());

        let existing = dir.path().join("2b (Other - Mapper)");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("cover.jpg"), b"cover").unwrap();
        assert!(extract_archive(&bytes, &existing).is_err());
        assert_eq!(fs::read(existing.join("cover.jpg")).unwrap(), b"cover");
    }
}
