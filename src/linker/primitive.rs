//! Filesystem link primitive

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use walkdir::WalkDir;

/// How deep inside a version folder linked folders are looked for
pub const LINKED_FOLDER_SCAN_DEPTH: usize = 3;

/// Link/unlink primitive the queue drives. Implementations may use symlinks,
/// junctions or bind mounts; the queue never inspects the mechanism.
#[async_trait]
pub trait LinkPrimitive: Send + Sync {
    /// Make `link_path` point at `target`. With `keep_contents` the files
    /// already in `link_path` are merged into `target` first.
    async fn create_link(&self, target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()>;

    /// Replace the link at `link_path` with a real folder. With
    /// `keep_contents` the files of `target` are copied into it.
    async fn remove_link(&self, target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()>;

    async fn is_link(&self, path: &Path) -> bool;

    /// Every linked folder found under `root`
    async fn list_linked_folders(&self, root: &Path) -> io::Result<Vec<PathBuf>>;
}

/// Directory symlinks on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLinkPrimitive;

#[async_trait]
impl LinkPrimitive for LocalLinkPrimitive {
    async fn create_link(&self, target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()> {
        let target = target.to_path_buf();
        let link_path = link_path.to_path_buf();
        blocking(move || link_blocking(&target, &link_path, keep_contents)).await
    }

    async fn remove_link(&self, target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()> {
        let target = target.to_path_buf();
        let link_path = link_path.to_path_buf();
        blocking(move || unlink_blocking(&target, &link_path, keep_contents)).await
    }

    async fn is_link(&self, path: &Path) -> bool {
        tokio::fs::symlink_metadata(path)
            .await
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false)
    }

    async fn list_linked_folders(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let root = root.to_path_buf();
        blocking(move || {
            if !root.is_dir() {
                return Ok(Vec::new());
            }
            let mut linked = Vec::new();
            for entry in WalkDir::new(&root)
                .min_depth(1)
                .max_depth(LINKED_FOLDER_SCAN_DEPTH)
                .follow_links(false)
            {
                let entry = entry.map_err(io::Error::other)?;
                if entry.path_is_symlink() && entry.path().is_dir() {
                    linked.push(entry.into_path());
                }
            }
            linked.sort();
            Ok(linked)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

fn link_blocking(target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()> {
    fs::create_dir_all(target)?;

    if is_symlink(link_path) {
        if fs::read_link(link_path)? == target {
            debug!("{:?} already links to {:?}", link_path, target);
            return Ok(());
        }
        remove_symlink_dir(link_path)?;
    } else if link_path.is_dir() {
        if keep_contents {
            copy_dir(link_path, target, true)?;
        }
        fs::remove_dir_all(link_path)?;
    }

    if let Some(parent) = link_path.parent() {
        fs::create_dir_all(parent)?;
    }
    create_symlink_dir(target, link_path)
}

fn unlink_blocking(target: &Path, link_path: &Path, keep_contents: bool) -> io::Result<()> {
    if !is_symlink(link_path) {
        debug!("{:?} is not linked, nothing to remove", link_path);
        return fs::create_dir_all(link_path);
    }

    remove_symlink_dir(link_path)?;
    fs::create_dir_all(link_path)?;

    if keep_contents && target.is_dir() {
        copy_dir(target, link_path, false)?;
    }
    Ok(())
}

/// Copy the tree under `from` into `to`. Nested links are recreated, not followed.
fn copy_dir(from: &Path, to: &Path, overwrite: bool) -> io::Result<()> {
    for entry in WalkDir::new(from).min_depth(1).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let dest = to.join(relative);

        if entry.path_is_symlink() {
            if dest.exists() || is_symlink(&dest) {
                continue;
            }
            let link_target = fs::read_link(entry.path())?;
            if let Err(err) = create_symlink_any(&link_target, &dest) {
                warn!("skipping nested link {:?}: {}", entry.path(), err);
            }
        } else if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if dest.exists() && !overwrite {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink_dir(target: &Path, link_path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link_path)
}

#[cfg(windows)]
fn create_symlink_dir(target: &Path, link_path: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link_path)
}

#[cfg(unix)]
fn create_symlink_any(target: &Path, link_path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link_path)
}

#[cfg(windows)]
fn create_symlink_any(target: &Path, link_path: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link_path)
    } else {
        std::os::windows::fs::symlink_file(target, link_path)
    }
}

#[cfg(unix)]
fn remove_symlink_dir(link_path: &Path) -> io::Result<()> {
    fs::remove_file(link_path)
}

#[cfg(windows)]
fn remove_symlink_dir(link_path: &Path) -> io::Result<()> {
    fs::remove_dir(link_path)
}
