//! File downloads with a percentage progress bar

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use stream_dl::{Downloader, TransferHandle, TransferOptions, TransferState, WeakTransferHandle};
use tokio::sync::{watch, Mutex};

use crate::error::SyncResult;

type InFlight = Arc<Mutex<HashMap<(String, PathBuf), WeakTransferHandle<PathBuf>>>>;

/// Percentage view of one download
pub struct ProgressBar {
    percent: watch::Receiver<f64>,
    handle: TransferHandle<PathBuf>,
}

impl ProgressBar {
    /// Percent done in `0..=100`, updated for every received chunk
    pub fn percent(&self) -> watch::Receiver<f64> {
        self.percent.clone()
    }

    pub fn transfer(&self) -> &TransferHandle<PathBuf> {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Path of the downloaded file once the transfer ends
    pub async fn wait(&self) -> SyncResult<PathBuf> {
        let progress = self.handle.wait().await?;
        Ok(progress.data)
    }
}

/// Starts downloads and joins concurrent requests for the same file onto
/// the transfer already running.
///
/// The tracker only keeps weak references: dropping every `ProgressBar` of a
/// download aborts it and removes the partial file.
#[derive(Clone)]
pub struct DownloadTracker {
    downloader: Downloader,
    in_flight: InFlight,
}

impl DownloadTracker {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// Downloads still running with at least one observer
    pub async fn in_flight(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|_, transfer| transfer.is_running());
        in_flight.len()
    }

    pub async fn download_with_progress(&self, url: &str, destination: &Path) -> ProgressBar {
        let key = (url.to_string(), destination.to_path_buf());
        let handle = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.retain(|_, transfer| transfer.is_running());
            match in_flight.get(&key).and_then(WeakTransferHandle::upgrade) {
                Some(handle) => {
                    debug!("joining running download of {}", url);
                    handle
                }
                None => {
                    info!("downloading {} to {:?}", url, destination);
                    let handle = self
                        .downloader
                        .download(url, destination, TransferOptions::default());
                    in_flight.insert(key, handle.downgrade());
                    handle
                }
            }
        };

        ProgressBar {
            percent: percent_of(&handle),
            handle,
        }
    }
}

fn percent_of(handle: &TransferHandle<PathBuf>) -> watch::Receiver<f64> {
    let mut states = handle.subscribe();
    let initial = states
        .borrow_and_update()
        .progress()
        .map(|p| p.percent())
        .unwrap_or(0.0);
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let (percent, terminal) = {
                        let state = states.borrow_and_update();
                        let percent = match &*state {
                            TransferState::Completed(_) => Some(100.0),
                            other => other.progress().map(|p| p.percent()),
                        };
                        (percent, state.is_terminal())
                    };
                    if let Some(percent) = percent {
                        tx.send_replace(percent);
                    }
                    if terminal {
                        break;
                    }
                }
            }
        }
    });
    rx
}
