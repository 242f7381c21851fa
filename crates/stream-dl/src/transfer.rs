//! Download worker - streams a response body to a file or memory while
//! publishing progress to every subscriber of the transfer

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::HttpClient;
use crate::error::TransferError;
use crate::progress::{Progress, SharedBuffer, TransferState};

/// Default write buffer size (256 KB) - reduces I/O operations
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Per-transfer options
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Extra request headers, sent on top of the client's identifying header
    pub headers: Vec<(String, String)>,
    /// Bytes kept in memory before each write to the destination file
    pub write_buffer_size: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
        }
    }
}

/// Observer handle of one transfer.
///
/// Every clone shares the same underlying request; a new subscriber first
/// sees the latest snapshot. Once every handle and receiver is gone the
/// transfer is aborted and its partial output removed.
#[derive(Debug, Clone)]
pub struct TransferHandle<T> {
    url: Arc<str>,
    rx: watch::Receiver<TransferState<T>>,
    tx: Weak<watch::Sender<TransferState<T>>>,
    token: CancellationToken,
}

impl<T: Clone> TransferHandle<T> {
    fn new(url: &str, tx: &Arc<watch::Sender<TransferState<T>>>, token: CancellationToken) -> Self {
        Self {
            url: Arc::from(url),
            rx: tx.subscribe(),
            tx: Arc::downgrade(tx),
            token,
        }
    }

    /// Reference that does not count as an observer
    pub fn downgrade(&self) -> WeakTransferHandle<T> {
        WeakTransferHandle {
            url: Arc::clone(&self.url),
            tx: Weak::clone(&self.tx),
            token: self.token.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState<T>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> TransferState<T> {
        self.rx.borrow().clone()
    }

    /// Abort the transfer. Calling it again, or after the transfer ended, is a no-op.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the terminal state and return the final progress
    pub async fn wait(&self) -> Result<Progress<T>, TransferError> {
        let mut rx = self.rx.clone();
        let terminal = rx
            .wait_for(TransferState::is_terminal)
            .await
            .map(|state| state.clone());
        let state = match terminal {
            Ok(state) => state,
            Err(_) => rx.borrow().clone(),
        };
        state.into_result().unwrap_or(Err(TransferError::Cancelled))
    }
}

/// Non-owning reference to a transfer.
///
/// Holding one never keeps a transfer alive: once the last strong handle is
/// dropped the transfer aborts and `upgrade` returns `None`.
#[derive(Debug, Clone)]
pub struct WeakTransferHandle<T> {
    url: Arc<str>,
    tx: Weak<watch::Sender<TransferState<T>>>,
    token: CancellationToken,
}

impl<T: Clone> WeakTransferHandle<T> {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Still running with at least one observer
    pub fn is_running(&self) -> bool {
        self.live_sender().is_some()
    }

    /// New observer of the transfer, if it is still running
    pub fn upgrade(&self) -> Option<TransferHandle<T>> {
        let tx = self.live_sender()?;
        Some(TransferHandle {
            url: Arc::clone(&self.url),
            rx: tx.subscribe(),
            tx: Arc::downgrade(&tx),
            token: self.token.clone(),
        })
    }

    fn live_sender(&self) -> Option<Arc<watch::Sender<TransferState<T>>>> {
        let tx = self.tx.upgrade()?;
        if tx.is_closed() || self.token.is_cancelled() || tx.borrow().is_terminal() {
            return None;
        }
        Some(tx)
    }
}

/// Transfer engine: starts transfers and hands out their observer handles
#[derive(Debug, Clone)]
pub struct Downloader {
    client: HttpClient,
}

impl Downloader {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Stream `url` into `destination`, creating parent directories as needed
    pub fn download(
        &self,
        url: &str,
        destination: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> TransferHandle<PathBuf> {
        let destination = destination.into();
        let (tx, _) = watch::channel(TransferState::Running(Progress::new(destination.clone())));
        let tx = Arc::new(tx);
        let token = CancellationToken::new();
        let job = Job {
            client: self.client.clone(),
            url: url.to_string(),
            options,
            token: token.clone(),
        };

        let handle = TransferHandle::new(url, &tx, token);
        tokio::spawn(run_file_transfer(job, destination, tx));
        handle
    }

    /// Fetch `url` into memory. `data` stays `None` until the transfer completes.
    pub fn download_to_buffer(
        &self,
        url: &str,
        options: TransferOptions,
    ) -> TransferHandle<Option<SharedBuffer>> {
        let (tx, _) = watch::channel(TransferState::Running(Progress::new(None)));
        let tx = Arc::new(tx);
        let token = CancellationToken::new();
        let job = Job {
            client: self.client.clone(),
            url: url.to_string(),
            options,
            token: token.clone(),
        };

        let handle = TransferHandle::new(url, &tx, token);
        tokio::spawn(run_buffer_transfer(job, tx));
        handle
    }
}

struct Job {
    client: HttpClient,
    url: String,
    options: TransferOptions,
    token: CancellationToken,
}

enum Sink {
    File {
        path: PathBuf,
        file: Option<File>,
        buffer: Vec<u8>,
        capacity: usize,
    },
    Memory(Vec<u8>),
}

impl Sink {
    fn file(path: PathBuf, capacity: usize) -> Self {
        Sink::File {
            path,
            file: None,
            buffer: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    async fn open(&mut self) -> Result<(), TransferError> {
        if let Sink::File { path, file, .. } = self {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransferError::io(parent, e))?;
            }
            *file = Some(
                File::create(&*path)
                    .await
                    .map_err(|e| TransferError::io(&*path, e))?,
            );
        }
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        match self {
            Sink::File {
                path,
                file,
                buffer,
                capacity,
            } => {
                buffer.extend_from_slice(chunk);
                if buffer.len() >= *capacity {
                    if let Some(file) = file.as_mut() {
                        file.write_all(buffer)
                            .await
                            .map_err(|e| TransferError::io(&*path, e))?;
                    }
                    buffer.clear();
                }
            }
            Sink::Memory(data) => data.extend_from_slice(chunk),
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), TransferError> {
        if let Sink::File {
            path, file, buffer, ..
        } = self
        {
            if let Some(file) = file.as_mut() {
                if !buffer.is_empty() {
                    file.write_all(buffer)
                        .await
                        .map_err(|e| TransferError::io(&*path, e))?;
                    buffer.clear();
                }
                file.flush()
                    .await
                    .map_err(|e| TransferError::io(&*path, e))?;
            }
        }
        Ok(())
    }

    /// Close and delete whatever was written so far
    async fn discard(self) {
        if let Sink::File { path, file, .. } = self {
            drop(file);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed partial download {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!("failed to remove partial download {}: {}", path.display(), e),
            }
        }
    }

    fn into_buffer(self) -> Vec<u8> {
        match self {
            Sink::Memory(data) => data,
            Sink::File { .. } => Vec::new(),
        }
    }
}

async fn run_file_transfer(
    job: Job,
    destination: PathBuf,
    tx: Arc<watch::Sender<TransferState<PathBuf>>>,
) {
    let mut sink = Sink::file(destination.clone(), job.options.write_buffer_size);
    let state = match pump(&job, &mut sink, &tx, &destination).await {
        Ok((current, total)) => {
            info!("download completed: {} -> {}", job.url, destination.display());
            TransferState::Completed(Progress {
                current,
                total,
                data: destination,
            })
        }
        Err(err) => {
            sink.discard().await;
            terminal_error(&job.url, err)
        }
    };
    tx.send_replace(state);
}

async fn run_buffer_transfer(job: Job, tx: Arc<watch::Sender<TransferState<Option<SharedBuffer>>>>) {
    let mut sink = Sink::Memory(Vec::new());
    let state = match pump(&job, &mut sink, &tx, &None).await {
        Ok((current, total)) => {
            info!("download completed: {} ({} bytes in memory)", job.url, current);
            TransferState::Completed(Progress {
                current,
                total,
                data: Some(Arc::new(sink.into_buffer())),
            })
        }
        Err(err) => terminal_error(&job.url, err),
    };
    tx.send_replace(state);
}

fn terminal_error<T>(url: &str, err: TransferError) -> TransferState<T> {
    if err.is_cancelled() {
        info!("download cancelled: {}", url);
        TransferState::Cancelled
    } else {
        error!("download failed: {}", err);
        TransferState::Failed(err)
    }
}

/// Drive the request to completion. Returns the final `(current, total)`.
async fn pump<T: Clone>(
    job: &Job,
    sink: &mut Sink,
    tx: &watch::Sender<TransferState<T>>,
    data: &T,
) -> Result<(u64, u64), TransferError> {
    let mut request = job.client.get(&job.url);
    for (name, value) in &job.options.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = tokio::select! {
        biased;
        _ = job.token.cancelled() => return Err(TransferError::Cancelled),
        _ = tx.closed() => return Err(TransferError::Cancelled),
        response = request.send() => response.map_err(|e| TransferError::request(&job.url, e))?,
    };

    if !response.status().is_success() {
        return Err(TransferError::Status {
            url: job.url.clone(),
            status: response.status().as_u16(),
        });
    }

    let mut progress = Progress {
        current: 0,
        total: response.content_length().unwrap_or(0),
        data: data.clone(),
    };
    tx.send_replace(TransferState::Running(progress.clone()));

    sink.open().await?;

    let mut stream = response.bytes_stream();
    loop {
        let next = tokio::select! {
            biased;
            _ = job.token.cancelled() => return Err(TransferError::Cancelled),
            _ = tx.closed() => return Err(TransferError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk.map_err(|e| TransferError::request(&job.url, e))?;

        sink.write(&chunk).await?;

        progress.current += chunk.len() as u64;
        if progress.total != 0 && progress.current > progress.total {
            progress.total = progress.current;
        }
        tx.send_replace(TransferState::Running(progress.clone()));
    }

    sink.finish().await?;

    let total = if progress.total == 0 {
        progress.current
    } else {
        progress.total
    };
    Ok((progress.current, total))
}
