//! Bridge to the external game installer process

use std::sync::Arc;

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};

/// Tagged lifecycle events emitted by an installer process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum InstallerEvent {
    /// Percent done
    Progress(f32),
    /// The process waits for a two-factor code on its input
    TwoFactorRequired,
    Completed,
    Failed(String),
    Log(String),
}

impl InstallerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallerEvent::Completed | InstallerEvent::Failed(_))
    }
}

/// A running installer. Its mechanism (child process, service call) is opaque.
#[async_trait]
pub trait InstallerProcess: Send {
    /// Next event, `None` once the process output is closed
    async fn next_event(&mut self) -> Option<InstallerEvent>;

    async fn send_input(&mut self, input: &str) -> SyncResult<()>;

    async fn kill(&mut self) -> SyncResult<()>;
}

/// Asks the user for a two-factor code; `None` means declined
#[async_trait]
pub trait TwoFactorPrompt: Send + Sync {
    async fn ask_code(&self) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Completed,
    Cancelled,
}

/// Drives an installer process to its end, answering two-factor prompts and
/// republishing its latest event to any number of observers.
pub struct InstallerBridge {
    prompt: Arc<dyn TwoFactorPrompt>,
    events_tx: watch::Sender<Option<InstallerEvent>>,
}

impl InstallerBridge {
    pub fn new(prompt: Arc<dyn TwoFactorPrompt>) -> Self {
        let (events_tx, _) = watch::channel(None);
        Self { prompt, events_tx }
    }

    /// Latest event of the current run, replayed to late observers
    pub fn subscribe(&self) -> watch::Receiver<Option<InstallerEvent>> {
        self.events_tx.subscribe()
    }

    pub async fn run<P: InstallerProcess>(&self, mut process: P, token: CancellationToken) -> SyncResult<InstallOutcome> {
        self.events_tx.send_replace(None);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                event = process.next_event() => Some(event),
            };

            let Some(event) = next else {
                info!("installer: cancelled, killing process");
                process.kill().await?;
                return Ok(InstallOutcome::Cancelled);
            };
            let Some(event) = event else {
                warn!("installer: process exited without a result");
                return Err(SyncError::Installer("process exited without a result".to_string()));
            };
            self.events_tx.send_replace(Some(event.clone()));

            match event {
                InstallerEvent::TwoFactorRequired => {
                    let code = tokio::select! {
                        _ = token.cancelled() => None,
                        code = self.prompt.ask_code() => code,
                    };
                    match code {
                        Some(code) => process.send_input(&code).await?,
                        None => {
                            info!("installer: two-factor prompt declined, killing process");
                            process.kill().await?;
                            return Ok(InstallOutcome::Cancelled);
                        }
                    }
                }
                InstallerEvent::Completed => {
                    info!("installer: completed");
                    return Ok(InstallOutcome::Completed);
                }
                InstallerEvent::Failed(message) => {
                    warn!("installer: failed: {}", message);
                    return Err(SyncError::Installer(message));
                }
                InstallerEvent::Progress(_) | InstallerEvent::Log(_) => {}
            }
        }
    }
}
