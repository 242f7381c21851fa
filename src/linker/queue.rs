//! Per-folder serial lanes of link/unlink jobs

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::{oneshot, watch, Mutex};

use super::primitive::LinkPrimitive;
use super::types::{LinkAction, LinkEntry, LinkOutcome, LinkState, ResourceKey};
use crate::config::LinkOptions;
use crate::error::{SyncError, SyncResult};

type Waiter = oneshot::Sender<SyncResult<LinkOutcome>>;

struct Job {
    entry: LinkEntry,
    target: PathBuf,
    waiters: Vec<Waiter>,
}

struct Lane {
    /// Front job is the only one that may be processing
    jobs: VecDeque<Job>,
    running: bool,
    /// Last state reached by a finished job, or the initial link check
    settled: LinkState,
    state_tx: watch::Sender<LinkState>,
}

impl Lane {
    fn new(initial: LinkState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        Self {
            jobs: VecDeque::new(),
            running: false,
            settled: initial,
            state_tx,
        }
    }

    /// Nothing queued, nobody watching, and the settled state can be
    /// recomputed from the primitive
    fn is_idle(&self) -> bool {
        !self.running
            && self.jobs.is_empty()
            && self.state_tx.receiver_count() == 0
            && self.settled != LinkState::Error
    }
}

/// Drop idle lanes other than `keep`
fn prune_idle(lanes: &mut HashMap<ResourceKey, Lane>, keep: &ResourceKey) {
    lanes.retain(|key, lane| key == keep || !lane.is_idle());
}

struct Shared {
    primitive: Arc<dyn LinkPrimitive>,
    shared_root: PathBuf,
    lanes: Mutex<HashMap<ResourceKey, Lane>>,
    queue_tx: watch::Sender<Vec<LinkEntry>>,
    next_id: AtomicU64,
}

impl Shared {
    fn publish_queue(&self, lanes: &HashMap<ResourceKey, Lane>) {
        let mut entries: Vec<LinkEntry> = lanes
            .values()
            .flat_map(|lane| lane.jobs.iter().map(|job| job.entry.clone()))
            .collect();
        entries.sort_by_key(|entry| entry.id);
        self.queue_tx.send_replace(entries);
    }
}

/// Serializes link and unlink operations per resource key.
///
/// Different keys run concurrently; jobs of one key run strictly one after
/// the other. Cheap to clone, every clone drives the same lanes.
#[derive(Clone)]
pub struct LinkQueue {
    shared: Arc<Shared>,
}

impl LinkQueue {
    pub fn new(primitive: Arc<dyn LinkPrimitive>, shared_root: impl Into<PathBuf>) -> Self {
        let (queue_tx, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                primitive,
                shared_root: shared_root.into(),
                lanes: Mutex::new(HashMap::new()),
                queue_tx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared.shared_root
    }

    pub fn primitive(&self) -> Arc<dyn LinkPrimitive> {
        Arc::clone(&self.shared.primitive)
    }

    /// Shared folder `key` is linked to
    pub fn target_of(&self, key: &ResourceKey, options: &LinkOptions) -> SyncResult<PathBuf> {
        let name = key.folder_name().ok_or_else(|| SyncError::InvalidFolder {
            folder: key.to_string(),
            reason: "path has no folder name".to_string(),
        })?;
        let mut target = self.shared.shared_root.clone();
        if let Some(intermediate) = options.intermediate_folder.as_deref() {
            target.extend(crate::version::relative_parts(intermediate)?);
        }
        target.push(name);
        Ok(target)
    }

    pub async fn link_folder(&self, key: ResourceKey, options: LinkOptions) -> SyncResult<LinkOutcome> {
        self.request(key, LinkAction::Link, options).await
    }

    pub async fn unlink_folder(&self, key: ResourceKey, options: LinkOptions) -> SyncResult<LinkOutcome> {
        self.request(key, LinkAction::Unlink, options).await
    }

    pub async fn is_folder_linked(&self, key: &ResourceKey) -> bool {
        self.shared.primitive.is_link(key.as_path()).await
    }

    /// Drop every job of `key` that has not started yet. A processing job
    /// is left alone and runs to completion.
    pub async fn cancel_action(&self, key: &ResourceKey) {
        let mut lanes = self.shared.lanes.lock().await;
        let Some(lane) = lanes.get_mut(key) else {
            return;
        };

        let (kept, cancelled): (VecDeque<Job>, VecDeque<Job>) = lane
            .jobs
            .drain(..)
            .partition(|job| job.entry.state == LinkState::Processing);
        lane.jobs = kept;

        if cancelled.is_empty() {
            debug!("cancel_action: nothing pending for {}", key);
            return;
        }

        for job in cancelled {
            info!("link_status: {} {} -> cancelled", job.entry.action, key);
            for waiter in job.waiters {
                let _ = waiter.send(Ok(LinkOutcome::Cancelled));
            }
        }
        if lane.jobs.is_empty() {
            lane.state_tx.send_replace(lane.settled);
        }
        self.shared.publish_queue(&lanes);
    }

    /// State of `key`, following every transition from now on
    pub async fn state(&self, key: &ResourceKey) -> watch::Receiver<LinkState> {
        let initial = self.initial_state(key).await;
        let mut lanes = self.shared.lanes.lock().await;
        prune_idle(&mut lanes, key);
        lanes
            .entry(key.clone())
            .or_insert_with(|| Lane::new(initial))
            .state_tx
            .subscribe()
    }

    /// Every non-terminal entry, republished after each transition
    pub fn subscribe_queue(&self) -> watch::Receiver<Vec<LinkEntry>> {
        self.shared.queue_tx.subscribe()
    }

    pub fn entries(&self) -> Vec<LinkEntry> {
        self.shared.queue_tx.borrow().clone()
    }

    /// Keys currently holding a lane
    pub async fn lane_count(&self) -> usize {
        self.shared.lanes.lock().await.len()
    }

    /// Link check used when `key` gets a fresh lane
    async fn initial_state(&self, key: &ResourceKey) -> LinkState {
        if self.shared.primitive.is_link(key.as_path()).await {
            LinkState::Linked
        } else {
            LinkState::Unlinked
        }
    }

    async fn request(&self, key: ResourceKey, action: LinkAction, options: LinkOptions) -> SyncResult<LinkOutcome> {
        let target = self.target_of(&key, &options)?;
        let initial = self.initial_state(&key).await;
        let (tx, rx) = oneshot::channel();

        {
            let mut lanes = self.shared.lanes.lock().await;
            prune_idle(&mut lanes, &key);
            let lane = lanes
                .entry(key.clone())
                .or_insert_with(|| Lane::new(initial));

            if let Some(last) = lane.jobs.back_mut().filter(|job| job.entry.action == action) {
                debug!("{} {} already {}, joining", action, key, last.entry.state);
                last.waiters.push(tx);
            } else {
                let entry = LinkEntry {
                    id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
                    key: key.clone(),
                    action,
                    state: LinkState::Pending,
                    options,
                    requested_at: chrono::Utc::now().timestamp_millis(),
                };
                info!("link_status: {} {} -> pending", action, key);
                if lane.jobs.is_empty() {
                    lane.state_tx.send_replace(LinkState::Pending);
                }
                lane.jobs.push_back(Job {
                    entry,
                    target,
                    waiters: vec![tx],
                });
                if !lane.running {
                    lane.running = true;
                    tokio::spawn(run_lane(Arc::clone(&self.shared), key.clone()));
                }
                self.shared.publish_queue(&lanes);
            }
        }

        // A dropped waiter only happens when the lane task is torn down with the runtime
        rx.await.unwrap_or(Ok(LinkOutcome::Cancelled))
    }
}

async fn run_lane(shared: Arc<Shared>, key: ResourceKey) {
    loop {
        let (action, target, keep_contents) = {
            let mut lanes = shared.lanes.lock().await;
            let Some(lane) = lanes.get_mut(&key) else {
                return;
            };
            let Some(job) = lane.jobs.front_mut() else {
                lane.running = false;
                if lane.is_idle() {
                    debug!("dropping idle lane {}", key);
                    lanes.remove(&key);
                }
                return;
            };
            job.entry.state = LinkState::Processing;
            let next = (job.entry.action, job.target.clone(), job.entry.options.keep_contents);
            lane.state_tx.send_replace(LinkState::Processing);
            info!("link_status: {} {} -> processing", next.0, key);
            shared.publish_queue(&lanes);
            next
        };

        let result = match action {
            LinkAction::Link => shared.primitive.create_link(&target, key.as_path(), keep_contents).await,
            LinkAction::Unlink => shared.primitive.remove_link(&target, key.as_path(), keep_contents).await,
        };

        let mut lanes = shared.lanes.lock().await;
        let Some(lane) = lanes.get_mut(&key) else {
            return;
        };
        let (state, outcome) = match result {
            Ok(()) => {
                let state = action.settled_state();
                (state, Ok(LinkOutcome::Completed(state)))
            }
            Err(err) => {
                warn!("failed to {} {}: {}", action, key, err);
                let err = SyncError::Link {
                    action: action.verb(),
                    path: key.as_path().to_path_buf(),
                    message: err.to_string(),
                };
                (LinkState::Error, Err(err))
            }
        };
        info!("link_status: {} {} -> {}", action, key, state);

        lane.settled = state;
        lane.state_tx.send_replace(state);
        if let Some(job) = lane.jobs.pop_front() {
            for waiter in job.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }

        let drained = lane.jobs.is_empty();
        if drained {
            lane.running = false;
            if lane.is_idle() {
                debug!("dropping idle lane {}", key);
                lanes.remove(&key);
            }
        }
        shared.publish_queue(&lanes);
        if drained {
            return;
        }
    }
}
