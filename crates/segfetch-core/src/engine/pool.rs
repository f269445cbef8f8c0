//! Download worker pool - owns the full set of workers for one task
//!
//! The pool partitions the task into byte ranges, spawns one worker per
//! range and multiplexes their event channels into a task-level stream.
//! It is the single coordination point between the network-facing workers
//! and everything outside the engine.

use crate::engine::partition::partition;
use crate::engine::sink::{FsSinkProvider, SinkProvider};
use crate::engine::worker::DownloadWorker;
use crate::error::CoreError;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use segfetch_types::{
    DownloadTask, TaskEvent, TaskProgress, TaskSnapshot, TaskStatus, WorkerComplete, WorkerEvent,
    WorkerSnapshot, WorkerStatus,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Cadence of aggregated progress publications. Worker events arriving
/// between ticks are coalesced into the next tick's publication.
const AGGREGATE_INTERVAL: Duration = Duration::from_millis(500);

/// What happens to healthy workers when a sibling in the same task errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiblingPolicy {
    /// Let siblings finish; their segment files are retained so the caller
    /// can resume the failed range and still merge.
    #[default]
    ContinueSiblings,
    /// Cancel all remaining workers as soon as one errors.
    CancelSiblings,
}

/// Options for starting a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartOptions {
    /// Number of parallel segments, at least 1
    pub segment_count: u32,
    pub on_worker_error: SiblingPolicy,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            segment_count: 4,
            on_worker_error: SiblingPolicy::default(),
        }
    }
}

/// Creates and coordinates the workers of one download task.
pub struct DownloadWorkerPool {
    client: Client,
    sink_provider: Arc<dyn SinkProvider>,
}

impl DownloadWorkerPool {
    pub fn new(client: Client) -> Self {
        Self::with_sink_provider(client, Arc::new(FsSinkProvider))
    }

    pub fn with_sink_provider(client: Client, sink_provider: Arc<dyn SinkProvider>) -> Self {
        Self {
            client,
            sink_provider,
        }
    }

    /// Partition the task and start all workers concurrently.
    ///
    /// Returns immediately with a handle exposing the task-level event
    /// stream, a published snapshot and pause/cancel controls. Fails with
    /// `InvalidConfiguration` before anything is started if the segment
    /// count or total size is unusable.
    pub fn start(&self, task: DownloadTask, options: StartOptions) -> Result<TaskHandle, CoreError> {
        let ranges = partition(task.total_size, options.segment_count)?;
        info!(
            file = %task.file_name,
            segments = ranges.len(),
            total_size = task.total_size,
            "starting download task"
        );

        let task = Arc::new(task);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (task_tx, _) = broadcast::channel(256);
        let paused = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(ranges.len());
        for (id, range) in ranges.into_iter().enumerate() {
            let id = id as u32;
            let bytes_received = Arc::new(AtomicU64::new(0));
            workers.push(WorkerState::new(id, range.size(), bytes_received.clone()));

            let worker = DownloadWorker::new(
                id,
                task.clone(),
                range,
                self.client.clone(),
                self.sink_provider.clone(),
                event_tx.clone(),
                paused.clone(),
                cancelled.clone(),
                bytes_received,
            );
            // One long-lived task per worker; it blocks on network I/O for
            // the whole download. Failures surface through the event channel.
            tokio::spawn(async move {
                let _ = worker.run().await;
            });
        }
        // The aggregator's recv() yields None once every worker has dropped
        // its sender clone.
        drop(event_tx);

        let snapshot = Arc::new(RwLock::new(TaskSnapshot {
            status: TaskStatus::Downloading,
            progress: aggregate(&workers, task.total_size),
            workers: workers.iter().map(WorkerState::snapshot).collect(),
            started_at: Utc::now(),
        }));

        let aggregator = Aggregator {
            rx: event_rx,
            task_tx: task_tx.clone(),
            workers,
            total_size: task.total_size,
            policy: options.on_worker_error,
            cancelled: cancelled.clone(),
            snapshot: snapshot.clone(),
        };

        let finished = Arc::new(AtomicBool::new(false));
        let finished_flag = finished.clone();
        let join = tokio::spawn(async move {
            let result = aggregator.run().await;
            finished_flag.store(true, Ordering::Release);
            result
        });

        Ok(TaskHandle {
            events: task_tx,
            snapshot,
            paused,
            cancelled,
            finished,
            join,
        })
    }
}

/// Handle to a running task, for inspection and cancellation.
pub struct TaskHandle {
    events: broadcast::Sender<TaskEvent>,
    snapshot: Arc<RwLock<TaskSnapshot>>,
    pub(crate) paused: Arc<AtomicBool>,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) finished: Arc<AtomicBool>,
    join: JoinHandle<Result<Vec<WorkerComplete>, CoreError>>,
}

impl TaskHandle {
    /// Subscribe to the task-level event stream.
    ///
    /// The stream carries transitions only; read the initial state from
    /// [`snapshot`](Self::snapshot) after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Published immutable snapshot of the current task state, including
    /// per-worker statuses.
    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshot.read().clone()
    }

    /// Signal all workers to pause at the next chunk boundary. Resuming is
    /// the caller's responsibility: recompute ranges from the snapshot's
    /// received byte counts and start a fresh task.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Signal all workers to stop at the next chunk boundary. Connections
    /// and sinks are released as each worker unwinds.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Wait for the task to reach a terminal state. On completion, returns
    /// the completion payloads ordered by worker id (byte offset order), the
    /// merge collaborator's expected input.
    pub async fn wait(self) -> Result<Vec<WorkerComplete>, CoreError> {
        self.join
            .await
            .map_err(|e| CoreError::Unknown(format!("aggregator task panicked: {e}")))?
    }
}

/// Aggregation-side view of one worker, updated only from the
/// event-consumption path.
struct WorkerState {
    id: u32,
    status: WorkerStatus,
    bytes_received: Arc<AtomicU64>,
    range_size: u64,
    speed: u64,
    average_speed: u64,
    complete: Option<WorkerComplete>,
    error: Option<String>,
}

impl WorkerState {
    fn new(id: u32, range_size: u64, bytes_received: Arc<AtomicU64>) -> Self {
        Self {
            id,
            status: WorkerStatus::Initialized,
            bytes_received,
            range_size,
            speed: 0,
            average_speed: 0,
            complete: None,
            error: None,
        }
    }

    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.id,
            status: self.status,
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            range_size: self.range_size,
        }
    }
}

/// Task-level progress derived from the worker states.
fn aggregate(workers: &[WorkerState], total_size: u64) -> TaskProgress {
    let bytes_received: u64 = workers
        .iter()
        .map(|w| w.bytes_received.load(Ordering::Acquire))
        .sum();
    let percentage = if total_size == 0 {
        0.0
    } else {
        (bytes_received as f64 / total_size as f64) * 100.0
    };
    TaskProgress {
        bytes_received,
        total_size,
        percentage,
        speed: workers.iter().map(|w| w.speed).sum(),
        average_speed: workers.iter().map(|w| w.average_speed).sum(),
    }
}

/// Consumes all worker event channels and republishes task-level events.
struct Aggregator {
    rx: mpsc::UnboundedReceiver<WorkerEvent>,
    task_tx: broadcast::Sender<TaskEvent>,
    workers: Vec<WorkerState>,
    total_size: u64,
    policy: SiblingPolicy,
    cancelled: Arc<AtomicBool>,
    snapshot: Arc<RwLock<TaskSnapshot>>,
}

impl Aggregator {
    async fn run(mut self) -> Result<Vec<WorkerComplete>, CoreError> {
        let mut tick = tokio::time::interval(AGGREGATE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The initial Downloading status is not broadcast: subscribers only
        // exist after `start()` returns, so an eager event would be dropped
        // unseen. The published snapshot carries the initial status instead;
        // the stream only carries transitions away from it.
        let mut task_status = TaskStatus::Downloading;
        let mut dirty = false;

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => {
                            dirty |= self.consume(event, &mut task_status);
                        }
                        // All worker senders dropped; every worker is done.
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    if dirty {
                        self.publish_progress();
                        dirty = false;
                    }
                }
            }
        }

        self.finish(task_status)
    }

    /// Apply one worker event. Returns true when the aggregate progress
    /// changed and should be published on the next tick.
    fn consume(&mut self, event: WorkerEvent, task_status: &mut TaskStatus) -> bool {
        match event {
            WorkerEvent::Progress(progress) => {
                let state = &mut self.workers[progress.worker_id as usize];
                state.speed = progress.speed;
                state.average_speed = progress.average_speed;
                true
            }
            WorkerEvent::StatusChanged {
                worker_id,
                status,
                error,
            } => {
                let state = &mut self.workers[worker_id as usize];
                state.status = status;
                if error.is_some() {
                    state.error = error.clone();
                }
                // Status transitions are republished immediately, not
                // coalesced like progress.
                let _ = self.task_tx.send(TaskEvent::WorkerStatusChanged {
                    worker_id,
                    status,
                    error: error.clone(),
                });
                self.update_snapshot(*task_status);

                if status == WorkerStatus::Error && *task_status != TaskStatus::Error {
                    // A single failed segment fails the whole task
                    *task_status = TaskStatus::Error;
                    self.publish_status(TaskStatus::Error, error);
                    if self.policy == SiblingPolicy::CancelSiblings {
                        warn!(worker = worker_id, "worker failed, cancelling siblings");
                        self.cancelled.store(true, Ordering::Release);
                    }
                }
                false
            }
            WorkerEvent::Complete(complete) => {
                let state = &mut self.workers[complete.worker_id as usize];
                state.speed = 0;
                state.complete = Some(complete);
                true
            }
        }
    }

    fn finish(mut self, task_status: TaskStatus) -> Result<Vec<WorkerComplete>, CoreError> {
        if self
            .workers
            .iter()
            .all(|w| w.status == WorkerStatus::Completed)
        {
            // Consumers always observe 100% before "done"
            self.publish_progress();
            self.publish_status(TaskStatus::Completed, None);
            // Ordered by worker id; workers were created in offset order
            let parts: Vec<WorkerComplete> = self
                .workers
                .iter_mut()
                .map(|w| w.complete.take().expect("completed worker has payload"))
                .collect();
            let _ = self.task_tx.send(TaskEvent::Completed {
                parts: parts.clone(),
            });
            info!(segments = parts.len(), "download task complete");
            return Ok(parts);
        }

        if task_status == TaskStatus::Error {
            let failed = self
                .workers
                .iter()
                .find(|w| w.status == WorkerStatus::Error)
                .expect("error status implies a failed worker");
            return Err(CoreError::TaskFailed {
                worker_id: failed.id,
                cause: failed
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown cause".into()),
            });
        }

        if self.workers.iter().any(|w| w.status == WorkerStatus::Stopped) {
            self.publish_status(TaskStatus::Stopped, None);
            return Err(CoreError::Cancelled);
        }
        if self.workers.iter().any(|w| w.status == WorkerStatus::Paused) {
            self.publish_status(TaskStatus::Paused, None);
            return Err(CoreError::Paused);
        }

        // A worker exited without reaching a terminal status (panic)
        let stuck = self
            .workers
            .iter()
            .find(|w| !w.status.is_terminal())
            .map(|w| w.id)
            .unwrap_or(0);
        self.publish_status(TaskStatus::Error, None);
        Err(CoreError::TaskFailed {
            worker_id: stuck,
            cause: "worker exited without reaching a terminal status".into(),
        })
    }

    fn publish_progress(&self) {
        let progress = aggregate(&self.workers, self.total_size);
        let status = self.snapshot.read().status;
        self.update_snapshot(status);
        let _ = self.task_tx.send(TaskEvent::Progress(progress));
    }

    fn publish_status(&self, status: TaskStatus, error: Option<String>) {
        self.update_snapshot(status);
        let _ = self.task_tx.send(TaskEvent::StatusChanged { status, error });
    }

    fn update_snapshot(&self, status: TaskStatus) {
        let mut snapshot = self.snapshot.write();
        snapshot.status = status;
        snapshot.progress = aggregate(&self.workers, self.total_size);
        snapshot.workers = self.workers.iter().map(WorkerState::snapshot).collect();
    }
}
