//! Download worker - fetches a single byte range into a segment file
//!
//! Each worker owns exactly one range, one sink and one connection; no two
//! workers touch the same file region. Progress, status and completion are
//! reported through the worker's event channel and aggregated by the pool.

use crate::engine::sink::SinkProvider;
use crate::engine::speed::{bytes_per_second, SpeedSampler};
use crate::error::CoreError;
use futures::StreamExt;
use reqwest::{header, Client};
use segfetch_types::{
    ByteRange, DownloadTask, WorkerComplete, WorkerEvent, WorkerProgress, WorkerStatus,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Minimum wall-clock time between two progress emissions of one worker.
/// Progress is never emitted per chunk; this bounds event volume.
pub(crate) const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Downloads one byte range of a task into its own segment file.
pub struct DownloadWorker {
    id: u32,
    task: Arc<DownloadTask>,
    range: ByteRange,
    client: Client,
    sink_provider: Arc<dyn SinkProvider>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    /// Shared with the pool so aggregate byte counts never require touching
    /// worker-internal state.
    bytes_received: Arc<AtomicU64>,
    sampler: SpeedSampler,
    started_at: Instant,
    last_emit: Instant,
    status: WorkerStatus,
}

impl DownloadWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u32,
        task: Arc<DownloadTask>,
        range: ByteRange,
        client: Client,
        sink_provider: Arc<dyn SinkProvider>,
        event_tx: mpsc::UnboundedSender<WorkerEvent>,
        paused: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
        bytes_received: Arc<AtomicU64>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            task,
            range,
            client,
            sink_provider,
            event_tx,
            paused,
            cancelled,
            bytes_received,
            sampler: SpeedSampler::new(),
            started_at: now,
            last_emit: now,
            status: WorkerStatus::Initialized,
        }
    }

    /// Segment file name, `"{id}-{file_name}"`.
    pub fn file_name(&self) -> String {
        self.task.segment_file_name(self.id)
    }

    /// Full path of the segment file.
    pub fn file_path(&self) -> PathBuf {
        self.task.destination.join(self.file_name())
    }

    /// Run the worker to a terminal status.
    ///
    /// All failures are converted into status events plus an `Err` return;
    /// nothing is rethrown past this boundary.
    pub async fn run(mut self) -> Result<(), CoreError> {
        debug!(worker = self.id, file = %self.task.file_name, "download worker starting");
        self.set_status(WorkerStatus::Initialized, None);

        // The sink must be held before the network call is issued.
        let sink = match self
            .sink_provider
            .open(&self.task.destination, &self.file_name(), self.range.size())
        {
            Ok(sink) => sink,
            Err(e) => {
                error!(worker = self.id, error = %e, "failed to open segment sink");
                self.set_status(WorkerStatus::Error, Some(e.to_string()));
                return Err(CoreError::SinkUnavailable { source: e });
            }
        };
        self.set_status(WorkerStatus::Starting, None);

        let result = self.download(sink).await;
        match &result {
            Ok(()) => {}
            Err(CoreError::Cancelled) => {
                info!(worker = self.id, "download worker stopped");
                self.set_status(WorkerStatus::Stopped, None);
            }
            Err(CoreError::Paused) => {
                info!(worker = self.id, "download worker paused");
                self.set_status(WorkerStatus::Paused, None);
            }
            Err(e) => {
                error!(worker = self.id, error = %e, "segment download failed");
                self.set_status(WorkerStatus::Error, Some(e.to_string()));
            }
        }
        result
    }

    /// One GET with a `Range` header, streamed chunk by chunk into the sink.
    /// The sink and the connection are released by drop on every exit path.
    async fn download(
        &mut self,
        mut sink: Box<crate::engine::sink::WritableSink>,
    ) -> Result<(), CoreError> {
        let range_header = format!("bytes={}-{}", self.range.start, self.range.end);
        let response = self
            .client
            .get(&self.task.url)
            .header(header::RANGE, range_header)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::ServerStatus {
                status: status.as_u16(),
            });
        }

        let mut stream = response.bytes_stream();
        self.started_at = Instant::now();
        self.last_emit = self.started_at;
        self.set_status(WorkerStatus::Downloading, None);

        while let Some(chunk) = stream.next().await {
            // Cooperative cancellation, checked at chunk boundaries only
            if self.cancelled.load(Ordering::Acquire) {
                sink.flush().await?;
                return Err(CoreError::Cancelled);
            }
            if self.paused.load(Ordering::Acquire) {
                sink.flush().await?;
                return Err(CoreError::Paused);
            }

            let chunk = chunk?;
            let received = self.bytes_received.load(Ordering::Acquire);
            let remaining = self.range.size() - received;
            if remaining == 0 {
                // Server sent more than the requested range; clamp and stop
                debug!(worker = self.id, "discarding oversized response tail");
                break;
            }
            let take = (chunk.len() as u64).min(remaining) as usize;

            sink.write_all(&chunk[..take]).await?;
            sink.flush().await?;
            self.bytes_received.fetch_add(take as u64, Ordering::AcqRel);

            if self.last_emit.elapsed() >= PROGRESS_INTERVAL {
                self.emit_progress();
            }
        }

        sink.flush().await?;
        let received = self.bytes_received.load(Ordering::Acquire);
        if received < self.range.size() {
            return Err(CoreError::PrematureEnd {
                received,
                expected: self.range.size(),
            });
        }

        // Final progress always reports 100%, strictly before completion
        self.emit_progress();
        self.complete();
        Ok(())
    }

    fn emit_progress(&mut self) {
        let received = self.bytes_received.load(Ordering::Acquire);
        let speed = bytes_per_second(received, self.started_at.elapsed());
        self.sampler.record(speed);
        let _ = self.event_tx.send(WorkerEvent::Progress(WorkerProgress {
            worker_id: self.id,
            bytes_received: received,
            range_size: self.range.size(),
            speed,
            average_speed: self.sampler.average(),
        }));
        self.last_emit = Instant::now();
    }

    fn complete(&mut self) {
        let complete = WorkerComplete {
            worker_id: self.id,
            file_path: self.file_path(),
            file_name: self.file_name(),
            destination: self.task.destination.clone(),
            average_speed: self.sampler.average(),
        };
        self.set_status(WorkerStatus::Completed, None);
        let _ = self.event_tx.send(WorkerEvent::Complete(complete));
        info!(worker = self.id, file = %self.task.file_name, "segment complete");
    }

    fn set_status(&mut self, status: WorkerStatus, error: Option<String>) {
        self.status = status;
        let _ = self.event_tx.send(WorkerEvent::StatusChanged {
            worker_id: self.id,
            status,
            error,
        });
    }
}
