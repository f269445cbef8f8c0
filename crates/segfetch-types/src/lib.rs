//! Shared types for segfetch
//!
//! This crate contains the data model and event records shared between
//! the download engine and its front-ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Task Types
// ============================================================================

/// A fully resolved download job spanning all segments of one remote file.
///
/// Built by an external collaborator (scheduler, CLI); read-only inside the
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Source URL, already resolved (redirects followed by the task source)
    pub url: String,
    /// Name of the final output file
    pub file_name: String,
    /// Directory where segment files and the merged file are written
    pub destination: PathBuf,
    /// Exact size of the remote file in bytes
    pub total_size: u64,
}

impl DownloadTask {
    pub fn new(url: String, file_name: String, destination: PathBuf, total_size: u64) -> Self {
        Self {
            url,
            file_name,
            destination,
            total_size,
        }
    }

    /// Name of the segment file owned by the worker with the given id.
    pub fn segment_file_name(&self, worker_id: u32) -> String {
        format!("{}-{}", worker_id, self.file_name)
    }
}

/// A contiguous, inclusive byte span of the target file assigned to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Invariant: `start <= end`, checked by the partitioner before
    /// construction.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Size of the range in bytes (bounds are inclusive).
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// Status of a single download worker.
///
/// Transitions are strictly ordered within one worker:
/// `Initialized → Starting → Downloading → {Completed | Error}`, with
/// `Paused` and `Stopped` reachable from `Downloading` at chunk boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Initialized,
    Starting,
    Downloading,
    Paused,
    Stopped,
    Completed,
    Error,
}

impl WorkerStatus {
    /// True once the worker will make no further transitions in this run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Paused
                | WorkerStatus::Stopped
                | WorkerStatus::Completed
                | WorkerStatus::Error
        )
    }
}

/// Task-level status derived from the worker statuses: `Downloading` while
/// any worker is active, `Completed` only when all workers complete, `Error`
/// as soon as any worker errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Downloading,
    Paused,
    Stopped,
    Completed,
    Error,
}

// ============================================================================
// Event Types
// ============================================================================

/// Progress report for a single worker, emitted at most once per progress
/// interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerProgress {
    pub worker_id: u32,
    pub bytes_received: u64,
    pub range_size: u64,
    /// Instantaneous speed in bytes/sec since the download started
    pub speed: u64,
    /// Smoothed throughput statistic, distinct from instantaneous speed
    pub average_speed: u64,
}

impl WorkerProgress {
    pub fn percentage(&self) -> f64 {
        if self.range_size == 0 {
            0.0
        } else {
            (self.bytes_received as f64 / self.range_size as f64) * 100.0
        }
    }
}

/// Completion payload for one worker. Exactly what the external merge
/// collaborator needs to locate and order segment files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerComplete {
    pub worker_id: u32,
    pub file_path: PathBuf,
    pub file_name: String,
    pub destination: PathBuf,
    pub average_speed: u64,
}

/// Events emitted by one worker into the pool's aggregation channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WorkerEvent {
    Progress(WorkerProgress),
    StatusChanged {
        worker_id: u32,
        status: WorkerStatus,
        error: Option<String>,
    },
    Complete(WorkerComplete),
}

/// Aggregated task-level progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub bytes_received: u64,
    pub total_size: u64,
    pub percentage: f64,
    /// Sum of the per-worker instantaneous speeds, bytes/sec
    pub speed: u64,
    /// Sum of the per-worker average speeds, bytes/sec
    pub average_speed: u64,
}

/// Events republished by the pool on the task-level stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TaskEvent {
    Progress(TaskProgress),
    WorkerStatusChanged {
        worker_id: u32,
        status: WorkerStatus,
        error: Option<String>,
    },
    StatusChanged {
        status: TaskStatus,
        error: Option<String>,
    },
    /// All workers completed; parts are ordered by worker id, which is
    /// ordered by byte offset. Concatenating them reconstructs the file.
    Completed { parts: Vec<WorkerComplete> },
}

// ============================================================================
// Snapshot Types
// ============================================================================

/// Published immutable view of one worker, for external readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub worker_id: u32,
    pub status: WorkerStatus,
    pub bytes_received: u64,
    pub range_size: u64,
}

/// Published immutable view of a running task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub workers: Vec<WorkerSnapshot>,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Probe Types
// ============================================================================

/// Information about a link, from probing it with a HEAD request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub url: String,
    pub final_url: Option<String>,
    pub file_name: String,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub resumable: bool,
}
