//! segfetch core - segmented download engine
//!
//! Given a fully resolved [`DownloadTask`](segfetch_types::DownloadTask) and
//! a segment count, the engine partitions the file into byte ranges,
//! downloads each range through an independent worker and reports progress
//! and per-segment completion so an external collaborator can merge the
//! segment files into the final output.
//!
//! What this crate deliberately does not do: decide what to download, persist
//! task metadata, retry failed ranges, or perform the byte-level merge. Those
//! belong to the surrounding application.

mod error;
pub mod engine;

pub use engine::{
    bytes_per_second, partition, DownloadEngine, DownloadWorker, DownloadWorkerPool,
    FsSinkProvider, SiblingPolicy, SinkProvider, SpeedSampler, StartOptions, TaskHandle,
    WritableSink,
};
pub use error::CoreError;

pub use segfetch_types as types;
