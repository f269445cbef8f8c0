//! Error types for the segfetch engine

use thiserror::Error;

/// Errors that can occur in the download engine
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Destination sink unavailable: {source}")]
    SinkUnavailable {
        #[source]
        source: std::io::Error,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server returned status {status}")]
    ServerStatus { status: u16 },

    #[error("Stream ended after {received} of {expected} bytes")]
    PrematureEnd { received: u64, expected: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Download was paused")]
    Paused,

    #[error("Worker {worker_id} failed: {cause}")]
    TaskFailed { worker_id: u32, cause: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl CoreError {
    /// Whether the external scheduler could reasonably retry this failure.
    /// The engine itself never retries; a fresh range can be recomputed from
    /// the received byte counts and started again.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Network(_) | CoreError::PrematureEnd { .. } => true,
            CoreError::ServerStatus { status } => *status >= 500,
            _ => false,
        }
    }
}
