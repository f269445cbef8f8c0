//! Download Engine
//!
//! Segmented, multi-worker HTTP range downloading:
//! - deterministic byte-range partitioning, remainder on the last range
//! - one long-lived worker per range with its own sink and connection
//! - per-worker and aggregated progress/speed on a 500 ms cadence
//! - cooperative pause/cancel at chunk boundaries
//! - completion payloads ordered for the external merge step

mod manager;
mod partition;
mod pool;
mod sink;
mod speed;
mod worker;

pub use manager::*;
pub use partition::*;
pub use pool::*;
pub use sink::*;
pub use speed::*;
pub use worker::*;
