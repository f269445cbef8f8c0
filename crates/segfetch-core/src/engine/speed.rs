//! Throughput statistics
//!
//! Instantaneous speed plus the incremental average the progress events
//! carry. The average is a running mean maintained incrementally:
//! `average * (count - 1) / count + sample / count` after bumping the
//! sample count. Every division truncates, so the result drifts below the
//! exact mean; that is acceptable for a human-facing speed figure.

use std::time::Duration;

/// Instantaneous speed in whole bytes per second. Reports 0 before any time
/// has elapsed.
pub fn bytes_per_second(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0
    } else {
        (bytes as f64 / secs) as u64
    }
}

/// Rolling average over a stream of speed samples, using integer semantics.
#[derive(Debug, Default, Clone)]
pub struct SpeedSampler {
    count: u64,
    average: u64,
}

impl SpeedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one speed sample into the average.
    pub fn record(&mut self, sample: u64) {
        if self.count == 0 {
            self.average = sample;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.average = self.average * (self.count - 1) / self.count + sample / self.count;
    }

    pub fn average(&self) -> u64 {
        self.average
    }
}
