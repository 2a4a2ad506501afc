//! Pipeline counters and the end-of-run statistics report.

// Layer 1: Standard library imports
use std::time::Instant;

// Layer 2: Third-party crate imports
use tracing::info;

/// Counters kept by the controller across one run.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Messages yielded by the source.
    pub received: u64,
    /// Messages whose send token resolved as accepted.
    pub sent: u64,
    /// Messages dropped by the transform (including transform failures).
    pub dropped: u64,
    /// Tags acknowledged back to the source.
    pub acked: u64,
    /// Body bytes received.
    pub bytes_received: u64,
    started_at: Instant,
}

impl PipelineStats {
    /// Fresh counters; the clock starts now.
    pub fn new() -> Self {
        Self {
            received: 0,
            sent: 0,
            dropped: 0,
            acked: 0,
            bytes_received: 0,
            started_at: Instant::now(),
        }
    }

    /// Wall-clock time since the counters started.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Emit the statistics report.
    pub fn report(&self) {
        let elapsed = self.elapsed();
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
        let rate = format!("{:.1}/s", self.acked as f64 / seconds);
        info!(
            received = self.received,
            sent = self.sent,
            dropped = self.dropped,
            acked = self.acked,
            bytes = self.bytes_received,
            elapsed_s = elapsed.as_secs_f64(),
            rate = %rate,
            "transfer statistics"
        );
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}
