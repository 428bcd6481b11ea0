//! Batch metrics and performance timing
//!
//! Counters and histograms go through the `metrics` facade; without an
//! installed recorder (the `metrics` feature off, or in tests) they are no-ops.

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

use super::algorithm::Algorithm;
use super::model::BatchStatus;

pub const BATCHES_TOTAL: &str = "recommendation_batches_total";
pub const BATCH_DURATION_SECONDS: &str = "recommendation_batch_duration_seconds";
pub const ITEMS_WRITTEN: &str = "recommendation_items_written";

/// Slow-phase threshold used by the orchestrator
pub const SLOW_PHASE_MS: u64 = 5_000;

/// Record the outcome of one batch run
pub fn record_batch(algorithm: Algorithm, status: BatchStatus, elapsed: Duration, items: usize) {
    counter!(
        BATCHES_TOTAL,
        "algorithm" => algorithm.as_str(),
        "status" => status.as_str()
    )
    .increment(1);

    histogram!(BATCH_DURATION_SECONDS, "algorithm" => algorithm.as_str())
        .record(elapsed.as_secs_f64());

    if status == BatchStatus::Success {
        counter!(ITEMS_WRITTEN, "algorithm" => algorithm.as_str()).increment(items as u64);
    }
}

/// Performance timer for tracking operation duration
pub struct PerformanceTimer {
    start: Instant,
    label: String,
}

impl PerformanceTimer {
    pub fn new(label: &str) -> Self {
        Self {
            start: Instant::now(),
            label: label.to_string(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn log_if_slow(&self, threshold_ms: u64) {
        let elapsed = self.elapsed_ms();
        if elapsed > threshold_ms {
            tracing::warn!(
                "⚠️ Slow operation: {} took {}ms (threshold: {}ms)",
                self.label,
                elapsed,
                threshold_ms
            );
        }
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.elapsed_ms();
        tracing::debug!("⏱️ {} completed in {}ms", self.label, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_measures_elapsed() {
        let timer = PerformanceTimer::new("test");
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
        timer.log_if_slow(0);
    }

    #[test]
    fn test_record_batch_without_recorder() {
        record_batch(
            Algorithm::Hybrid,
            BatchStatus::Failed,
            Duration::from_millis(12),
            0,
        );
    }
}
