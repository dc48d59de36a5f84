//! # Sync Metrics
//!
//! Cycle counters and timings for the orchestrator, exposed through
//! [`crate::sync::SyncService::metrics`] and the `status` command.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    /// Records accepted by the remote across all cycles
    pub records_pushed: u64,
    /// Records rejected by the remote across all cycles
    pub records_rejected: u64,
    /// Remote records applied locally across all cycles
    pub records_pulled: u64,
    pub average_sync_duration: Duration,
    pub last_sync_duration: Option<Duration>,
    last_sync_start: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sync_start(&mut self) {
        self.last_sync_start = Some(Instant::now());
        self.total_syncs += 1;
    }

    /// Close the cycle. A cycle with rejections still counts as completed.
    pub fn record_sync_success(&mut self, pushed: usize, rejected: usize, pulled: usize) {
        self.records_pushed += pushed as u64;
        self.records_rejected += rejected as u64;
        self.records_pulled += pulled as u64;

        if let Some(start) = self.last_sync_start.take() {
            let duration = start.elapsed();
            self.last_sync_duration = Some(duration);
            self.successful_syncs += 1;

            // rolling average
            let total_duration =
                self.average_sync_duration * (self.successful_syncs - 1) as u32 + duration;
            self.average_sync_duration = total_duration / self.successful_syncs as u32;
        }
    }

    pub fn record_sync_failure(&mut self) {
        if let Some(start) = self.last_sync_start.take() {
            self.last_sync_duration = Some(start.elapsed());
        }
        self.failed_syncs += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            0.0
        } else {
            self.successful_syncs as f64 / self.total_syncs as f64
        }
    }
}
