//! Session-wide request statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe request counters for the orchestrator.
///
/// # Example
///
/// ```
/// use apiflow::orchestrator::RequestStats;
///
/// let stats = RequestStats::new();
/// stats.record_submitted();
/// stats.record_success();
///
/// let snapshot = stats.snapshot();
/// assert_eq!(snapshot.succeeded, 1);
/// assert_eq!(snapshot.success_rate(), 1.0);
/// ```
#[derive(Debug, Default)]
pub struct RequestStats {
    /// Calls submitted through any entry point
    submitted: AtomicU64,
    /// Calls that resolved with a value
    succeeded: AtomicU64,
    /// Calls that resolved with an error
    failed: AtomicU64,
    /// Calls parked in the request queue
    parked: AtomicU64,
    /// Parked calls replayed by a drain
    replayed: AtomicU64,
    /// Calls answered from the warm cache
    warm_hits: AtomicU64,
    /// Credential refreshes started
    credential_refreshes: AtomicU64,
}

/// Snapshot of request statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RequestStatsSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub parked: u64,
    pub replayed: u64,
    pub warm_hits: u64,
    pub credential_refreshes: u64,
}

impl RequestStatsSnapshot {
    /// Share of settled calls that succeeded (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        let settled = self.succeeded + self.failed;
        if settled == 0 {
            0.0
        } else {
            self.succeeded as f64 / settled as f64
        }
    }
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parked(&self) {
        self.parked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self, count: usize) {
        self.replayed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_warm_hit(&self) {
        self.warm_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credential_refresh(&self) {
        self.credential_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RequestStatsSnapshot {
        RequestStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            credential_refreshes: self.credential_refreshes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = RequestStats::new().snapshot();
        assert_eq!(snapshot, RequestStatsSnapshot::default());
        assert_eq!(snapshot.success_rate(), 0.0);
    }

    #[test]
    fn test_success_rate() {
        let stats = RequestStats::new();
        for _ in 0..3 {
            stats.record_success();
        }
        stats.record_failure();
        assert_eq!(stats.snapshot().success_rate(), 0.75);
    }

    #[test]
    fn test_replayed_counts_batches() {
        let stats = RequestStats::new();
        stats.record_replayed(4);
        stats.record_replayed(2);
        assert_eq!(stats.snapshot().replayed, 6);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = RequestStats::new();
        stats.record_submitted();
        stats.record_warm_hit();

        let value = serde_json::to_value(stats.snapshot()).expect("serialize");
        assert_eq!(value["submitted"], 1);
        assert_eq!(value["warm_hits"], 1);
        assert_eq!(value["failed"], 0);
    }
}
