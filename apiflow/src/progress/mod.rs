//! Byte-level progress tracking for long transfers.
//!
//! Each transfer is registered with [`ProgressTracker::start`], updated as
//! bytes arrive, and removed on completion. Every update publishes an
//! `api-progress` event.
//!
//! ```text
//! Transport                 ProgressTracker                 Observers
//!    │ start(id, total)           │                              │
//!    ├───────────────────────────►│ add record (0%)              │
//!    │ update(id, bytes)          │                              │
//!    ├───────────────────────────►│ percent + rate ─────────────►│ api-progress
//!    │ complete(id)               │                              │
//!    ├───────────────────────────►│ remove record                │
//! ```

use crate::request::RequestId;
use crate::telemetry::{TelemetryEvent, TelemetryHub};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Progress of a single transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub bytes_transferred: u64,
    /// Total size, when the transport announced one.
    pub total_bytes: Option<u64>,
    /// Completion percentage (0-100). Zero while the total is unknown.
    pub percentage: f64,
    /// Instantaneous rate in bytes per second, measured since the last update.
    pub bytes_per_sec: f64,
    pub last_update: Instant,
}

impl ProgressRecord {
    fn new(total_bytes: Option<u64>, now: Instant) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
            percentage: 0.0,
            bytes_per_sec: 0.0,
            last_update: now,
        }
    }

    /// Returns true once every announced byte has arrived.
    pub fn is_complete(&self) -> bool {
        matches!(self.total_bytes, Some(total) if self.bytes_transferred >= total)
    }

    fn advance(&mut self, bytes_transferred: u64, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        let delta = bytes_transferred.saturating_sub(self.bytes_transferred);
        // Keep the previous rate when updates land on the same instant
        if elapsed > 0.0 {
            self.bytes_per_sec = delta as f64 / elapsed;
        }

        self.bytes_transferred = bytes_transferred;
        self.percentage = match self.total_bytes {
            Some(0) => 100.0,
            Some(total) => (bytes_transferred as f64 / total as f64 * 100.0).min(100.0),
            None => 0.0,
        };
        self.last_update = now;
    }
}

/// Tracks active transfers.
///
/// Cloning shares the same set of transfers.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    transfers: Arc<RwLock<HashMap<RequestId, ProgressRecord>>>,
    telemetry: TelemetryHub,
}

impl ProgressTracker {
    pub fn new(telemetry: TelemetryHub) -> Self {
        Self {
            transfers: Arc::new(RwLock::new(HashMap::new())),
            telemetry,
        }
    }

    /// Starts tracking a transfer. Restarting an active ID resets it.
    pub fn start(&self, transfer_id: RequestId, total_bytes: Option<u64>) {
        self.transfers
            .write()
            .insert(transfer_id, ProgressRecord::new(total_bytes, Instant::now()));
    }

    /// Records the cumulative byte count for a transfer.
    ///
    /// Returns the updated record, or `None` for unknown transfers.
    pub fn update(&self, transfer_id: RequestId, bytes_transferred: u64) -> Option<ProgressRecord> {
        let record = {
            let mut transfers = self.transfers.write();
            let record = transfers.get_mut(&transfer_id)?;
            record.advance(bytes_transferred, Instant::now());
            record.clone()
        };

        self.telemetry.emit(TelemetryEvent::ApiProgress {
            transfer_id,
            record: record.clone(),
            timestamp: Utc::now(),
        });

        Some(record)
    }

    /// Stops tracking a transfer and returns its final record.
    pub fn complete(&self, transfer_id: RequestId) -> Option<ProgressRecord> {
        self.transfers.write().remove(&transfer_id)
    }

    /// Returns the current record for a transfer.
    pub fn get(&self, transfer_id: RequestId) -> Option<ProgressRecord> {
        self.transfers.read().get(&transfer_id).cloned()
    }

    /// Returns all active transfers ordered by ID.
    pub fn snapshot(&self) -> Vec<(RequestId, ProgressRecord)> {
        let mut entries: Vec<_> = self
            .transfers
            .read()
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn active_count(&self) -> usize {
        self.transfers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RecordingTelemetrySink;
    use std::time::Duration;

    fn tracker() -> (ProgressTracker, Arc<RecordingTelemetrySink>) {
        let hub = TelemetryHub::new();
        let sink = Arc::new(RecordingTelemetrySink::new());
        hub.subscribe(sink.clone());
        (ProgressTracker::new(hub), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_percentage_and_rate() {
        let (tracker, sink) = tracker();
        let id = RequestId::new(1);
        tracker.start(id, Some(1000));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let record = tracker.update(id, 250).expect("record");
        assert_eq!(record.percentage, 25.0);
        assert!((record.bytes_per_sec - 250.0).abs() < 1.0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let record = tracker.update(id, 1000).expect("record");
        assert_eq!(record.percentage, 100.0);
        assert!((record.bytes_per_sec - 375.0).abs() < 1.0);
        assert!(record.is_complete());

        assert_eq!(sink.events_of("api-progress").len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_total() {
        let (tracker, _) = tracker();
        let id = RequestId::new(2);
        tracker.start(id, None);
        let record = tracker.update(id, 4096).expect("record");
        assert_eq!(record.percentage, 0.0);
        assert!(!record.is_complete());
    }

    #[tokio::test]
    async fn test_percentage_clamped() {
        let (tracker, _) = tracker();
        let id = RequestId::new(3);
        tracker.start(id, Some(100));
        assert_eq!(tracker.update(id, 150).expect("record").percentage, 100.0);
    }

    #[tokio::test]
    async fn test_unknown_transfer_is_noop() {
        let (tracker, sink) = tracker();
        assert!(tracker.update(RequestId::new(9), 10).is_none());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_complete_removes() {
        let (tracker, _) = tracker();
        let a = RequestId::new(10);
        let b = RequestId::new(11);
        tracker.start(b, Some(10));
        tracker.start(a, Some(10));
        assert_eq!(tracker.active_count(), 2);
        assert_eq!(
            tracker.snapshot().iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![a, b]
        );

        assert!(tracker.complete(a).is_some());
        assert!(tracker.complete(a).is_none());
        assert!(tracker.get(a).is_none());
        assert_eq!(tracker.active_count(), 1);
    }
}
