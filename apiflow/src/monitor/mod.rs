//! Request timing and latency banding.
//!
//! The [`PerformanceMonitor`] timestamps a request when it starts, records
//! optional named marks along the way, and on completion publishes an
//! `api-performance` event carrying the full [`TimingRecord`].
//!
//! ```text
//! start_timing(id) ──► mark(id, "headers") ──► end_timing(id, status)
//!                                                  │
//!                                                  ├──► TimingRecord (returned)
//!                                                  └──► TelemetryEvent::ApiPerformance
//! ```

use crate::request::{EndpointId, RequestId};
use crate::telemetry::{TelemetryEvent, TelemetryHub};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Requests at or above this duration are `slow`.
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(1000);

/// Requests at or above this duration are `very-slow`.
pub const VERY_SLOW_THRESHOLD: Duration = Duration::from_millis(3000);

/// Requests at or above this duration are labelled `timeout`.
pub const TIMEOUT_THRESHOLD: Duration = Duration::from_millis(30_000);

/// Latency band for a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerformanceBand {
    Fast,
    Slow,
    VerySlow,
    Timeout,
}

impl PerformanceBand {
    /// Bands an elapsed duration.
    pub fn from_elapsed(elapsed: Duration) -> Self {
        if elapsed >= TIMEOUT_THRESHOLD {
            Self::Timeout
        } else if elapsed >= VERY_SLOW_THRESHOLD {
            Self::VerySlow
        } else if elapsed >= SLOW_THRESHOLD {
            Self::Slow
        } else {
            Self::Fast
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
            Self::VerySlow => "very-slow",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for PerformanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a timed request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimingStatus {
    Success,
    /// Failed with the given error code.
    Error { code: String },
}

impl TimingStatus {
    pub fn error(code: impl Into<String>) -> Self {
        Self::Error { code: code.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for TimingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error { code } => write!(f, "error:{}", code),
        }
    }
}

/// A named point within a request, relative to its start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingMark {
    pub label: String,
    pub elapsed: Duration,
}

/// Complete timing of one request.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    pub request_id: RequestId,
    pub endpoint: Option<EndpointId>,
    pub start: Instant,
    /// Marks in the order they were recorded.
    pub marks: Vec<TimingMark>,
    pub end: Instant,
    pub duration: Duration,
    pub status: TimingStatus,
    pub performance: PerformanceBand,
}

impl TimingRecord {
    /// Returns the elapsed time recorded under `label`, if any.
    pub fn mark(&self, label: &str) -> Option<Duration> {
        self.marks
            .iter()
            .find(|m| m.label == label)
            .map(|m| m.elapsed)
    }
}

#[derive(Debug)]
struct ActiveTiming {
    endpoint: Option<EndpointId>,
    start: Instant,
    marks: Vec<TimingMark>,
}

/// Tracks in-flight request timings.
///
/// Cloning shares the same set of active timings.
#[derive(Clone)]
pub struct PerformanceMonitor {
    active: Arc<Mutex<HashMap<RequestId, ActiveTiming>>>,
    telemetry: TelemetryHub,
}

impl PerformanceMonitor {
    /// Creates a monitor publishing completion events to `telemetry`.
    pub fn new(telemetry: TelemetryHub) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            telemetry,
        }
    }

    /// Starts timing a request and returns its start instant.
    ///
    /// Starting an ID that is already being timed restarts it.
    pub fn start_timing(&self, request_id: RequestId) -> Instant {
        self.start(request_id, None)
    }

    /// Starts timing a request attributed to `endpoint`.
    pub fn start_timing_for(&self, request_id: RequestId, endpoint: EndpointId) -> Instant {
        self.start(request_id, Some(endpoint))
    }

    fn start(&self, request_id: RequestId, endpoint: Option<EndpointId>) -> Instant {
        let start = Instant::now();
        self.active.lock().insert(
            request_id,
            ActiveTiming {
                endpoint,
                start,
                marks: Vec::new(),
            },
        );
        start
    }

    /// Records the elapsed time under `label`. No-op for unknown IDs.
    pub fn mark(&self, request_id: RequestId, label: impl Into<String>) {
        let mut active = self.active.lock();
        if let Some(timing) = active.get_mut(&request_id) {
            let elapsed = timing.start.elapsed();
            timing.marks.push(TimingMark {
                label: label.into(),
                elapsed,
            });
        }
    }

    /// Finishes timing, publishes the record and forgets the request.
    ///
    /// Returns `None` for IDs that were never started or already ended.
    pub fn end_timing(&self, request_id: RequestId, status: TimingStatus) -> Option<TimingRecord> {
        let timing = self.active.lock().remove(&request_id)?;
        let end = Instant::now();
        let duration = end.duration_since(timing.start);
        let record = TimingRecord {
            request_id,
            endpoint: timing.endpoint,
            start: timing.start,
            marks: timing.marks,
            end,
            duration,
            status,
            performance: PerformanceBand::from_elapsed(duration),
        };

        self.telemetry.emit(TelemetryEvent::ApiPerformance {
            record: record.clone(),
            timestamp: Utc::now(),
        });

        Some(record)
    }

    /// Returns the number of requests currently being timed.
    pub fn in_flight(&self) -> usize {
        self.active.lock().len()
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
