//! Telemetry for request orchestration.
//!
//! Components emit structured events through a [`TelemetryHub`]; they never
//! know how events are consumed. Consumers register a [`TelemetrySink`] with
//! the hub and receive every event published after registration.
//!
//! # Example
//!
//! ```
//! use apiflow::telemetry::{TelemetryEvent, TelemetryHub, TelemetrySink};
//! use std::sync::Arc;
//!
//! struct LoggingSink;
//!
//! impl TelemetrySink for LoggingSink {
//!     fn emit(&self, event: TelemetryEvent) {
//!         println!("{}", event.event_type());
//!     }
//! }
//!
//! let hub = TelemetryHub::new();
//! let id = hub.subscribe(Arc::new(LoggingSink));
//! hub.unsubscribe(id);
//! ```

use crate::monitor::TimingRecord;
use crate::progress::ProgressRecord;
use crate::request::{EndpointId, RequestId};
use chrono::{DateTime, Utc};
#[cfg(test)]
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Events emitted while orchestrating requests.
#[derive(Clone, Debug)]
pub enum TelemetryEvent {
    /// A timed request completed.
    ApiPerformance {
        record: TimingRecord,
        timestamp: DateTime<Utc>,
    },

    /// A long transfer made progress.
    ApiProgress {
        transfer_id: RequestId,
        record: ProgressRecord,
        timestamp: DateTime<Utc>,
    },

    /// A request was parked in the request queue.
    RequestQueued {
        endpoint: EndpointId,
        queue_depth: usize,
    },

    /// The request queue finished replaying entries.
    QueueDrained { drained: usize },

    /// Speculative fetches were issued for likely next endpoints.
    PrefetchScheduled {
        endpoint: EndpointId,
        candidates: Vec<EndpointId>,
    },

    /// Connectivity or credential state changed.
    ConnectivityChanged { online: bool, refreshing: bool },
}

impl TelemetryEvent {
    /// Returns the event name used by observers.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ApiPerformance { .. } => "api-performance",
            Self::ApiProgress { .. } => "api-progress",
            Self::RequestQueued { .. } => "request-queued",
            Self::QueueDrained { .. } => "queue-drained",
            Self::PrefetchScheduled { .. } => "prefetch-scheduled",
            Self::ConnectivityChanged { .. } => "connectivity-changed",
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Receiver of telemetry events.
///
/// Implementations must be fast and non-blocking; events are delivered on
/// the emitting task.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::ApiPerformance { record, .. } => {
                tracing::debug!(
                    request_id = %record.request_id,
                    endpoint = ?record.endpoint,
                    status = %record.status,
                    performance = %record.performance,
                    duration_ms = record.duration.as_millis(),
                    marks = record.marks.len(),
                    "Request completed"
                );
            }
            TelemetryEvent::ApiProgress {
                transfer_id,
                record,
                ..
            } => {
                tracing::trace!(
                    transfer_id = %transfer_id,
                    bytes = record.bytes_transferred,
                    total = ?record.total_bytes,
                    percent = record.percentage,
                    rate = record.bytes_per_sec,
                    "Transfer progress"
                );
            }
            TelemetryEvent::RequestQueued {
                endpoint,
                queue_depth,
            } => {
                tracing::debug!(
                    endpoint = %endpoint,
                    queue_depth = queue_depth,
                    "Request queued"
                );
            }
            TelemetryEvent::QueueDrained { drained } => {
                tracing::info!(drained = drained, "Request queue drained");
            }
            TelemetryEvent::PrefetchScheduled {
                endpoint,
                candidates,
            } => {
                tracing::debug!(
                    endpoint = %endpoint,
                    candidates = ?candidates,
                    "Prefetch scheduled"
                );
            }
            TelemetryEvent::ConnectivityChanged { online, refreshing } => {
                tracing::info!(
                    online = online,
                    refreshing = refreshing,
                    "Connectivity changed"
                );
            }
        }
    }
}

/// Sink that forwards events into an unbounded channel.
///
/// Useful for async consumers (UI bridges) that must not run on the
/// emitting task.
#[derive(Debug, Clone)]
pub struct ChannelTelemetrySink {
    tx: mpsc::UnboundedSender<TelemetryEvent>,
}

impl ChannelTelemetrySink {
    /// Creates a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

/// Sink that keeps every event in memory, for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

#[cfg(test)]
impl RecordingTelemetrySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn events_of(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

// =============================================================================
// Telemetry Hub
// =============================================================================

/// Handle returned by [`TelemetryHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Publish/subscribe hub owned by the orchestrator.
///
/// Cloning shares the same subscriber list.
#[derive(Clone, Default)]
pub struct TelemetryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    sinks: RwLock<Vec<(SubscriptionId, Arc<dyn TelemetrySink>)>>,
}

impl TelemetryHub {
    /// Creates a hub with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink and returns its subscription handle.
    pub fn subscribe(&self, sink: Arc<dyn TelemetrySink>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.sinks.write().push((id, sink));
        id
    }

    /// Removes a sink. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut sinks = self.inner.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sid, _)| *sid != id);
        sinks.len() != before
    }

    /// Delivers an event to every subscriber.
    ///
    /// Sinks are called outside the registry lock so a sink may subscribe
    /// or unsubscribe while handling an event.
    pub fn emit(&self, event: TelemetryEvent) {
        let sinks: Vec<Arc<dyn TelemetrySink>> = self
            .inner
            .sinks
            .read()
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        if let Some((last, rest)) = sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sinks.read().len()
    }
}

impl fmt::Debug for TelemetryHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink(AtomicUsize);

    impl TelemetrySink for CountingSink {
        fn emit(&self, _event: TelemetryEvent) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn drained(n: usize) -> TelemetryEvent {
        TelemetryEvent::QueueDrained { drained: n }
    }

    #[test]
    fn test_null_and_tracing_sinks() {
        NullTelemetrySink.emit(drained(1));
        TracingTelemetrySink.emit(drained(1));
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(drained(0).event_type(), "queue-drained");
        assert_eq!(
            TelemetryEvent::ConnectivityChanged {
                online: true,
                refreshing: false
            }
            .event_type(),
            "connectivity-changed"
        );
    }

    #[test]
    fn test_hub_fan_out() {
        let hub = TelemetryHub::new();
        let a = Arc::new(CountingSink(AtomicUsize::new(0)));
        let b = Arc::new(CountingSink(AtomicUsize::new(0)));
        hub.subscribe(a.clone());
        hub.subscribe(b.clone());

        hub.emit(drained(1));
        hub.emit(drained(2));

        assert_eq!(a.0.load(Ordering::Relaxed), 2);
        assert_eq!(b.0.load(Ordering::Relaxed), 2);
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = TelemetryHub::new();
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let id = hub.subscribe(sink.clone());

        hub.emit(drained(1));
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        hub.emit(drained(1));

        assert_eq!(sink.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        TelemetryHub::new().emit(drained(0));
    }

    #[test]
    fn test_clones_share_subscribers() {
        let hub = TelemetryHub::new();
        let clone = hub.clone();
        let sink = Arc::new(RecordingTelemetrySink::new());
        clone.subscribe(sink.clone());

        hub.emit(drained(3));
        assert_eq!(sink.events_of("queue-drained").len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (sink, mut rx) = ChannelTelemetrySink::new();
        let hub = TelemetryHub::new();
        hub.subscribe(Arc::new(sink));

        hub.emit(drained(4));
        let event = rx.recv().await.expect("event");
        assert!(matches!(event, TelemetryEvent::QueueDrained { drained: 4 }));
    }
}
