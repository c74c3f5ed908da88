//! Speculative prefetching from observed endpoint sequences.
//!
//! # Architecture
//!
//! ```text
//! completed call ──► track(endpoint, params)
//!                         │
//!                         ▼
//!                 PredictionModel
//!                  ├─ bounded AccessRecord history (default 100)
//!                  └─ predecessor → [successor, probability, count]
//!                         │
//! prefetch(endpoint) ─────┘  top `limit` rows with probability > threshold
//!                         │
//!                         ▼
//!                  PrefetchCache::prefetch (spawned, best-effort)
//!                         │
//!                         ▼
//!                    WarmCache ◄── later real request takes the result
//! ```
//!
//! Speculative calls never report back to a caller. Failures are logged and
//! counted, nothing more.

mod cache;
mod config;
mod history;

pub use cache::{NoOpPrefetchCache, PrefetchCache, PrefetchOptions, PrefetchRequest, WarmCache};
pub use config::PrefetchConfig;
pub use history::{AccessRecord, Prediction, PredictionModel};

use crate::error::ApiError;
use crate::request::{ApiResponse, EndpointId, OperationFuture, Params};
use crate::telemetry::{TelemetryEvent, TelemetryHub};
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds the call for a predicted endpoint and its params.
pub type Fetcher = Arc<dyn Fn(&EndpointId, &Params) -> OperationFuture<ApiResponse> + Send + Sync>;

/// Wraps an async closure as a [`Fetcher`].
pub fn fetcher<F, Fut>(f: F) -> Fetcher
where
    F: Fn(&EndpointId, &Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ApiResponse, ApiError>> + Send + 'static,
{
    Arc::new(move |endpoint: &EndpointId, params: &Params| f(endpoint, params).boxed())
}

/// Counters for prefetch activity.
#[derive(Debug, Default)]
pub struct PrefetchStats {
    /// Calls recorded in the history.
    pub tracked: AtomicU64,
    /// Speculative fetches handed to the cache.
    pub scheduled: AtomicU64,
    /// Cache warm-ups that reported a failure.
    pub failed: AtomicU64,
}

impl PrefetchStats {
    pub fn snapshot(&self) -> PrefetchStatsSnapshot {
        PrefetchStatsSnapshot {
            tracked: self.tracked.load(Ordering::Relaxed),
            scheduled: self.scheduled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of prefetch statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStatsSnapshot {
    pub tracked: u64,
    pub scheduled: u64,
    pub failed: u64,
}

struct PrefetcherInner {
    config: PrefetchConfig,
    model: Mutex<PredictionModel>,
    cache: Arc<dyn PrefetchCache>,
    telemetry: TelemetryHub,
    stats: PrefetchStats,
}

/// Learns endpoint sequences and warms the cache for likely next calls.
///
/// Cloning shares the same history and cache.
#[derive(Clone)]
pub struct Prefetcher {
    inner: Arc<PrefetcherInner>,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig, cache: Arc<dyn PrefetchCache>, telemetry: TelemetryHub) -> Self {
        Self {
            inner: Arc::new(PrefetcherInner {
                model: Mutex::new(PredictionModel::new(config.max_history)),
                config,
                cache,
                telemetry,
                stats: PrefetchStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.inner.config
    }

    /// Records an observed call.
    pub fn track(&self, endpoint: EndpointId, params: Params) {
        self.inner
            .model
            .lock()
            .track(AccessRecord::new(endpoint, params));
        self.inner.stats.tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the predictions for calls following `endpoint`.
    pub fn predictions(&self, endpoint: &EndpointId) -> Vec<Prediction> {
        self.inner.model.lock().predictions(endpoint).to_vec()
    }

    /// Speculatively fetches up to `limit` likely successors of `endpoint`.
    ///
    /// Returns immediately with the endpoints scheduled. The fetches run in
    /// a background task; their results only land in the cache.
    pub fn prefetch(&self, endpoint: &EndpointId, fetcher: &Fetcher, limit: usize) -> Vec<EndpointId> {
        if !self.inner.config.enabled || limit == 0 {
            return Vec::new();
        }

        let threshold = self.inner.config.probability_threshold;
        let candidates: Vec<Prediction> = self
            .inner
            .model
            .lock()
            .predictions(endpoint)
            .iter()
            .filter(|p| p.probability > threshold)
            .take(limit)
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let options = PrefetchOptions {
            ttl: self.inner.config.ttl,
            speculative: true,
        };
        let requests: Vec<PrefetchRequest> = candidates
            .into_iter()
            .map(|prediction| {
                let fetcher = Arc::clone(fetcher);
                let target = prediction.endpoint.clone();
                let params = prediction.params.clone();
                PrefetchRequest {
                    endpoint: prediction.endpoint,
                    params: prediction.params,
                    options,
                    fetcher: Arc::new(move || fetcher(&target, &params)),
                }
            })
            .collect();

        let scheduled: Vec<EndpointId> = requests.iter().map(|r| r.endpoint.clone()).collect();
        self.inner
            .stats
            .scheduled
            .fetch_add(scheduled.len() as u64, Ordering::Relaxed);
        debug!(endpoint = %endpoint, candidates = ?scheduled, "Scheduling speculative fetches");
        self.inner.telemetry.emit(TelemetryEvent::PrefetchScheduled {
            endpoint: endpoint.clone(),
            candidates: scheduled.clone(),
        });

        let inner = Arc::clone(&self.inner);
        let source = endpoint.clone();
        tokio::spawn(async move {
            if let Err(error) = inner.cache.prefetch(requests).await {
                inner.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(endpoint = %source, error = %error, "Speculative prefetch failed");
            }
        });

        scheduled
    }

    /// Fetches with the configured limit.
    pub fn prefetch_default(&self, endpoint: &EndpointId, fetcher: &Fetcher) -> Vec<EndpointId> {
        self.prefetch(endpoint, fetcher, self.inner.config.limit)
    }

    /// Removes a warmed result for a real request, if one is fresh.
    pub fn take_warm(&self, endpoint: &EndpointId, params: &Params) -> Option<ApiResponse> {
        self.inner.cache.take(endpoint, params)
    }

    pub fn history_len(&self) -> usize {
        self.inner.model.lock().history_len()
    }

    pub fn stats(&self) -> PrefetchStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prefetcher")
            .field("config", &self.inner.config)
            .field("history", &self.history_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::telemetry::RecordingTelemetrySink;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn prefetcher(cache: Arc<dyn PrefetchCache>) -> (Prefetcher, Arc<RecordingTelemetrySink>) {
        let hub = TelemetryHub::new();
        let sink = Arc::new(RecordingTelemetrySink::new());
        hub.subscribe(sink.clone());
        (Prefetcher::new(PrefetchConfig::default(), cache, hub), sink)
    }

    fn track_all(prefetcher: &Prefetcher, endpoints: &[&str]) {
        for endpoint in endpoints {
            prefetcher.track(EndpointId::new(*endpoint), json!({ "from": endpoint }));
        }
    }

    fn echo_fetcher(calls: Arc<AtomicUsize>) -> Fetcher {
        fetcher(move |endpoint, _params| {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = json!({ "endpoint": endpoint.as_str() });
            async move { Ok(value) }
        })
    }

    #[tokio::test]
    async fn test_tracking_yields_sorted_predictions() {
        let (prefetcher, _) = prefetcher(Arc::new(NoOpPrefetchCache));
        track_all(&prefetcher, &["A", "B", "A", "B", "A", "C"]);

        let predictions = prefetcher.predictions(&EndpointId::new("A"));
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].endpoint.as_str(), "B");
        assert!((predictions[0].probability - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(predictions[1].endpoint.as_str(), "C");
        assert!((predictions[1].probability - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(prefetcher.stats().tracked, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_warms_likely_successors() {
        let cache = WarmCache::new();
        let (prefetcher, sink) = prefetcher(Arc::new(cache.clone()));
        track_all(&prefetcher, &["A", "B", "A", "B", "A", "C"]);

        let calls = Arc::new(AtomicUsize::new(0));
        let scheduled = prefetcher.prefetch(&EndpointId::new("A"), &echo_fetcher(calls.clone()), 3);
        assert_eq!(scheduled, vec![EndpointId::new("B"), EndpointId::new("C")]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            prefetcher.take_warm(&EndpointId::new("B"), &json!({ "from": "B" })),
            Some(json!({ "endpoint": "B" }))
        );
        assert_eq!(sink.events_of("prefetch-scheduled").len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_and_limit() {
        let (prefetcher, _) = prefetcher(Arc::new(NoOpPrefetchCache));
        // A -> B (1/4), C (1/4), D (1/2)
        track_all(&prefetcher, &["A", "B", "A", "C", "A", "D", "A", "D"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = echo_fetcher(calls);

        let scheduled = prefetcher.prefetch(&EndpointId::new("A"), &fetch, 3);
        assert_eq!(scheduled, vec![EndpointId::new("D")]);

        assert!(prefetcher
            .prefetch(&EndpointId::new("A"), &fetch, 0)
            .is_empty());
        assert!(prefetcher
            .prefetch(&EndpointId::new("unknown"), &fetch, 3)
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed() {
        let (prefetcher, _) = prefetcher(Arc::new(WarmCache::new()));
        track_all(&prefetcher, &["A", "B"]);
        let failing = fetcher(|_endpoint, _params| async {
            Err(ApiError::new(ErrorKind::Server { status: 503 }, "down"))
        });

        let scheduled = prefetcher.prefetch(&EndpointId::new("A"), &failing, 3);
        assert_eq!(scheduled.len(), 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(prefetcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_disabled_never_fetches() {
        let prefetcher = Prefetcher::new(
            PrefetchConfig::disabled(),
            Arc::new(NoOpPrefetchCache),
            TelemetryHub::new(),
        );
        track_all(&prefetcher, &["A", "B", "A", "B"]);
        let calls = Arc::new(AtomicUsize::new(0));

        assert!(prefetcher
            .prefetch_default(&EndpointId::new("A"), &echo_fetcher(calls.clone()))
            .is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(prefetcher.predictions(&EndpointId::new("A")).len(), 1);
    }
}
