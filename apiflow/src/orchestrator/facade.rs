//! The orchestrator facade.

use super::signals::{ClientSignals, ClientState};
use super::stats::{RequestStats, RequestStatsSnapshot};
use crate::batch::{BatchProcessor, Batcher};
use crate::config::OrchestratorConfig;
use crate::error::{
    ApiError, ErrorClassifier, OrchestratorError, TransportFailure, UserAction,
};
use crate::limiter::{ConcurrencyLimiter, LimiterStatus};
use crate::monitor::{PerformanceMonitor, TimingStatus};
use crate::prefetch::{Fetcher, PrefetchCache, Prefetcher, WarmCache};
use crate::progress::ProgressTracker;
use crate::queue::RequestQueue;
use crate::request::{ApiResponse, EndpointId, Params, RequestDescriptor, RequestId};
use crate::shaping::{Debouncer, Throttler};
use crate::telemetry::{SubscriptionId, TelemetryEvent, TelemetryHub, TelemetrySink};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hook that re-acquires an expired credential.
///
/// The orchestrator never stores credentials. It only calls this hook when a
/// call fails with an expired-credential error and replays the parked calls
/// once it succeeds.
pub trait CredentialRefresher: Send + Sync {
    fn refresh(&self) -> BoxFuture<'static, Result<(), ApiError>>;
}

impl<F, Fut> CredentialRefresher for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
{
    fn refresh(&self) -> BoxFuture<'static, Result<(), ApiError>> {
        (self)().boxed()
    }
}

/// Point-in-time view of every stage.
///
/// Serializes to JSON for status panels and diagnostics endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub limiter: LimiterStatus,
    pub client: ClientState,
    /// Requests parked in the request queue.
    pub queued: usize,
    pub draining: bool,
    /// Requests currently being timed.
    pub timings_in_flight: usize,
    /// Long transfers being tracked.
    pub transfers: usize,
    /// Batch keys with entries waiting to flush.
    pub pending_batches: usize,
    pub stats: RequestStatsSnapshot,
}

/// Outcome shared by every waiter of a shaped submission.
type Shaped = Result<ApiResponse, OrchestratorError>;

struct OrchestratorInner {
    config: OrchestratorConfig,
    classifier: ErrorClassifier,
    limiter: ConcurrencyLimiter,
    monitor: PerformanceMonitor,
    progress: ProgressTracker,
    batcher: Batcher<Params, ApiResponse>,
    queue: RequestQueue<RequestDescriptor, ApiResponse>,
    prefetcher: Prefetcher,
    debouncer: Debouncer<Shaped>,
    throttler: Throttler<Shaped>,
    telemetry: TelemetryHub,
    signals: ClientSignals,
    refresher: RwLock<Option<Arc<dyn CredentialRefresher>>>,
    fetcher: RwLock<Option<Fetcher>>,
    stats: RequestStats,
}

/// Entry point that decides when, how many at once, and in what combined
/// form calls are issued.
///
/// Cloning shares every stage.
#[derive(Clone)]
pub struct ApiOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ApiOrchestrator {
    /// Creates an orchestrator backed by an in-memory [`WarmCache`].
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_cache(config, Arc::new(WarmCache::new()))
    }

    /// Creates an orchestrator that warms `cache` with speculative results.
    pub fn with_cache(config: OrchestratorConfig, cache: Arc<dyn PrefetchCache>) -> Self {
        let telemetry = TelemetryHub::new();
        let inner = OrchestratorInner {
            classifier: config.classifier(),
            limiter: ConcurrencyLimiter::new(config.limiter.clone()),
            monitor: PerformanceMonitor::new(telemetry.clone()),
            progress: ProgressTracker::new(telemetry.clone()),
            batcher: Batcher::new(config.batch.clone()),
            queue: RequestQueue::new(config.queue.clone()),
            prefetcher: Prefetcher::new(config.prefetch.clone(), cache, telemetry.clone()),
            debouncer: Debouncer::new(),
            throttler: Throttler::new(),
            telemetry,
            signals: ClientSignals::default(),
            refresher: RwLock::new(None),
            fetcher: RwLock::new(None),
            stats: RequestStats::new(),
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// Installs the credential refresh hook.
    pub fn set_credential_refresher<R>(&self, refresher: R)
    where
        R: CredentialRefresher + 'static,
    {
        *self.inner.refresher.write() = Some(Arc::new(refresher));
    }

    /// Installs the fetcher used for speculative prefetches.
    ///
    /// Without one, calls are still tracked but nothing is prefetched. Each
    /// speculative fetch occupies one concurrency slot, like a real call.
    pub fn set_prefetch_fetcher(&self, fetcher: Fetcher) {
        let limiter = self.inner.limiter.clone();
        let aborted = self.classify_transport_failure(&TransportFailure::Aborted);
        let limited: Fetcher = Arc::new(move |endpoint: &EndpointId, params: &Params| {
            let call = fetcher(endpoint, params);
            let limiter = limiter.clone();
            let aborted = aborted.clone();
            async move {
                let _permit = limiter.acquire().await.map_err(|_| aborted)?;
                call.await
            }
            .boxed()
        });
        *self.inner.fetcher.write() = Some(limited);
    }

    /// Registers a telemetry sink.
    pub fn subscribe(&self, sink: Arc<dyn TelemetrySink>) -> SubscriptionId {
        self.inner.telemetry.subscribe(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.telemetry.unsubscribe(id)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn telemetry(&self) -> &TelemetryHub {
        &self.inner.telemetry
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.inner.monitor
    }

    /// Tracker for long transfers; callers report bytes as they arrive.
    pub fn progress(&self) -> &ProgressTracker {
        &self.inner.progress
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.inner.prefetcher
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.inner.classifier
    }

    // =========================================================================
    // Classification
    // =========================================================================

    /// Classifies a non-success response in the configured locale.
    pub fn classify(&self, status: u16, body: &Value) -> ApiError {
        self.inner.classifier.classify(status, body)
    }

    /// Classifies a failure observed before any response arrived.
    pub fn classify_transport_failure(&self, failure: &TransportFailure) -> ApiError {
        self.inner.classifier.classify_transport_failure(failure)
    }

    /// Returns the action the UI should offer for `error`.
    pub fn user_action(&self, error: &ApiError) -> UserAction {
        self.inner.classifier.user_action(error)
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Submits a call.
    ///
    /// When the client is offline or refreshing credentials the call is
    /// parked and replayed later. Otherwise a fresh prefetched result is
    /// returned if one exists, and the call is dispatched through the
    /// concurrency limiter if not. A call that fails with an expired
    /// credential triggers a refresh (when a refresher is installed) and is
    /// parked for replay.
    ///
    /// Calls parked after a credential refresh are replayed as soon as the
    /// refresh succeeds. Calls parked while offline are replayed when
    /// [`set_online`](Self::set_online) restores connectivity, which requires
    /// [`run`](Self::run) to be running (or an explicit
    /// [`drain_queue`](Self::drain_queue)).
    pub async fn submit(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, OrchestratorError> {
        self.inner.stats.record_submitted();
        let result = self.submit_inner(descriptor).await;
        match &result {
            Ok(_) => self.inner.stats.record_success(),
            Err(_) => self.inner.stats.record_failure(),
        }
        result
    }

    async fn submit_inner(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, OrchestratorError> {
        if !self.inner.signals.is_ready() {
            return self.park(descriptor).await;
        }

        if let Some(value) = self
            .inner
            .prefetcher
            .take_warm(descriptor.endpoint(), descriptor.params())
        {
            debug!(endpoint = %descriptor.endpoint(), "Served from warm cache");
            self.inner.stats.record_warm_hit();
            self.observe(&descriptor);
            return Ok(value);
        }

        match self.dispatch(&descriptor).await {
            Err(OrchestratorError::Api(error))
                if error.is_credential_expired() && self.start_refresh() =>
            {
                debug!(endpoint = %descriptor.endpoint(), "Parking call until credentials refresh");
                self.park(descriptor).await
            }
            result => result,
        }
    }

    /// Debounces submissions under `key`; only the last one within `delay`
    /// is issued and every caller receives its outcome.
    pub async fn submit_debounced(
        &self,
        key: impl Into<String>,
        descriptor: RequestDescriptor,
        delay: Duration,
    ) -> Result<ApiResponse, OrchestratorError> {
        let this = self.clone();
        self.inner
            .debouncer
            .debounce(
                key,
                move || async move { Ok::<Shaped, ApiError>(this.submit(descriptor).await) },
                delay,
            )
            .await?
    }

    /// Debounces with the configured `shaping.debounce_delay`.
    pub async fn submit_debounced_default(
        &self,
        key: impl Into<String>,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse, OrchestratorError> {
        let delay = self.inner.config.shaping.debounce_delay;
        self.submit_debounced(key, descriptor, delay).await
    }

    /// Cancels a pending debounced submission, rejecting its callers.
    pub fn cancel_debounced(&self, key: &str) -> bool {
        self.inner.debouncer.cancel(key)
    }

    /// Throttles submissions under `key` to one per `min_interval`.
    pub async fn submit_throttled(
        &self,
        key: impl Into<String>,
        descriptor: RequestDescriptor,
        min_interval: Duration,
    ) -> Result<ApiResponse, OrchestratorError> {
        let this = self.clone();
        self.inner
            .throttler
            .throttle(
                key,
                move || async move { Ok::<Shaped, ApiError>(this.submit(descriptor).await) },
                min_interval,
            )
            .await?
    }

    /// Throttles with the configured `shaping.throttle_interval`.
    pub async fn submit_throttled_default(
        &self,
        key: impl Into<String>,
        descriptor: RequestDescriptor,
    ) -> Result<ApiResponse, OrchestratorError> {
        let interval = self.inner.config.shaping.throttle_interval;
        self.submit_throttled(key, descriptor, interval).await
    }

    /// Registers the combined call for a batch key.
    ///
    /// Each flush occupies one concurrency slot.
    pub fn register_batch_processor<P>(&self, key: impl Into<String>, processor: P)
    where
        P: BatchProcessor<Params, ApiResponse> + 'static,
    {
        let processor: Arc<dyn BatchProcessor<Params, ApiResponse>> = Arc::new(processor);
        let limiter = self.inner.limiter.clone();
        let classifier = self.inner.classifier.clone();

        self.inner
            .batcher
            .register_processor(key, move |specs: Vec<Params>| {
                let processor = Arc::clone(&processor);
                let limiter = limiter.clone();
                let aborted = classifier.classify_transport_failure(&TransportFailure::Aborted);
                async move {
                    let _permit = match limiter.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => return Err(aborted),
                    };
                    processor.process(specs).await
                }
            });
    }

    /// Adds `params` to the batch named `key` and waits for its share of
    /// the combined result.
    pub async fn submit_batched(
        &self,
        key: impl Into<String>,
        params: Params,
    ) -> Result<ApiResponse, OrchestratorError> {
        self.inner.batcher.add_to_batch(key, params).await
    }

    /// Flushes a batch immediately.
    pub async fn flush_batch(&self, key: &str) -> usize {
        self.inner.batcher.flush(key).await
    }

    /// Runs one call through the limiter with timing, then records the
    /// access for prediction.
    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse, OrchestratorError> {
        let id = RequestId::next();
        let monitor = &self.inner.monitor;
        monitor.start_timing_for(id, descriptor.endpoint().clone());

        let result = self
            .inner
            .limiter
            .execute(|| {
                monitor.mark(id, "admitted");
                descriptor.invoke()
            })
            .await;

        let status = match &result {
            Ok(_) => TimingStatus::Success,
            Err(error) => TimingStatus::error(error.code()),
        };
        monitor.end_timing(id, status);

        if let Err(error) = &result {
            debug!(endpoint = %descriptor.endpoint(), error = %error, "Call failed");
        }
        self.observe(descriptor);
        result
    }

    fn observe(&self, descriptor: &RequestDescriptor) {
        let prefetcher = &self.inner.prefetcher;
        prefetcher.track(descriptor.endpoint().clone(), descriptor.params().clone());

        let fetcher = self.inner.fetcher.read().clone();
        if let Some(fetcher) = fetcher {
            prefetcher.prefetch_default(descriptor.endpoint(), &fetcher);
        }
    }

    // =========================================================================
    // Request queue and signals
    // =========================================================================

    async fn park(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, OrchestratorError> {
        let endpoint: EndpointId = descriptor.endpoint().clone();
        let handle = self.inner.queue.enqueue(descriptor)?;
        self.inner.stats.record_parked();
        self.inner.telemetry.emit(TelemetryEvent::RequestQueued {
            endpoint,
            queue_depth: self.inner.queue.len(),
        });

        // Readiness may have come back between the check and the enqueue.
        if self.inner.signals.is_ready() {
            self.spawn_drain();
        }

        handle.wait().await
    }

    /// Starts a credential refresh unless one is outstanding.
    ///
    /// Returns false if no refresher is installed.
    fn start_refresh(&self) -> bool {
        let Some(refresher) = self.inner.refresher.read().clone() else {
            return false;
        };
        if !self.inner.signals.begin_refresh() {
            return true;
        }

        self.inner.stats.record_credential_refresh();
        info!("Credential expired, refreshing");

        let this = self.clone();
        tokio::spawn(async move {
            match refresher.refresh().await {
                Ok(()) => {
                    info!("Credential refreshed");
                    this.credential_refreshed();
                    this.spawn_drain();
                }
                Err(error) => {
                    warn!(error = %error, "Credential refresh failed");
                    // Reject while still marked refreshing so nothing replays first.
                    let rejected = this.inner.queue.reject_all(OrchestratorError::Api(error));
                    debug!(rejected, "Parked calls rejected after failed refresh");
                    this.inner.signals.finish_refresh();
                }
            }
        });
        true
    }

    /// Records that connectivity changed.
    pub fn set_online(&self, online: bool) {
        if self.inner.signals.set_online(online) {
            info!(online, "Connectivity changed");
        }
    }

    /// Records that an outstanding credential refresh completed.
    pub fn credential_refreshed(&self) {
        self.inner.signals.finish_refresh();
    }

    pub fn client_state(&self) -> ClientState {
        self.inner.signals.current()
    }

    /// Replays parked calls while the client stays ready. Returns the
    /// number replayed.
    ///
    /// Readiness is checked before every replay, so a call parked for a
    /// credential refresh mid-drain waits for the refresh to finish.
    pub async fn drain_queue(&self) -> usize {
        let this = self.clone();
        let gate = self.clone();
        let drained = self
            .inner
            .queue
            .drain_while(
                move || gate.inner.signals.is_ready(),
                move |descriptor: RequestDescriptor| {
                    let this = this.clone();
                    async move { this.dispatch(&descriptor).await }
                },
            )
            .await;

        if drained > 0 {
            self.inner.stats.record_replayed(drained);
            self.inner
                .telemetry
                .emit(TelemetryEvent::QueueDrained { drained });
        }
        drained
    }

    fn spawn_drain(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.drain_queue().await;
        });
    }

    /// Watches client signals and replays parked calls whenever the client
    /// becomes ready, until `shutdown` is cancelled.
    ///
    /// On shutdown, pending debounced calls are cancelled and parked calls
    /// are rejected with `QueueCleared`.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Orchestrator starting");
        let mut rx = self.inner.signals.subscribe();

        if rx.borrow_and_update().is_ready() && !self.inner.queue.is_empty() {
            self.spawn_drain();
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Orchestrator shutting down");
                    break;
                }

                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *rx.borrow_and_update();
                    self.inner.telemetry.emit(TelemetryEvent::ConnectivityChanged {
                        online: state.online,
                        refreshing: state.refreshing,
                    });
                    if state.is_ready() {
                        self.spawn_drain();
                    }
                }
            }
        }

        self.inner.debouncer.cancel_all();
        let cleared = self.inner.queue.clear();
        info!(cleared, "Orchestrator stopped");
    }

    /// Returns a snapshot of every stage.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            limiter: self.inner.limiter.status(),
            client: self.inner.signals.current(),
            queued: self.inner.queue.len(),
            draining: self.inner.queue.is_draining(),
            timings_in_flight: self.inner.monitor.in_flight(),
            transfers: self.inner.progress.active_count(),
            pending_batches: self.inner.batcher.batch_count(),
            stats: self.inner.stats.snapshot(),
        }
    }
}

impl fmt::Debug for ApiOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiOrchestrator")
            .field("status", &self.status())
            .finish()
    }
}
