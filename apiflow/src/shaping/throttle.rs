//! Leading-edge throttling with a single coalesced trailing slot.

use crate::error::{ApiError, OrchestratorError};
use crate::request::OperationFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

type Waiter<T> = oneshot::Sender<Result<T, OrchestratorError>>;
type BoxedOperation<T> = Box<dyn FnOnce() -> OperationFuture<T> + Send>;

/// Deferred execution shared by every call that arrives inside the interval.
struct DeferredSlot<T> {
    waiters: Vec<Waiter<T>>,
    /// Latest operation submitted; replaced by each new caller.
    operation: BoxedOperation<T>,
}

struct KeyState<T> {
    last_execution: Option<Instant>,
    /// Interval of the most recent call under this key.
    interval: Duration,
    deferred: Option<DeferredSlot<T>>,
}

impl<T> Default for KeyState<T> {
    fn default() -> Self {
        Self {
            last_execution: None,
            interval: Duration::ZERO,
            deferred: None,
        }
    }
}

impl<T> KeyState<T> {
    /// A key with nothing deferred whose interval has passed behaves
    /// exactly like an unknown key.
    fn is_idle(&self, now: Instant) -> bool {
        self.deferred.is_none()
            && self
                .last_execution
                .map_or(true, |last| now.duration_since(last) >= self.interval)
    }
}

type StateMap<T> = Arc<Mutex<HashMap<String, KeyState<T>>>>;

enum Admission<F, T> {
    Now(F),
    Deferred(oneshot::Receiver<Result<T, OrchestratorError>>),
}

/// Enforces a minimum interval between executions per key.
///
/// A call arriving after the interval runs immediately. Calls arriving
/// inside the interval share one deferred execution scheduled for the end
/// of the interval; the most recent operation is the one that runs.
///
/// Idle keys are evicted on the next admission, so per-key state stays
/// bounded by the keys active within their own interval.
///
/// Cloning shares the same per-key state.
pub struct Throttler<T> {
    states: StateMap<T>,
}

impl<T> Clone for Throttler<T> {
    fn clone(&self) -> Self {
        Self {
            states: Arc::clone(&self.states),
        }
    }
}

impl<T> Default for Throttler<T> {
    fn default() -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> Throttler<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` now or in the key's deferred slot.
    pub async fn throttle<F, Fut>(
        &self,
        key: impl Into<String>,
        operation: F,
        min_interval: Duration,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let key = key.into();
        let admission = self.admit(key, operation, min_interval);

        match admission {
            Admission::Now(operation) => operation().await.map_err(OrchestratorError::from),
            Admission::Deferred(rx) => rx.await?,
        }
    }

    fn admit<F, Fut>(&self, key: String, operation: F, min_interval: Duration) -> Admission<F, T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let now = Instant::now();
        let mut states = self.states.lock();
        states.retain(|_, state| !state.is_idle(now));
        let state = states.entry(key.clone()).or_default();
        state.interval = min_interval;

        if let Some(slot) = state.deferred.as_mut() {
            let (tx, rx) = oneshot::channel();
            slot.waiters.push(tx);
            slot.operation = Box::new(move || operation().boxed());
            tracing::trace!(key = %key, waiters = slot.waiters.len(), "Throttled call coalesced");
            return Admission::Deferred(rx);
        }

        let wait = state
            .last_execution
            .map(|last| min_interval.saturating_sub(now.duration_since(last)))
            .unwrap_or(Duration::ZERO);

        if wait.is_zero() {
            state.last_execution = Some(now);
            return Admission::Now(operation);
        }

        let (tx, rx) = oneshot::channel();
        state.deferred = Some(DeferredSlot {
            waiters: vec![tx],
            operation: Box::new(move || operation().boxed()),
        });
        tracing::trace!(key = %key, wait_ms = wait.as_millis(), "Throttled call deferred");
        tokio::spawn(fire_deferred(Arc::clone(&self.states), key, wait));

        Admission::Deferred(rx)
    }

    /// Forgets the last execution time for `key`.
    ///
    /// A deferred slot already scheduled still fires.
    pub fn reset(&self, key: &str) {
        if let Some(state) = self.states.lock().get_mut(key) {
            state.last_execution = None;
        }
    }

    /// Returns when `key` last executed, if it is still tracked.
    pub fn last_execution(&self, key: &str) -> Option<Instant> {
        self.states.lock().get(key).and_then(|s| s.last_execution)
    }

    /// Returns the number of keys currently holding state.
    pub fn key_count(&self) -> usize {
        self.states.lock().len()
    }
}

impl<T> fmt::Debug for Throttler<T>
where
    T: Clone + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttler")
            .field("keys", &self.key_count())
            .finish()
    }
}

async fn fire_deferred<T>(states: StateMap<T>, key: String, wait: Duration)
where
    T: Clone + Send + 'static,
{
    tokio::time::sleep(wait).await;

    let slot = {
        let mut states = states.lock();
        let Some(state) = states.get_mut(&key) else {
            return;
        };
        state.last_execution = Some(Instant::now());
        state.deferred.take()
    };

    if let Some(slot) = slot {
        let result = (slot.operation)().await.map_err(OrchestratorError::from);
        for waiter in slot.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}
