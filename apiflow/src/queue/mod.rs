//! Bounded FIFO of calls held back while the client cannot dispatch them.
//!
//! Requests made while offline, or while a credential refresh is
//! outstanding, are parked here and replayed in order once the client is
//! ready again:
//!
//! ```text
//! enqueue ──► [ r1 | r2 | r3 | ... ]  (capacity, default 100)
//!                   │
//!    drain(processor)        pops one at a time, resolves each caller
//!    drain_while(ready, ..)  same, but stops as soon as `ready()` is false
//!    reject_all(error)       rejects everything with `error`
//!    clear()                 rejects everything with QueueCleared
//! ```
//!
//! Only one drain runs at a time; a drain requested while another is in
//! progress returns immediately. Rejection does not take the drain flag, so
//! it also reaches entries a running drain has not popped yet.

use crate::config::defaults::DEFAULT_QUEUE_CAPACITY;
use crate::error::OrchestratorError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the request queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum parked requests.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

struct QueuedEntry<S, T> {
    spec: S,
    waiter: oneshot::Sender<Result<T, OrchestratorError>>,
    enqueued_at: Instant,
}

struct QueueInner<S, T> {
    capacity: usize,
    entries: Mutex<VecDeque<QueuedEntry<S, T>>>,
    draining: AtomicBool,
}

/// Handle to a parked request's eventual outcome.
#[derive(Debug)]
pub struct QueuedRequest<T> {
    rx: oneshot::Receiver<Result<T, OrchestratorError>>,
}

impl<T> QueuedRequest<T> {
    /// Waits until the entry is drained or cleared.
    pub async fn wait(self) -> Result<T, OrchestratorError> {
        self.rx.await?
    }
}

/// Bounded FIFO request queue.
///
/// Cloning shares the same queue.
pub struct RequestQueue<S, T> {
    inner: Arc<QueueInner<S, T>>,
}

impl<S, T> Clone for RequestQueue<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Resets the draining flag however the drain ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S, T> RequestQueue<S, T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                capacity: config.capacity,
                entries: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Parks `spec` at the back of the queue.
    ///
    /// Fails with `QueueFull` when the queue is at capacity.
    pub fn enqueue(&self, spec: S) -> Result<QueuedRequest<T>, OrchestratorError> {
        let mut entries = self.inner.entries.lock();
        if entries.len() >= self.inner.capacity {
            debug!(capacity = self.inner.capacity, "Request queue full");
            return Err(OrchestratorError::QueueFull {
                capacity: self.inner.capacity,
            });
        }

        let (tx, rx) = oneshot::channel();
        entries.push_back(QueuedEntry {
            spec,
            waiter: tx,
            enqueued_at: Instant::now(),
        });
        debug!(depth = entries.len(), "Request queued");
        Ok(QueuedRequest { rx })
    }

    /// Replays every parked entry through `processor`, oldest first.
    ///
    /// Entries enqueued while the drain runs are replayed too. Returns the
    /// number of entries processed, or 0 if another drain was already
    /// running.
    pub async fn drain<P, Fut, E>(&self, processor: P) -> usize
    where
        P: FnMut(S) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OrchestratorError>,
    {
        self.drain_while(|| true, processor).await
    }

    /// Like [`drain`](Self::drain), but checks `ready` before every pop and
    /// stops, leaving the remaining entries parked, once it returns false.
    pub async fn drain_while<R, P, Fut, E>(&self, mut ready: R, mut processor: P) -> usize
    where
        R: FnMut() -> bool,
        P: FnMut(S) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OrchestratorError>,
    {
        let mut drained = 0;
        loop {
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                if drained == 0 {
                    debug!("Drain already in progress");
                }
                break;
            }

            {
                let _guard = DrainGuard(&self.inner.draining);
                drained += self.replay_all(&mut ready, &mut processor).await;
            }

            // An entry parked after the last pop but before the flag was
            // cleared would otherwise wait for the next drain.
            if self.is_empty() || !ready() {
                break;
            }
        }

        if drained > 0 {
            info!(drained, "Request queue drained");
        }
        drained
    }

    async fn replay_all<R, P, Fut, E>(&self, ready: &mut R, processor: &mut P) -> usize
    where
        R: FnMut() -> bool,
        P: FnMut(S) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<OrchestratorError>,
    {
        let mut replayed = 0;
        loop {
            if !ready() {
                debug!(remaining = self.len(), "Drain paused, client not ready");
                return replayed;
            }
            let next = self.inner.entries.lock().pop_front();
            let Some(entry) = next else {
                return replayed;
            };

            let waited = entry.enqueued_at.elapsed();
            let outcome: Result<T, OrchestratorError> =
                processor(entry.spec).await.map_err(Into::into);
            debug!(
                waited_ms = waited.as_millis(),
                success = outcome.is_ok(),
                "Queued request replayed"
            );
            let _ = entry.waiter.send(outcome);
            replayed += 1;
        }
    }

    /// Rejects every parked entry with `QueueCleared`.
    ///
    /// Returns the number of entries rejected.
    pub fn clear(&self) -> usize {
        let count = self.reject_all(OrchestratorError::QueueCleared);
        if count > 0 {
            info!(cleared = count, "Request queue cleared");
        }
        count
    }

    /// Rejects every parked entry with `error`, whether or not a drain is
    /// running. Returns the number of entries rejected.
    pub fn reject_all(&self, error: OrchestratorError) -> usize {
        let rejected: Vec<_> = self.inner.entries.lock().drain(..).collect();
        let count = rejected.len();
        for entry in rejected {
            let _ = entry.waiter.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }
}

impl<S, T> fmt::Debug for RequestQueue<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .field("draining", &self.is_draining())
            .finish()
    }
}
