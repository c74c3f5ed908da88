//! Trailing-edge debouncing keyed by caller-chosen strings.

use crate::error::{ApiError, OrchestratorError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type Waiter<T> = oneshot::Sender<Result<T, OrchestratorError>>;

struct PendingCall<T> {
    generation: u64,
    waiters: Vec<Waiter<T>>,
    timer: JoinHandle<()>,
}

type PendingMap<T> = Arc<Mutex<HashMap<String, PendingCall<T>>>>;

/// Coalesces bursts of calls into the last one.
///
/// Each call under a key restarts that key's timer and replaces the pending
/// operation. When the timer finally fires, the latest operation runs once
/// and every caller that joined the window receives its outcome.
///
/// Cloning shares the same pending calls.
pub struct Debouncer<T> {
    pending: PendingMap<T>,
    generations: Arc<AtomicU64>,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            generations: Arc::clone(&self.generations),
        }
    }
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> Debouncer<T>
where
    T: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `operation` to run after `delay` of quiet on `key`.
    ///
    /// Resolves with the outcome of whichever operation eventually fires for
    /// this window, or `Cancelled` if [`cancel`](Self::cancel) is called first.
    pub async fn debounce<F, Fut>(
        &self,
        key: impl Into<String>,
        operation: F,
        delay: Duration,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let key = key.into();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock();
            let generation = self.generations.fetch_add(1, Ordering::Relaxed);

            let mut waiters = match pending.remove(&key) {
                Some(previous) => {
                    previous.timer.abort();
                    previous.waiters
                }
                None => Vec::new(),
            };
            waiters.push(tx);
            tracing::trace!(key = %key, waiters = waiters.len(), "Debounce window restarted");

            let timer = tokio::spawn(fire(
                Arc::clone(&self.pending),
                key.clone(),
                generation,
                operation,
                delay,
            ));
            pending.insert(
                key,
                PendingCall {
                    generation,
                    waiters,
                    timer,
                },
            );
        }

        rx.await?
    }

    /// Cancels the pending call for `key`, rejecting its waiters.
    ///
    /// Returns false if nothing was pending.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(call) = self.pending.lock().remove(key) else {
            return false;
        };
        call.timer.abort();
        tracing::debug!(key = %key, waiters = call.waiters.len(), "Debounced call cancelled");
        for waiter in call.waiters {
            let _ = waiter.send(Err(OrchestratorError::Cancelled));
        }
        true
    }

    /// Cancels every pending key.
    pub fn cancel_all(&self) {
        let calls: Vec<_> = self.pending.lock().drain().collect();
        for (_, call) in calls {
            call.timer.abort();
            for waiter in call.waiters {
                let _ = waiter.send(Err(OrchestratorError::Cancelled));
            }
        }
    }

    /// Returns true if a call is waiting to fire under `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Returns the number of keys with a pending call.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<T> fmt::Debug for Debouncer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

async fn fire<T, F, Fut>(
    pending: PendingMap<T>,
    key: String,
    generation: u64,
    operation: F,
    delay: Duration,
) where
    T: Clone + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    tokio::time::sleep(delay).await;

    // A newer call may have replaced us after the timer elapsed but before
    // this task could take the lock.
    let waiters = {
        let mut pending = pending.lock();
        let current = pending
            .get(&key)
            .map_or(false, |call| call.generation == generation);
        if !current {
            return;
        }
        match pending.remove(&key) {
            Some(call) => call.waiters,
            None => return,
        }
    };

    tracing::trace!(key = %key, waiters = waiters.len(), "Debounced call firing");
    let result = operation().await.map_err(OrchestratorError::from);
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}
