//! Merging of same-kind calls into combined dispatches.
//!
//! # Architecture
//!
//! ```text
//! add_to_batch("users", 1) ─┐
//! add_to_batch("users", 2) ─┼──► Batch "users" ──(size or timer)──► processor([1, 2, 3])
//! add_to_batch("users", 3) ─┘     [1, 2, 3]                              │
//!                                                                        ▼
//!         caller 1 ◄── results[0]   caller 2 ◄── results[1]   caller 3 ◄── results[2]
//! ```
//!
//! A batch flushes as soon as it holds `batch_size` entries, or `batch_delay`
//! after the most recent append, whichever comes first. Results are handed
//! back in submission order.
//!
//! Flushing a key with no registered processor fails every entry with
//! [`OrchestratorError::NoProcessorRegistered`] rather than leaving callers
//! waiting forever.

use crate::config::defaults::{DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE};
use crate::error::{ApiError, OrchestratorError};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Entries that trigger an immediate flush (must be > 0).
    pub batch_size: usize,
    /// Quiet period after the last append before a flush.
    pub batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

/// Outcome of a whole batch: one result per spec, in the order given.
pub type BatchOutcome<T> = Result<Vec<Result<T, ApiError>>, ApiError>;

/// Executes a batch of specs as one combined call.
///
/// Returning `Err` fails every entry of the batch with that error.
pub trait BatchProcessor<S, T>: Send + Sync {
    fn process(&self, specs: Vec<S>) -> BoxFuture<'static, BatchOutcome<T>>;
}

impl<S, T, F, Fut> BatchProcessor<S, T> for F
where
    F: Fn(Vec<S>) -> Fut + Send + Sync,
    Fut: Future<Output = BatchOutcome<T>> + Send + 'static,
{
    fn process(&self, specs: Vec<S>) -> BoxFuture<'static, BatchOutcome<T>> {
        (self)(specs).boxed()
    }
}

struct BatchEntry<S, T> {
    spec: S,
    waiter: oneshot::Sender<Result<T, OrchestratorError>>,
    enqueued_at: Instant,
}

struct Batch<S, T> {
    generation: u64,
    entries: Vec<BatchEntry<S, T>>,
    timer: Option<JoinHandle<()>>,
}

struct BatcherState<S, T> {
    batches: HashMap<String, Batch<S, T>>,
    processors: HashMap<String, Arc<dyn BatchProcessor<S, T>>>,
    next_generation: u64,
}

struct BatcherInner<S, T> {
    config: BatchConfig,
    state: Mutex<BatcherState<S, T>>,
}

/// Collects specs per batch key and dispatches them together.
///
/// Cloning shares the same batches and processors.
pub struct Batcher<S, T> {
    inner: Arc<BatcherInner<S, T>>,
}

impl<S, T> Clone for Batcher<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> Batcher<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    /// Creates a batcher.
    ///
    /// # Panics
    ///
    /// Panics if `config.batch_size` is zero.
    pub fn new(config: BatchConfig) -> Self {
        assert!(config.batch_size > 0, "batch_size must be > 0");
        Self {
            inner: Arc::new(BatcherInner {
                config,
                state: Mutex::new(BatcherState {
                    batches: HashMap::new(),
                    processors: HashMap::new(),
                    next_generation: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Registers the processor for `key`. The last registration wins.
    pub fn register_processor<P>(&self, key: impl Into<String>, processor: P)
    where
        P: BatchProcessor<S, T> + 'static,
    {
        let key = key.into();
        debug!(key = %key, "Batch processor registered");
        self.inner
            .state
            .lock()
            .processors
            .insert(key, Arc::new(processor));
    }

    /// Returns true if a processor is registered for `key`.
    pub fn has_processor(&self, key: &str) -> bool {
        self.inner.state.lock().processors.contains_key(key)
    }

    /// Appends `spec` to the batch named `key` and waits for its result.
    pub async fn add_to_batch(
        &self,
        key: impl Into<String>,
        spec: S,
    ) -> Result<T, OrchestratorError> {
        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let entry = BatchEntry {
            spec,
            waiter: tx,
            enqueued_at: Instant::now(),
        };

        let full = {
            let mut state = self.inner.state.lock();
            state.next_generation += 1;
            let generation = state.next_generation;

            let batch = state.batches.entry(key.clone()).or_insert_with(|| Batch {
                generation,
                entries: Vec::new(),
                timer: None,
            });
            batch.entries.push(entry);
            batch.generation = generation;
            if let Some(timer) = batch.timer.take() {
                timer.abort();
            }

            if batch.entries.len() >= self.inner.config.batch_size {
                let processor = state.processors.get(&key).cloned();
                state
                    .batches
                    .remove(&key)
                    .map(|batch| (batch.entries, processor))
            } else {
                batch.timer = Some(tokio::spawn(flush_after(
                    Arc::clone(&self.inner),
                    key.clone(),
                    generation,
                )));
                None
            }
        };

        if let Some((entries, processor)) = full {
            debug!(key = %key, entries = entries.len(), "Batch full, flushing");
            tokio::spawn(dispatch(key, entries, processor));
        }

        rx.await?
    }

    /// Flushes the batch named `key` now.
    ///
    /// Returns the number of entries dispatched.
    pub async fn flush(&self, key: &str) -> usize {
        let taken = {
            let mut state = self.inner.state.lock();
            state.batches.remove(key).map(|batch| {
                if let Some(timer) = batch.timer {
                    timer.abort();
                }
                (batch.entries, state.processors.get(key).cloned())
            })
        };

        match taken {
            Some((entries, processor)) => {
                let count = entries.len();
                dispatch(key.to_string(), entries, processor).await;
                count
            }
            None => 0,
        }
    }

    /// Returns the number of entries waiting under `key`.
    pub fn pending_count(&self, key: &str) -> usize {
        self.inner
            .state
            .lock()
            .batches
            .get(key)
            .map_or(0, |batch| batch.entries.len())
    }

    /// Returns the number of keys with a pending batch.
    pub fn batch_count(&self) -> usize {
        self.inner.state.lock().batches.len()
    }
}

impl<S, T> fmt::Debug for Batcher<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .field("batches", &state.batches.len())
            .field("processors", &state.processors.len())
            .finish()
    }
}

/// Timer body: flushes the batch unless a later append rescheduled it.
async fn flush_after<S, T>(inner: Arc<BatcherInner<S, T>>, key: String, generation: u64)
where
    S: Send + 'static,
    T: Send + 'static,
{
    tokio::time::sleep(inner.config.batch_delay).await;

    let taken = {
        let mut state = inner.state.lock();
        let current = state
            .batches
            .get(&key)
            .map_or(false, |batch| batch.generation == generation);
        if !current {
            return;
        }
        // Our own handle is detached here, never aborted.
        state
            .batches
            .remove(&key)
            .map(|batch| (batch.entries, state.processors.get(&key).cloned()))
    };

    if let Some((entries, processor)) = taken {
        debug!(key = %key, entries = entries.len(), "Batch timer elapsed, flushing");
        dispatch(key, entries, processor).await;
    }
}

async fn dispatch<S, T>(
    key: String,
    entries: Vec<BatchEntry<S, T>>,
    processor: Option<Arc<dyn BatchProcessor<S, T>>>,
) {
    let Some(processor) = processor else {
        warn!(key = %key, entries = entries.len(), "Batch flushed with no processor registered");
        for entry in entries {
            let _ = entry.waiter.send(Err(OrchestratorError::NoProcessorRegistered {
                key: key.clone(),
            }));
        }
        return;
    };

    let expected = entries.len();
    let oldest = entries.first().map(|e| e.enqueued_at.elapsed());
    let (specs, waiters): (Vec<S>, Vec<_>) = entries
        .into_iter()
        .map(|entry| (entry.spec, entry.waiter))
        .unzip();

    debug!(key = %key, entries = expected, waited = ?oldest, "Dispatching batch");

    match processor.process(specs).await {
        Ok(results) => {
            let received = results.len();
            if received != expected {
                warn!(key = %key, expected, received, "Batch processor returned wrong number of results");
            }
            let mut results = results.into_iter();
            for waiter in waiters {
                let outcome = match results.next() {
                    Some(result) => result.map_err(OrchestratorError::from),
                    None => Err(OrchestratorError::BatchResultMismatch { expected, received }),
                };
                let _ = waiter.send(outcome);
            }
        }
        Err(error) => {
            debug!(key = %key, error = %error, "Batch processor failed");
            for waiter in waiters {
                let _ = waiter.send(Err(OrchestratorError::Api(error.clone())));
            }
        }
    }
}
