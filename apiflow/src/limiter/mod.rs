//! Admission control for in-flight calls.
//!
//! The [`ConcurrencyLimiter`] caps how many operations run at once. Calls
//! beyond the cap wait in a FIFO queue (the fair wait list of a tokio
//! [`Semaphore`]) and are admitted one by one as running calls settle.
//!
//! Queue depth is unbounded; callers that need a ceiling park work in the
//! [`RequestQueue`](crate::queue::RequestQueue) first.
//!
//! # Example
//!
//! ```
//! use apiflow::limiter::{ConcurrencyLimiter, LimiterConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = ConcurrencyLimiter::new(LimiterConfig { max_concurrent: 2 });
//! let value = limiter.execute(|| async { Ok(42) }).await.unwrap();
//! assert_eq!(value, 42);
//! assert_eq!(limiter.status().active, 0);
//! # }
//! ```

use crate::config::defaults::DEFAULT_MAX_CONCURRENT;
use crate::error::{ApiError, OrchestratorError};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Configuration for the concurrency limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Maximum operations running at once (must be > 0).
    pub max_concurrent: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Point-in-time view of the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStatus {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

struct LimiterInner {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
    peak_active: AtomicUsize,
}

impl LimiterInner {
    fn admit(self: &Arc<Self>, permit: OwnedSemaphorePermit) -> LimiterPermit {
        let current = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_active.fetch_max(current, Ordering::Relaxed);
        LimiterPermit {
            _permit: permit,
            inner: Arc::clone(self),
        }
    }
}

/// Caps the number of simultaneously running operations.
///
/// Cloning shares the same capacity.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

impl ConcurrencyLimiter {
    /// Creates a limiter.
    ///
    /// # Panics
    ///
    /// Panics if `config.max_concurrent` is zero.
    pub fn new(config: LimiterConfig) -> Self {
        assert!(config.max_concurrent > 0, "max_concurrent must be > 0");
        Self {
            inner: Arc::new(LimiterInner {
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                max_concurrent: config.max_concurrent,
                active: AtomicUsize::new(0),
                queued: AtomicUsize::new(0),
                peak_active: AtomicUsize::new(0),
            }),
        }
    }

    /// Runs `operation` once a slot is free.
    ///
    /// The slot is released when the operation settles, whether it succeeded
    /// or failed, and the oldest waiting call is admitted. Errors from the
    /// operation are returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let _permit = self.acquire().await?;
        operation().await.map_err(OrchestratorError::from)
    }

    /// Waits for a slot and returns a permit holding it.
    pub async fn acquire(&self) -> Result<LimiterPermit, OrchestratorError> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        match semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(self.inner.admit(permit)),
            Err(TryAcquireError::Closed) => return Err(OrchestratorError::LimiterClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let waiting = QueuedGuard::new(&self.inner.queued);
        tracing::trace!(
            queued = self.inner.queued.load(Ordering::Relaxed),
            max_concurrent = self.inner.max_concurrent,
            "Limiter saturated, call queued"
        );
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| OrchestratorError::LimiterClosed)?;
        drop(waiting);
        Ok(self.inner.admit(permit))
    }

    /// Returns the current counts. Pure read.
    pub fn status(&self) -> LimiterStatus {
        LimiterStatus {
            active: self.inner.active.load(Ordering::Relaxed),
            queued: self.inner.queued.load(Ordering::Relaxed),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    /// Returns the highest `active` count observed.
    pub fn peak_active(&self) -> usize {
        self.inner.peak_active.load(Ordering::Relaxed)
    }

    /// Rejects all waiting and future calls with `LimiterClosed`.
    ///
    /// Calls already running are unaffected.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status();
        f.debug_struct("ConcurrencyLimiter")
            .field("active", &status.active)
            .field("queued", &status.queued)
            .field("max_concurrent", &status.max_concurrent)
            .finish()
    }
}

/// A held limiter slot. Dropping it admits the next waiting call.
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    inner: Arc<LimiterInner>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for LimiterPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterPermit").finish()
    }
}

/// Counts a waiting call; uncounts it even if the wait is abandoned.
struct QueuedGuard<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> QueuedGuard<'a> {
    fn new(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::Relaxed);
        Self { queued }
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }
}
