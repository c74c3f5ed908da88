//! Default policy values.
//!
//! These are policy, not law: every value can be overridden through the
//! corresponding config struct.

use std::time::Duration;

/// Maximum simultaneously in-flight calls (browser per-host connection cap).
pub const DEFAULT_MAX_CONCURRENT: usize = 6;

/// Entries that trigger an immediate batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Quiet period after the last append before a batch flushes.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Access history length kept by the prefetcher.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Predictions must exceed this probability to be prefetched.
pub const DEFAULT_PREFETCH_THRESHOLD: f64 = 0.3;

/// Maximum speculative fetches issued per observed call.
pub const DEFAULT_PREFETCH_LIMIT: usize = 3;

/// Time-to-live hint passed to the cache for speculative results.
pub const DEFAULT_PREFETCH_TTL: Duration = Duration::from_secs(60);

/// Debounce window for rapid input.
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

/// Minimum spacing between throttled executions.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(1);
