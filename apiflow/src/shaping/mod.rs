//! Rate shapers for bursts of user-triggered calls.
//!
//! Two shapers sit in front of dispatch:
//!
//! ```text
//!            ┌───────────────┐
//! call ────► │  Debouncer    │  trailing edge: last call in a quiet window
//!            └───────────────┘
//!            ┌───────────────┐
//! call ────► │  Throttler    │  leading edge + one coalesced deferred slot
//!            └───────────────┘
//! ```
//!
//! Both are keyed by caller-chosen strings, so independent inputs (a search
//! box and a filter panel, say) never interfere with each other. Waiters that
//! join the same window all receive the outcome of the single operation that
//! actually runs.

mod debounce;
mod throttle;

pub use debounce::Debouncer;
pub use throttle::Throttler;

use crate::config::defaults::{DEFAULT_DEBOUNCE_DELAY, DEFAULT_THROTTLE_INTERVAL};
use std::time::Duration;

/// Default timings used by the orchestrator's shaped submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingConfig {
    /// Quiet period before a debounced call fires.
    pub debounce_delay: Duration,
    /// Minimum spacing between throttled executions.
    pub throttle_interval: Duration,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
        }
    }
}
