//! Configuration for the prefetcher.

use crate::config::defaults::{
    DEFAULT_HISTORY_SIZE, DEFAULT_PREFETCH_LIMIT, DEFAULT_PREFETCH_THRESHOLD, DEFAULT_PREFETCH_TTL,
};
use std::time::Duration;

/// Prefetch policy.
///
/// The threshold and limit are tuning knobs: a lower threshold warms more
/// of the cache at the cost of wasted calls.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchConfig {
    /// Enable speculative fetching. Tracking always runs.
    pub enabled: bool,
    /// Maximum access history length.
    pub max_history: usize,
    /// Predictions must be strictly more likely than this to be fetched.
    pub probability_threshold: f64,
    /// Maximum speculative fetches per observed call.
    pub limit: usize,
    /// Time-to-live hint for warmed results.
    pub ttl: Duration,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history: DEFAULT_HISTORY_SIZE,
            probability_threshold: DEFAULT_PREFETCH_THRESHOLD,
            limit: DEFAULT_PREFETCH_LIMIT,
            ttl: DEFAULT_PREFETCH_TTL,
        }
    }
}

impl PrefetchConfig {
    /// Config that tracks history but never issues speculative calls.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
