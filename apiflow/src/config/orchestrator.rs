//! Top-level orchestrator configuration.

use crate::batch::BatchConfig;
use crate::error::{ErrorClassifier, MessageCatalog, DEFAULT_LOCALE};
use crate::limiter::LimiterConfig;
use crate::prefetch::PrefetchConfig;
use crate::queue::QueueConfig;
use crate::shaping::ShapingConfig;

/// Configuration for [`ApiOrchestrator`](crate::orchestrator::ApiOrchestrator).
///
/// Groups the per-component configs, providing defaults while allowing
/// customization.
///
/// # Example
///
/// ```
/// use apiflow::config::OrchestratorConfig;
///
/// let config = OrchestratorConfig::new()
///     .with_max_concurrent(4)
///     .with_queue_capacity(50)
///     .with_locale("fr");
///
/// assert_eq!(config.limiter.max_concurrent, 4);
/// assert_eq!(config.queue.capacity, 50);
/// assert_eq!(config.locale, "fr");
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub limiter: LimiterConfig,
    pub batch: BatchConfig,
    pub queue: QueueConfig,
    pub prefetch: PrefetchConfig,
    pub shaping: ShapingConfig,
    /// Locale used for error messages and action labels.
    pub locale: String,
    /// Message tables keyed by locale.
    pub catalog: MessageCatalog,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limiter: LimiterConfig::default(),
            batch: BatchConfig::default(),
            queue: QueueConfig::default(),
            prefetch: PrefetchConfig::default(),
            shaping: ShapingConfig::default(),
            locale: DEFAULT_LOCALE.to_string(),
            catalog: MessageCatalog::english(),
        }
    }
}

impl OrchestratorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of simultaneously in-flight calls.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.limiter.max_concurrent = max_concurrent;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    /// Set how many requests may be parked while the client is not ready.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue.capacity = capacity;
        self
    }

    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_shaping(mut self, shaping: ShapingConfig) -> Self {
        self.shaping = shaping;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Replace the message catalog.
    pub fn with_catalog(mut self, catalog: MessageCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Builds the classifier for this locale and catalog.
    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(self.catalog.clone(), self.locale.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.limiter.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.batch.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.batch.batch_delay, DEFAULT_BATCH_DELAY);
        assert_eq!(config.queue.capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.prefetch.max_history, DEFAULT_HISTORY_SIZE);
        assert_eq!(config.prefetch.probability_threshold, DEFAULT_PREFETCH_THRESHOLD);
        assert_eq!(config.prefetch.limit, DEFAULT_PREFETCH_LIMIT);
        assert_eq!(config.shaping.debounce_delay, DEFAULT_DEBOUNCE_DELAY);
        assert_eq!(config.shaping.throttle_interval, DEFAULT_THROTTLE_INTERVAL);
        assert_eq!(config.locale, "en");
    }

    #[test]
    fn test_classifier_uses_locale() {
        let catalog = MessageCatalog::english().with_message("de", "PERMISSION_DENIED", "Verboten");
        let classifier = OrchestratorConfig::new()
            .with_catalog(catalog)
            .with_locale("de")
            .classifier();
        assert_eq!(classifier.locale(), "de");
        assert_eq!(
            classifier.classify(403, &serde_json::json!({})).message(),
            "Verboten"
        );
    }
}
