//! Configuration types for apiflow components.
//!
//! Each component owns a small config struct with public fields and a
//! `Default` built from the constants in [`defaults`]. [`OrchestratorConfig`]
//! groups them for the facade.
//!
//! # Example
//!
//! ```
//! use apiflow::config::OrchestratorConfig;
//! use apiflow::prefetch::PrefetchConfig;
//!
//! let config = OrchestratorConfig::new().with_prefetch(PrefetchConfig {
//!     probability_threshold: 0.5,
//!     ..PrefetchConfig::default()
//! });
//! assert_eq!(config.prefetch.probability_threshold, 0.5);
//! ```

pub mod defaults;
mod orchestrator;

pub use orchestrator::OrchestratorConfig;
