//! apiflow - request orchestration for API clients
//!
//! This library decides *when*, *how many at once*, and *in what combined
//! form* outbound API calls are issued, how failures are classified and
//! retried, and which calls are worth issuing before anyone asks for them.
//!
//! # High-Level API
//!
//! For most use cases, the [`orchestrator`] module provides a facade over
//! every stage:
//!
//! ```ignore
//! use apiflow::config::OrchestratorConfig;
//! use apiflow::orchestrator::ApiOrchestrator;
//!
//! let orchestrator = ApiOrchestrator::new(OrchestratorConfig::default());
//! tokio::spawn({
//!     let orchestrator = orchestrator.clone();
//!     async move { orchestrator.run(shutdown).await }
//! });
//!
//! let users = orchestrator.submit(descriptor).await?;
//! ```
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`error`] | Error taxonomy, classification, recovery policy |
//! | [`monitor`] | Request timing and latency bands |
//! | [`progress`] | Byte-level progress of long transfers |
//! | [`shaping`] | Debouncer and throttler |
//! | [`limiter`] | Concurrency cap with FIFO admission |
//! | [`batch`] | Merging same-kind calls |
//! | [`queue`] | Parking calls while offline or refreshing credentials |
//! | [`prefetch`] | Sequence prediction and speculative fetches |
//! | [`telemetry`] | Observer registration for timing and progress events |

pub mod batch;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod prefetch;
pub mod progress;
pub mod queue;
pub mod request;
pub mod shaping;
pub mod telemetry;

/// Version of the apiflow library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
