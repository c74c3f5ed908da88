//! Request orchestration facade.
//!
//! [`ApiOrchestrator`] wires every stage together:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          ApiOrchestrator                             │
//! │                                                                      │
//! │  submit_debounced ─► Debouncer ─┐                                    │
//! │  submit_throttled ─► Throttler ─┤                                    │
//! │                                 ▼                                    │
//! │  submit ──► ready? ──no──► RequestQueue ◄── run(): drain when ready  │
//! │               │ yes                                                  │
//! │               ▼                                                      │
//! │          WarmCache hit? ──yes──► return                              │
//! │               │ no                                                   │
//! │               ▼                                                      │
//! │     ConcurrencyLimiter ──► PerformanceMonitor ──► call               │
//! │               │                                                      │
//! │               ├── expired credential ──► CredentialRefresher + park  │
//! │               ▼                                                      │
//! │          Prefetcher.track ──► speculative prefetch ──► WarmCache     │
//! │                                                                      │
//! │  submit_batched ──► Batcher ──► (one limiter slot) ──► processor     │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Classification happens where a raw failure is observed (inside the call
//! thunk, usually through [`ApiOrchestrator::classify`]); the orchestrator
//! hands the resulting error back unchanged. Retries are left to the caller,
//! guided by [`retry_strategy`](crate::error::retry_strategy).
//!
//! # Example
//!
//! ```
//! use apiflow::config::OrchestratorConfig;
//! use apiflow::orchestrator::ApiOrchestrator;
//! use apiflow::request::RequestDescriptor;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let orchestrator = ApiOrchestrator::new(OrchestratorConfig::default());
//! let shutdown = CancellationToken::new();
//! let runner = tokio::spawn({
//!     let orchestrator = orchestrator.clone();
//!     let shutdown = shutdown.clone();
//!     async move { orchestrator.run(shutdown).await }
//! });
//!
//! let users = RequestDescriptor::new("users.list", json!({ "page": 1 }), || async {
//!     Ok(json!([{ "id": 1 }]))
//! });
//! let value = orchestrator.submit(users).await.unwrap();
//! assert_eq!(value, json!([{ "id": 1 }]));
//!
//! shutdown.cancel();
//! runner.await.unwrap();
//! # }
//! ```

mod facade;
mod signals;
mod stats;

pub use facade::{ApiOrchestrator, CredentialRefresher, OrchestratorStatus};
pub use signals::{ClientSignals, ClientState};
pub use stats::{RequestStats, RequestStatsSnapshot};
