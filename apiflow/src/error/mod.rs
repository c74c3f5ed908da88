//! Error taxonomy and recovery policy.
//!
//! Failures are classified exactly once, where a raw response or transport
//! failure is first observed:
//!
//! ```text
//! status + body ──┐
//!                 ├──► ErrorClassifier ──► ApiError ──┬──► retry_strategy()
//! TransportFailure┘        (catalog)                  ├──► is_recoverable()
//!                                                     └──► user_action()
//! ```
//!
//! Downstream stages (shapers, limiter, batcher, queue) never re-interpret an
//! [`ApiError`]; they wrap it in [`OrchestratorError::Api`] and hand it back
//! to the caller unchanged.

mod classify;
mod control;
mod kind;
mod messages;
mod recovery;

pub use classify::{
    ErrorClassifier, TransportFailure, DEFAULT_RESOURCE, DEFAULT_RETRY_AFTER, DEFAULT_TIMEOUT,
};
pub use control::OrchestratorError;
pub use kind::{ApiError, AuthCode, BusinessCode, ErrorKind, FieldErrors, NetworkCode};
pub use messages::{MessageCatalog, DEFAULT_LOCALE, GENERIC_MESSAGE};
pub use recovery::{
    action_tag, is_recoverable, retry_strategy, ActionTag, Backoff, RetryStrategy, UserAction,
    BACKOFF_MULTIPLIER, NETWORK_MAX_RETRIES, NETWORK_RETRY_DELAY, SERVER_MAX_RETRIES,
    SERVER_RETRY_DELAY,
};
