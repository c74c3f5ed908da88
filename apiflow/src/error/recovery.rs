//! Recovery policy: retry decisions and suggested user actions.
//!
//! The policy only *describes* what to do. Retry loops are run by the
//! caller so iteration stays visible and controllable there.

use super::classify::ErrorClassifier;
use super::kind::{ApiError, AuthCode, ErrorKind};
use std::fmt;
use std::time::Duration;

/// Initial delay for network and timeout retries.
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Maximum retries for network and timeout failures.
pub const NETWORK_MAX_RETRIES: u32 = 3;

/// Initial delay for server error retries.
pub const SERVER_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Maximum retries for server errors.
pub const SERVER_MAX_RETRIES: u32 = 2;

/// Growth factor applied per attempt when backoff is exponential.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Backoff shape between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Delay doubles after every attempt.
    Exponential,
}

/// Retry decision derived from an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStrategy {
    pub should_retry: bool,
    /// Delay before the first retry.
    pub delay: Duration,
    pub max_retries: u32,
    pub backoff: Option<Backoff>,
    /// A credential refresh must complete before the retry is issued.
    pub requires_credential_refresh: bool,
}

impl RetryStrategy {
    /// Strategy that never retries.
    pub fn no_retry() -> Self {
        Self {
            should_retry: false,
            delay: Duration::ZERO,
            max_retries: 0,
            backoff: None,
            requires_credential_refresh: false,
        }
    }

    fn retry(delay: Duration, max_retries: u32, backoff: Option<Backoff>) -> Self {
        Self {
            should_retry: true,
            delay,
            max_retries,
            backoff,
            requires_credential_refresh: false,
        }
    }

    /// Returns the delay before retry number `attempt` (zero-based), or
    /// `None` once `max_retries` is exhausted.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry || attempt >= self.max_retries {
            return None;
        }
        match self.backoff {
            Some(Backoff::Exponential) => {
                let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt);
                Some(self.delay.saturating_mul(factor))
            }
            None => Some(self.delay),
        }
    }
}

/// Returns true if the failure may succeed when tried again.
pub fn is_recoverable(error: &ApiError) -> bool {
    match error.kind() {
        ErrorKind::Network { .. } | ErrorKind::Timeout { .. } => true,
        ErrorKind::Server { status } => *status >= 500,
        ErrorKind::Auth { code } => *code == AuthCode::CredentialExpired,
        _ => false,
    }
}

/// Derives the retry decision for an error.
pub fn retry_strategy(error: &ApiError) -> RetryStrategy {
    match error.kind() {
        ErrorKind::RateLimited { retry_after } => RetryStrategy::retry(*retry_after, 1, None),
        ErrorKind::Network { .. } | ErrorKind::Timeout { .. } => RetryStrategy::retry(
            NETWORK_RETRY_DELAY,
            NETWORK_MAX_RETRIES,
            Some(Backoff::Exponential),
        ),
        ErrorKind::Server { status } if *status >= 500 => RetryStrategy::retry(
            SERVER_RETRY_DELAY,
            SERVER_MAX_RETRIES,
            Some(Backoff::Exponential),
        ),
        ErrorKind::Auth {
            code: AuthCode::CredentialExpired,
        } => RetryStrategy {
            requires_credential_refresh: true,
            ..RetryStrategy::retry(Duration::ZERO, 1, None)
        },
        _ => RetryStrategy::no_retry(),
    }
}

/// What the UI should offer the user after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionTag {
    Retry,
    Reauthenticate,
    CheckConnection,
    ContactSupport,
    Dismiss,
}

impl ActionTag {
    /// Returns the tag string, also used as the catalog key for its label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Reauthenticate => "reauthenticate",
            Self::CheckConnection => "check-connection",
            Self::ContactSupport => "contact-support",
            Self::Dismiss => "dismiss",
        }
    }
}

impl fmt::Display for ActionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Suggested action with its localized label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAction {
    pub action: ActionTag,
    pub label: String,
}

/// Picks the action tag for an error.
pub fn action_tag(error: &ApiError) -> ActionTag {
    match error.kind() {
        ErrorKind::Network { .. } => ActionTag::CheckConnection,
        ErrorKind::Auth { .. } => ActionTag::Reauthenticate,
        ErrorKind::Server { status } if *status >= 500 => ActionTag::ContactSupport,
        _ if is_recoverable(error) => ActionTag::Retry,
        _ => ActionTag::Dismiss,
    }
}

impl ErrorClassifier {
    /// Returns the suggested user action, labelled in the classifier's locale.
    pub fn user_action(&self, error: &ApiError) -> UserAction {
        let action = action_tag(error);
        UserAction {
            action,
            label: self
                .catalog()
                .message(self.locale(), action.as_str())
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BusinessCode, NetworkCode};
    use serde_json::json;

    fn error(kind: ErrorKind) -> ApiError {
        ApiError::new(kind, "test")
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(is_recoverable(&error(ErrorKind::Network {
            code: NetworkCode::ConnectionFailed
        })));
        assert!(is_recoverable(&error(ErrorKind::Timeout {
            timeout: Duration::from_secs(1)
        })));
        assert!(is_recoverable(&error(ErrorKind::Server { status: 502 })));
        assert!(!is_recoverable(&error(ErrorKind::Server { status: 499 })));
        assert!(is_recoverable(&error(ErrorKind::Auth {
            code: AuthCode::CredentialExpired
        })));
        assert!(!is_recoverable(&error(ErrorKind::Auth {
            code: AuthCode::Unauthorized
        })));
        assert!(!is_recoverable(&error(ErrorKind::Permission)));
        assert!(!is_recoverable(&error(ErrorKind::RateLimited {
            retry_after: Duration::from_secs(1)
        })));
        assert!(!is_recoverable(&error(ErrorKind::Business {
            code: BusinessCode::InvalidState
        })));
    }

    #[test]
    fn test_rate_limited_strategy_uses_retry_after() {
        let err = ErrorClassifier::default().classify(429, &json!({ "retry_after": 5 }));
        let strategy = retry_strategy(&err);
        assert!(strategy.should_retry);
        assert_eq!(strategy.delay, Duration::from_millis(5000));
        assert_eq!(strategy.max_retries, 1);
        assert_eq!(strategy.backoff, None);
        assert!(!strategy.requires_credential_refresh);
    }

    #[test]
    fn test_network_strategy_backoff() {
        let strategy = retry_strategy(&error(ErrorKind::Network {
            code: NetworkCode::NoConnection,
        }));
        assert_eq!(strategy.max_retries, 3);
        assert_eq!(strategy.backoff, Some(Backoff::Exponential));
        assert_eq!(strategy.delay_for_attempt(0), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_secs(2)));
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(4)));
        assert_eq!(strategy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_server_strategy() {
        let strategy = retry_strategy(&error(ErrorKind::Server { status: 503 }));
        assert!(strategy.should_retry);
        assert_eq!(strategy.delay, Duration::from_secs(2));
        assert_eq!(strategy.max_retries, 2);
        assert_eq!(strategy.delay_for_attempt(1), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_expired_credential_strategy() {
        let strategy = retry_strategy(&error(ErrorKind::Auth {
            code: AuthCode::CredentialExpired,
        }));
        assert!(strategy.should_retry);
        assert!(strategy.requires_credential_refresh);
        assert_eq!(strategy.delay, Duration::ZERO);
        assert_eq!(strategy.max_retries, 1);
    }

    #[test]
    fn test_no_retry_for_client_errors() {
        for kind in [
            ErrorKind::Permission,
            ErrorKind::NotFound {
                resource: "x".into(),
            },
            ErrorKind::Http { status: 418 },
            ErrorKind::Auth {
                code: AuthCode::Unauthorized,
            },
        ] {
            let strategy = retry_strategy(&error(kind));
            assert_eq!(strategy, RetryStrategy::no_retry());
            assert_eq!(strategy.delay_for_attempt(0), None);
        }
    }

    #[test]
    fn test_user_actions() {
        let classifier = ErrorClassifier::default();
        let action = |kind| classifier.user_action(&error(kind));

        let network = action(ErrorKind::Network {
            code: NetworkCode::ConnectionFailed,
        });
        assert_eq!(network.action, ActionTag::CheckConnection);
        assert_eq!(network.label, "Check your connection");

        assert_eq!(
            action(ErrorKind::Auth {
                code: AuthCode::Unauthorized
            })
            .action,
            ActionTag::Reauthenticate
        );
        assert_eq!(
            action(ErrorKind::Server { status: 500 }).action,
            ActionTag::ContactSupport
        );
        assert_eq!(
            action(ErrorKind::Timeout {
                timeout: Duration::from_secs(30)
            })
            .action,
            ActionTag::Retry
        );
        assert_eq!(action(ErrorKind::Permission).action, ActionTag::Dismiss);
    }
}
