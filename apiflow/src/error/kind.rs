//! Error kinds and the classified [`ApiError`] value.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Sub-code for [`ErrorKind::Network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkCode {
    /// Connection failed for an unspecified reason.
    ConnectionFailed,
    /// The client has no network connectivity.
    NoConnection,
    /// The request was aborted before completing.
    Cancelled,
}

/// Sub-code for [`ErrorKind::Auth`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthCode {
    /// Credentials were rejected.
    Unauthorized,
    /// Credentials were valid but have expired and can be refreshed.
    CredentialExpired,
}

/// Domain-specific failure reported with status 422.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusinessCode {
    InvalidOperation,
    DuplicateEntry,
    InvalidState,
    QuotaExceeded,
}

impl BusinessCode {
    /// Parses a wire code, returning `None` for unknown values.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "INVALID_OPERATION" => Some(Self::InvalidOperation),
            "DUPLICATE_ENTRY" => Some(Self::DuplicateEntry),
            "INVALID_STATE" => Some(Self::InvalidState),
            "QUOTA_EXCEEDED" => Some(Self::QuotaExceeded),
            _ => None,
        }
    }

    /// Returns the machine-readable code.
    pub fn as_code(self) -> &'static str {
        match self {
            Self::InvalidOperation => "INVALID_OPERATION",
            Self::DuplicateEntry => "DUPLICATE_ENTRY",
            Self::InvalidState => "INVALID_STATE",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
        }
    }
}

/// Per-field validation error codes, ordered by field name.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Tagged failure category.
///
/// Recovery logic switches over this enum rather than inspecting concrete
/// error types.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// Transport-level failure.
    Network { code: NetworkCode },
    /// Authentication failure (status 401).
    Auth { code: AuthCode },
    /// Request rejected as invalid (status 400).
    Validation { field_errors: FieldErrors },
    /// Server-side failure (status 5xx).
    Server { status: u16 },
    /// Resource does not exist (status 404).
    NotFound { resource: String },
    /// Too many requests (status 429).
    RateLimited { retry_after: Duration },
    /// Request timed out, either in transport or with status 408.
    Timeout { timeout: Duration },
    /// Caller lacks permission (status 403).
    Permission,
    /// Domain rule violation (status 422).
    Business { code: BusinessCode },
    /// Any other non-success status.
    Http { status: u16 },
}

impl ErrorKind {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network {
                code: NetworkCode::ConnectionFailed,
            } => "NETWORK_ERROR",
            Self::Network {
                code: NetworkCode::NoConnection,
            } => "NO_CONNECTION",
            Self::Network {
                code: NetworkCode::Cancelled,
            } => "REQUEST_CANCELLED",
            Self::Auth {
                code: AuthCode::Unauthorized,
            } => "AUTH_ERROR",
            Self::Auth {
                code: AuthCode::CredentialExpired,
            } => "TOKEN_EXPIRED",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Server { .. } => "SERVER_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Permission => "PERMISSION_DENIED",
            Self::Business { code } => code.as_code(),
            Self::Http { .. } => "HTTP_ERROR",
        }
    }

    /// Returns a short lowercase name for the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Auth { .. } => "auth",
            Self::Validation { .. } => "validation",
            Self::Server { .. } => "server",
            Self::NotFound { .. } => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::Permission => "permission",
            Self::Business { .. } => "business",
            Self::Http { .. } => "http",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A classified API failure.
///
/// Produced once at the boundary where a raw failure is observed and then
/// propagated unchanged through every orchestration stage. Cloning is cheap
/// enough for fan-out to multiple waiters.
#[derive(Debug, Clone, Error)]
#[error("{message} ({kind})")]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    details: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl ApiError {
    /// Creates an error stamped with the current time.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            details: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the originating status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches structured details from the response body.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn details(&self) -> &serde_json::Value {
        &self.details
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns true for an `Auth` error whose credential can be refreshed.
    pub fn is_credential_expired(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Auth {
                code: AuthCode::CredentialExpired
            }
        )
    }
}

impl PartialEq for ApiError {
    /// Two errors are equal when everything but the creation time matches.
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.status == other.status
            && self.details == other.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            ErrorKind::Network {
                code: NetworkCode::NoConnection
            }
            .code(),
            "NO_CONNECTION"
        );
        assert_eq!(ErrorKind::Permission.code(), "PERMISSION_DENIED");
        assert_eq!(
            ErrorKind::Business {
                code: BusinessCode::QuotaExceeded
            }
            .code(),
            "QUOTA_EXCEEDED"
        );
        assert_eq!(ErrorKind::Http { status: 418 }.code(), "HTTP_ERROR");
    }

    #[test]
    fn test_business_code_parse() {
        for code in [
            BusinessCode::InvalidOperation,
            BusinessCode::DuplicateEntry,
            BusinessCode::InvalidState,
            BusinessCode::QuotaExceeded,
        ] {
            assert_eq!(BusinessCode::parse(code.as_code()), Some(code));
        }
        assert_eq!(BusinessCode::parse("SOMETHING_ELSE"), None);
    }

    #[test]
    fn test_display_includes_message_and_code() {
        let err = ApiError::new(ErrorKind::Permission, "nope").with_status(403);
        assert_eq!(err.to_string(), "nope (PERMISSION_DENIED)");
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = ApiError::new(ErrorKind::Permission, "nope");
        std::thread::sleep(Duration::from_millis(2));
        let b = ApiError::new(ErrorKind::Permission, "nope");
        assert_ne!(a.timestamp(), b.timestamp());
        assert_eq!(a, b);
    }

    #[test]
    fn test_credential_expired() {
        let expired = ApiError::new(
            ErrorKind::Auth {
                code: AuthCode::CredentialExpired,
            },
            "expired",
        );
        let denied = ApiError::new(
            ErrorKind::Auth {
                code: AuthCode::Unauthorized,
            },
            "denied",
        );
        assert!(expired.is_credential_expired());
        assert!(!denied.is_credential_expired());
    }
}
