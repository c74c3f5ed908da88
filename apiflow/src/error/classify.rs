//! Classification of raw responses and transport failures.

use super::kind::{ApiError, AuthCode, BusinessCode, ErrorKind, FieldErrors, NetworkCode};
use super::messages::{MessageCatalog, DEFAULT_LOCALE};
use serde_json::Value;
use std::time::Duration;

/// Retry-after used when a 429 response does not carry one.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Timeout reported for a 408 response that does not carry one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resource kind reported for a 404 response that does not name one.
pub const DEFAULT_RESOURCE: &str = "resource";

/// A failure observed before any response status was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The request was aborted by the caller.
    Aborted,
    /// The client has no connectivity.
    Offline,
    /// The transport gave up waiting.
    TimedOut { after: Duration },
    /// Anything else (DNS, reset connection, TLS...).
    Other { message: String },
}

/// Turns raw failures into [`ApiError`] values.
///
/// Classification is a pure function of its inputs and the catalog the
/// classifier was built with.
///
/// # Example
///
/// ```
/// use apiflow::error::{ErrorClassifier, ErrorKind};
/// use serde_json::json;
///
/// let classifier = ErrorClassifier::default();
/// let err = classifier.classify(404, &json!({ "resource": "invoice" }));
/// assert_eq!(err.kind(), &ErrorKind::NotFound { resource: "invoice".into() });
/// ```
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    catalog: MessageCatalog,
    locale: String,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(MessageCatalog::english(), DEFAULT_LOCALE)
    }
}

impl ErrorClassifier {
    /// Creates a classifier that fills messages from `catalog` in `locale`.
    pub fn new(catalog: MessageCatalog, locale: impl Into<String>) -> Self {
        Self {
            catalog,
            locale: locale.into(),
        }
    }

    pub fn catalog(&self) -> &MessageCatalog {
        &self.catalog
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Classifies a non-success response.
    ///
    /// Recognised body fields: `message`, `code`, `errors`, `retry_after`
    /// (seconds), `timeout` (milliseconds), `resource`, `details`. Missing or
    /// ill-typed fields fall back to defaults.
    pub fn classify(&self, status: u16, body: &Value) -> ApiError {
        let kind = match status {
            400 => ErrorKind::Validation {
                field_errors: field_errors(body),
            },
            401 => ErrorKind::Auth {
                code: match body_str(body, "code") {
                    Some("TOKEN_EXPIRED") => AuthCode::CredentialExpired,
                    _ => AuthCode::Unauthorized,
                },
            },
            403 => ErrorKind::Permission,
            404 => ErrorKind::NotFound {
                resource: body_str(body, "resource")
                    .unwrap_or(DEFAULT_RESOURCE)
                    .to_string(),
            },
            408 => ErrorKind::Timeout {
                timeout: body
                    .get("timeout")
                    .and_then(Value::as_u64)
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_TIMEOUT),
            },
            422 => ErrorKind::Business {
                code: body_str(body, "code")
                    .and_then(BusinessCode::parse)
                    .unwrap_or(BusinessCode::InvalidOperation),
            },
            429 => ErrorKind::RateLimited {
                retry_after: retry_after(body),
            },
            500..=599 => ErrorKind::Server { status },
            _ => ErrorKind::Http { status },
        };

        let message = body_str(body, "message")
            .map(str::to_string)
            .unwrap_or_else(|| self.message_for(&kind));
        let details = body.get("details").cloned().unwrap_or(Value::Null);

        ApiError::new(kind, message)
            .with_status(status)
            .with_details(details)
    }

    /// Classifies a failure that happened before a response arrived.
    pub fn classify_transport_failure(&self, failure: &TransportFailure) -> ApiError {
        let kind = match failure {
            TransportFailure::Aborted => ErrorKind::Network {
                code: NetworkCode::Cancelled,
            },
            TransportFailure::Offline => ErrorKind::Network {
                code: NetworkCode::NoConnection,
            },
            TransportFailure::TimedOut { after } => ErrorKind::Timeout { timeout: *after },
            TransportFailure::Other { .. } => ErrorKind::Network {
                code: NetworkCode::ConnectionFailed,
            },
        };

        let error = ApiError::new(kind.clone(), self.message_for(&kind));
        match failure {
            TransportFailure::Other { message } => {
                error.with_details(serde_json::json!({ "cause": message }))
            }
            _ => error,
        }
    }

    /// Returns the localized message for a kind.
    pub fn message_for(&self, kind: &ErrorKind) -> String {
        self.catalog.message(&self.locale, kind.code()).to_string()
    }
}

fn body_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str)
}

fn retry_after(body: &Value) -> Duration {
    match body.get("retry_after") {
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(DEFAULT_RETRY_AFTER),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER),
        _ => DEFAULT_RETRY_AFTER,
    }
}

/// Reads `errors` as `{ field: code }` or `{ field: [codes] }`.
fn field_errors(body: &Value) -> FieldErrors {
    let Some(errors) = body.get("errors").and_then(Value::as_object) else {
        return FieldErrors::new();
    };

    errors
        .iter()
        .map(|(field, codes)| {
            let codes = match codes {
                Value::String(code) => vec![code.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
                _ => Vec::new(),
            };
            (field.clone(), codes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn classify(status: u16, body: Value) -> ApiError {
        ErrorClassifier::default().classify(status, &body)
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify(400, json!({})).code(), "VALIDATION_ERROR");
        assert_eq!(classify(401, json!({})).code(), "AUTH_ERROR");
        assert_eq!(classify(403, json!({})).code(), "PERMISSION_DENIED");
        assert_eq!(classify(404, json!({})).code(), "NOT_FOUND");
        assert_eq!(classify(408, json!({})).code(), "TIMEOUT");
        assert_eq!(classify(422, json!({})).code(), "INVALID_OPERATION");
        assert_eq!(classify(429, json!({})).code(), "RATE_LIMITED");
        assert_eq!(classify(500, json!({})).code(), "SERVER_ERROR");
        assert_eq!(classify(503, json!({})).code(), "SERVER_ERROR");
        assert_eq!(classify(418, json!({})).kind(), &ErrorKind::Http { status: 418 });
    }

    #[test]
    fn test_not_found_is_pure() {
        let a = classify(404, json!({}));
        let b = classify(404, json!({}));
        assert_eq!(a, b);
        assert_eq!(
            a.kind(),
            &ErrorKind::NotFound {
                resource: DEFAULT_RESOURCE.to_string()
            }
        );
        assert_eq!(a.message(), "The requested resource was not found");
    }

    #[test]
    fn test_body_message_wins() {
        let err = classify(403, json!({ "message": "admins only", "details": { "role": "viewer" } }));
        assert_eq!(err.message(), "admins only");
        assert_eq!(err.details(), &json!({ "role": "viewer" }));
        assert_eq!(err.status(), Some(403));
    }

    #[test]
    fn test_rate_limited_retry_after() {
        let err = classify(429, json!({ "retry_after": 5 }));
        assert_eq!(
            err.kind(),
            &ErrorKind::RateLimited {
                retry_after: Duration::from_secs(5)
            }
        );

        let err = classify(429, json!({ "retry_after": "7" }));
        assert_eq!(
            err.kind(),
            &ErrorKind::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );

        let err = classify(429, json!({ "retry_after": -3 }));
        assert_eq!(
            err.kind(),
            &ErrorKind::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }

    #[test]
    fn test_oversized_retry_after_falls_back() {
        for body in [json!({ "retry_after": 1e30 }), json!({ "retry_after": u64::MAX })] {
            let err = classify(429, body);
            assert_eq!(
                err.kind(),
                &ErrorKind::RateLimited {
                    retry_after: DEFAULT_RETRY_AFTER
                }
            );
        }
    }

    #[test]
    fn test_expired_token() {
        let err = classify(401, json!({ "code": "TOKEN_EXPIRED" }));
        assert!(err.is_credential_expired());
        assert_eq!(err.message(), "Your session has expired");
    }

    #[test]
    fn test_validation_field_errors() {
        let err = classify(
            400,
            json!({ "errors": { "email": "INVALID_FORMAT", "name": ["REQUIRED", "TOO_SHORT", 3] } }),
        );
        let ErrorKind::Validation { field_errors } = err.kind() else {
            panic!("expected validation error");
        };
        assert_eq!(field_errors["email"], vec!["INVALID_FORMAT"]);
        assert_eq!(field_errors["name"], vec!["REQUIRED", "TOO_SHORT"]);
    }

    #[test]
    fn test_business_codes() {
        let err = classify(422, json!({ "code": "DUPLICATE_ENTRY" }));
        assert_eq!(
            err.kind(),
            &ErrorKind::Business {
                code: BusinessCode::DuplicateEntry
            }
        );
        assert_eq!(err.message(), "This entry already exists");
    }

    #[test]
    fn test_timeout_from_body() {
        let err = classify(408, json!({ "timeout": 1500 }));
        assert_eq!(
            err.kind(),
            &ErrorKind::Timeout {
                timeout: Duration::from_millis(1500)
            }
        );
    }

    #[test]
    fn test_non_object_body() {
        let err = classify(500, json!("Internal Server Error"));
        assert_eq!(err.kind(), &ErrorKind::Server { status: 500 });
        assert_eq!(err.message(), "The server encountered an error");
        assert_eq!(err.details(), &Value::Null);
    }

    #[test]
    fn test_transport_failures() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier
                .classify_transport_failure(&TransportFailure::Aborted)
                .code(),
            "REQUEST_CANCELLED"
        );
        assert_eq!(
            classifier
                .classify_transport_failure(&TransportFailure::Offline)
                .code(),
            "NO_CONNECTION"
        );
        let timeout = classifier.classify_transport_failure(&TransportFailure::TimedOut {
            after: Duration::from_secs(10),
        });
        assert_eq!(
            timeout.kind(),
            &ErrorKind::Timeout {
                timeout: Duration::from_secs(10)
            }
        );
        let other = classifier.classify_transport_failure(&TransportFailure::Other {
            message: "connection reset".into(),
        });
        assert_eq!(other.code(), "NETWORK_ERROR");
        assert_eq!(other.details()["cause"], "connection reset");
        assert_eq!(other.status(), None);
    }

    #[test]
    fn test_localized_classification() {
        let catalog = MessageCatalog::english().with_message("fr", "NOT_FOUND", "Introuvable");
        let classifier = ErrorClassifier::new(catalog, "fr");
        assert_eq!(classifier.classify(404, &json!({})).message(), "Introuvable");
        // Falls back to English for missing French entries
        assert_eq!(
            classifier.classify(403, &json!({})).message(),
            "You do not have permission to do this"
        );
    }
}
