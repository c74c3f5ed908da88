//! Localized message tables for errors and user actions.
//!
//! Messages are looked up by `(locale, key)` where the key is either an
//! error code (`"NOT_FOUND"`) or a user action tag (`"retry"`). The catalog
//! is passed explicitly to the [`ErrorClassifier`](super::ErrorClassifier)
//! so no global lookup table is needed.

use std::collections::HashMap;

/// Default locale used when none is configured.
pub const DEFAULT_LOCALE: &str = "en";

/// Message returned when a key is missing from every locale.
pub const GENERIC_MESSAGE: &str = "An unexpected error occurred";

/// Locale-keyed message table.
///
/// # Example
///
/// ```
/// use apiflow::error::MessageCatalog;
///
/// let catalog = MessageCatalog::english()
///     .with_message("fr", "NOT_FOUND", "Ressource introuvable");
///
/// assert_eq!(catalog.message("fr", "NOT_FOUND"), "Ressource introuvable");
/// // Missing French entry falls back to English
/// assert_eq!(catalog.message("fr", "TIMEOUT"), "The request timed out");
/// ```
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    fallback_locale: String,
    tables: HashMap<String, HashMap<String, String>>,
}

impl MessageCatalog {
    /// Creates an empty catalog that falls back to `fallback_locale`.
    pub fn new(fallback_locale: impl Into<String>) -> Self {
        Self {
            fallback_locale: fallback_locale.into(),
            tables: HashMap::new(),
        }
    }

    /// Creates a catalog populated with the built-in English messages.
    pub fn english() -> Self {
        let entries = [
            ("NETWORK_ERROR", "A network error occurred"),
            ("NO_CONNECTION", "No internet connection"),
            ("REQUEST_CANCELLED", "The request was cancelled"),
            ("AUTH_ERROR", "Authentication failed"),
            ("TOKEN_EXPIRED", "Your session has expired"),
            ("VALIDATION_ERROR", "The submitted data is invalid"),
            ("SERVER_ERROR", "The server encountered an error"),
            ("NOT_FOUND", "The requested resource was not found"),
            ("RATE_LIMITED", "Too many requests, please slow down"),
            ("TIMEOUT", "The request timed out"),
            ("PERMISSION_DENIED", "You do not have permission to do this"),
            ("INVALID_OPERATION", "This operation is not allowed"),
            ("DUPLICATE_ENTRY", "This entry already exists"),
            ("INVALID_STATE", "The resource is in an invalid state"),
            ("QUOTA_EXCEEDED", "Your quota has been exceeded"),
            ("HTTP_ERROR", GENERIC_MESSAGE),
            ("retry", "Retry"),
            ("reauthenticate", "Sign in again"),
            ("check-connection", "Check your connection"),
            ("contact-support", "Contact support"),
            ("dismiss", "Dismiss"),
        ];

        entries
            .into_iter()
            .fold(Self::new(DEFAULT_LOCALE), |catalog, (key, text)| {
                catalog.with_message(DEFAULT_LOCALE, key, text)
            })
    }

    /// Adds or replaces a message for `locale` and `key`.
    pub fn with_message(
        mut self,
        locale: impl Into<String>,
        key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.insert(locale, key, text);
        self
    }

    /// Adds or replaces a message in place.
    pub fn insert(
        &mut self,
        locale: impl Into<String>,
        key: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.tables
            .entry(locale.into())
            .or_default()
            .insert(key.into(), text.into());
    }

    /// Looks up a message, falling back to the fallback locale and then to
    /// [`GENERIC_MESSAGE`].
    pub fn message(&self, locale: &str, key: &str) -> &str {
        self.lookup(locale, key)
            .or_else(|| self.lookup(&self.fallback_locale, key))
            .unwrap_or(GENERIC_MESSAGE)
    }

    /// Returns the locale used when a lookup misses.
    pub fn fallback_locale(&self) -> &str {
        &self.fallback_locale
    }

    /// Returns true if the catalog has any entries for `locale`.
    pub fn has_locale(&self, locale: &str) -> bool {
        self.tables.contains_key(locale)
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        self.tables
            .get(locale)
            .and_then(|table| table.get(key))
            .map(String::as_str)
    }
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self::english()
    }
}
