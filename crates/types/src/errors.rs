//! Error taxonomy for upstream fetches.
//!
//! Adapters never surface these past their boundary: the session converts a
//! `FetchError` into an absent slot and keeps only its [`FetchErrorKind`] on
//! the resulting quote.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure of a single upstream fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Upstream unreachable, timed out, or answered with a non-success status.
    #[error("network error: {message}")]
    Network { message: String },

    /// The page element or response field carrying the value was not present.
    #[error("element not found: {locator}")]
    ElementNotFound { locator: String },

    /// A value was present but is not numeric after sanitization.
    #[error("parse error: '{raw}' is not numeric")]
    Parse { raw: String },

    /// A dated publication is not for the requested calendar date.
    #[error("stale date: requested {requested}, published {}", display_date(.published))]
    StaleDate {
        requested: NaiveDate,
        published: Option<NaiveDate>,
    },

    /// A browser context, page or navigation could not be set up.
    #[error("resource error: {message}")]
    Resource { message: String },

    /// The adapter task itself failed (panic or abort).
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Payload-free classification of a [`FetchError`], suitable for logging and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    ElementNotFound,
    Parse,
    StaleDate,
    Resource,
    Internal,
}

fn display_date(date: &Option<NaiveDate>) -> String {
    date.map(|date| date.to_string()).unwrap_or_else(|| "none".to_string())
}

impl FetchError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create an element-not-found error for a locator or field path.
    pub fn element_not_found(locator: impl Into<String>) -> Self {
        Self::ElementNotFound { locator: locator.into() }
    }

    /// Create a parse error carrying the offending raw text.
    pub fn parse(raw: impl Into<String>) -> Self {
        Self::Parse { raw: raw.into() }
    }

    /// Create a stale-date outcome.
    pub fn stale_date(requested: NaiveDate, published: Option<NaiveDate>) -> Self {
        Self::StaleDate { requested, published }
    }

    /// Create a resource error.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Classification of this error.
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Network { .. } => FetchErrorKind::Network,
            FetchError::ElementNotFound { .. } => FetchErrorKind::ElementNotFound,
            FetchError::Parse { .. } => FetchErrorKind::Parse,
            FetchError::StaleDate { .. } => FetchErrorKind::StaleDate,
            FetchError::Resource { .. } => FetchErrorKind::Resource,
            FetchError::Internal { .. } => FetchErrorKind::Internal,
        }
    }

    /// Whether another attempt may succeed where this one failed.
    ///
    /// Parse failures and stale dates are answers, not transient faults.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Whether the failure concerns the browser/session resource rather than one read.
    pub fn is_resource_level(&self) -> bool {
        matches!(self, FetchError::Resource { .. })
    }
}

impl FetchErrorKind {
    /// See [`FetchError::is_retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FetchErrorKind::Network | FetchErrorKind::ElementNotFound | FetchErrorKind::Resource
        )
    }

    /// Short label used in logs and JSON output.
    pub fn label(self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::ElementNotFound => "element_not_found",
            FetchErrorKind::Parse => "parse",
            FetchErrorKind::StaleDate => "stale_date",
            FetchErrorKind::Resource => "resource",
            FetchErrorKind::Internal => "internal",
        }
    }
}
