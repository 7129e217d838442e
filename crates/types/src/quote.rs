//! Quotes produced by source adapters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{FetchErrorKind, Instrument};

/// Stable identity of a configured source (for example `moex` or `cbr`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity of whoever asked for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub i64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One source's answer for one instrument. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub source_id: SourceId,
    pub instrument: Instrument,
    /// Sanitized value, absent when the fetch failed.
    pub value: Option<Decimal>,
    /// Next-day value published by a dated source, rendered on its own row.
    pub next_value: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
    /// Classification of the failure when `value` is absent.
    pub failure: Option<FetchErrorKind>,
}

impl Quote {
    /// A quote carrying a value.
    pub fn resolved(source_id: SourceId, instrument: Instrument, value: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            source_id,
            instrument,
            value: Some(value),
            next_value: None,
            observed_at,
            failure: None,
        }
    }

    /// A quote recording that the source produced nothing.
    pub fn absent(source_id: SourceId, instrument: Instrument, failure: FetchErrorKind, observed_at: DateTime<Utc>) -> Self {
        Self {
            source_id,
            instrument,
            value: None,
            next_value: None,
            observed_at,
            failure: Some(failure),
        }
    }

    /// Attach a next-day value.
    pub fn with_next_value(mut self, next_value: Option<Decimal>) -> Self {
        self.next_value = next_value;
        self
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}
