//! Date-indexed rates and the per-instrument fallback state built from them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A published rate together with the publication's intrinsic date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatedRate {
    pub date: NaiveDate,
    pub value: Decimal,
}

impl DatedRate {
    pub fn new(date: NaiveDate, value: Decimal) -> Self {
        Self { date, value }
    }
}

/// Which calendar day a lookup is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateDay {
    Today,
    Tomorrow,
}

impl RateDay {
    /// The concrete date this day resolves to, given today's date.
    pub fn resolve(self, today: NaiveDate) -> NaiveDate {
        match self {
            RateDay::Today => today,
            RateDay::Tomorrow => today.succ_opt().unwrap_or(today),
        }
    }
}

/// Cached rates for one instrument from a dated source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackState {
    pub today_rate: Option<DatedRate>,
    pub tomorrow_rate: Option<DatedRate>,
    pub last_known_rate: Option<DatedRate>,
}
