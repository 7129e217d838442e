//! Instrument identity and currency-family classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A currency pair such as `USD/RUB`.
///
/// Codes are normalized to upper-case three-letter ASCII codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Instrument {
    base: String,
    quote: String,
}

/// Rejection of an instrument string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstrumentParseError {
    #[error("invalid currency code '{code}': expected three ASCII letters")]
    InvalidCode { code: String },
    #[error("invalid instrument '{input}': expected BASE/QUOTE, BASEQUOTE or a bare base code")]
    InvalidFormat { input: String },
}

impl Instrument {
    /// Build an instrument from two currency codes.
    pub fn new(base: &str, quote: &str) -> Result<Self, InstrumentParseError> {
        Ok(Self {
            base: normalize_code(base)?,
            quote: normalize_code(quote)?,
        })
    }

    /// Parse `USD/RUB`, `usdrub`, or a bare `usd` which takes `default_quote`.
    pub fn parse_with_default(input: &str, default_quote: &str) -> Result<Self, InstrumentParseError> {
        let trimmed = input.trim();
        if trimmed.len() == 3 && !trimmed.contains('/') {
            return Self::new(trimmed, default_quote);
        }
        trimmed.parse()
    }

    /// Base currency code (`USD` in `USD/RUB`).
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote currency code (`RUB` in `USD/RUB`).
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// Currency family of the base currency.
    pub fn family(&self) -> CurrencyFamily {
        CurrencyFamily::classify(self)
    }
}

fn normalize_code(code: &str) -> Result<String, InstrumentParseError> {
    let trimmed = code.trim();
    if trimmed.len() != 3 || !trimmed.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(InstrumentParseError::InvalidCode { code: code.to_string() });
    }
    Ok(trimmed.to_ascii_uppercase())
}

impl FromStr for Instrument {
    type Err = InstrumentParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if let Some((base, quote)) = trimmed.split_once('/') {
            return Self::new(base, quote);
        }
        if trimmed.len() == 6 && trimmed.is_ascii() {
            let (base, quote) = trimmed.split_at(3);
            return Self::new(base, quote);
        }
        Err(InstrumentParseError::InvalidFormat { input: input.to_string() })
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl TryFrom<String> for Instrument {
    type Error = InstrumentParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Instrument> for String {
    fn from(value: Instrument) -> Self {
        value.to_string()
    }
}

/// Classification used to pick the family-specific extra rows of a rendered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurrencyFamily {
    Usd,
    Eur,
    Cny,
    Other,
}

impl CurrencyFamily {
    /// Classify an instrument by its base currency.
    pub fn classify(instrument: &Instrument) -> Self {
        match instrument.base() {
            "USD" => CurrencyFamily::Usd,
            "EUR" => CurrencyFamily::Eur,
            "CNY" => CurrencyFamily::Cny,
            _ => CurrencyFamily::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_and_compact_forms() {
        let slash: Instrument = "usd/rub".parse().unwrap();
        let compact: Instrument = "USDRUB".parse().unwrap();
        assert_eq!(slash, compact);
        assert_eq!(slash.to_string(), "USD/RUB");
    }

    #[test]
    fn bare_code_takes_default_quote() {
        let instrument = Instrument::parse_with_default("cny", "RUB").unwrap();
        assert_eq!(instrument.to_string(), "CNY/RUB");
        assert_eq!(instrument.family(), CurrencyFamily::Cny);
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(matches!(
            "US/RUB".parse::<Instrument>(),
            Err(InstrumentParseError::InvalidCode { .. })
        ));
        assert!(matches!(
            "dollar".parse::<Instrument>(),
            Err(InstrumentParseError::InvalidCode { .. })
        ));
        assert!(matches!(
            "usd".parse::<Instrument>(),
            Err(InstrumentParseError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn serde_uses_display_form() {
        let instrument = Instrument::new("eur", "rub").unwrap();
        let json = serde_json::to_string(&instrument).unwrap();
        assert_eq!(json, "\"EUR/RUB\"");
        let decoded: Instrument = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.family(), CurrencyFamily::Eur);
    }
}
