//! Configuration validation.

use std::collections::HashSet;

use ratewatch_types::Instrument;
use thiserror::Error;
use tracing::debug;

use crate::config::{InstrumentConfig, RatewatchConfig, SourceConfig, SourceKind};

/// Validate the entire configuration.
pub fn validate_config(config: &RatewatchConfig) -> Result<(), ValidationError> {
    if config.retry.attempts == 0 {
        return Err(ValidationError::InvalidValue {
            field: "retry.attempts".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let refresher = &config.refresher;
    for (field, value) in [
        ("refresher.refreshIntervalSecs", refresher.refresh_interval_secs),
        ("refresher.renewalIntervalSecs", refresher.renewal_interval_secs),
    ] {
        if value == 0 {
            return Err(ValidationError::InvalidValue {
                field: field.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
    }

    for target in &refresher.targets {
        parse_instrument_key(&target.instrument)?;
        if target.selector.trim().is_empty() {
            return Err(ValidationError::MissingRequiredField {
                source_id: format!("refresher:{}", target.instrument),
                field: "selector".to_string(),
            });
        }
    }

    for route in &config.egress.routes {
        if route.server.trim().is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "egress.routes.server".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
    }

    for (key, instrument) in &config.instruments {
        parse_instrument_key(key)?;
        validate_instrument(key, instrument)?;
        debug!(instrument = %key, "Validated instrument configuration");
    }
    Ok(())
}

fn parse_instrument_key(key: &str) -> Result<Instrument, ValidationError> {
    key.parse().map_err(|error: ratewatch_types::InstrumentParseError| ValidationError::InvalidInstrument {
        key: key.to_string(),
        reason: error.to_string(),
    })
}

fn validate_instrument(key: &str, instrument: &InstrumentConfig) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    let mut dated = 0;
    let mut cached = 0;
    for source in &instrument.sources {
        if source.id.trim().is_empty() {
            return Err(ValidationError::InvalidInstrument {
                key: key.to_string(),
                reason: "source id cannot be empty".to_string(),
            });
        }
        if !seen.insert(source.id.as_str()) {
            return Err(ValidationError::DuplicateSource {
                instrument: key.to_string(),
                source_id: source.id.clone(),
            });
        }
        match source.kind {
            SourceKind::Dated => dated += 1,
            SourceKind::Cached => cached += 1,
            _ => {}
        }
        validate_source(source)?;
    }
    if dated > 1 || cached > 1 {
        return Err(ValidationError::InvalidInstrument {
            key: key.to_string(),
            reason: "at most one dated and one cached source are allowed".to_string(),
        });
    }
    Ok(())
}

/// Validate the fields a single source kind requires.
pub fn validate_source(source: &SourceConfig) -> Result<(), ValidationError> {
    let required = match source.kind {
        SourceKind::Scrape => vec![("url", &source.url), ("selector", &source.selector)],
        SourceKind::HttpJson => vec![("url", &source.url), ("fieldPath", &source.field_path)],
        SourceKind::Cached | SourceKind::Dated => Vec::new(),
    };
    for (field, value) in required {
        if value.as_deref().is_none_or(|text| text.trim().is_empty()) {
            return Err(ValidationError::MissingRequiredField {
                source_id: source.id.clone(),
                field: field.to_string(),
            });
        }
    }

    if let Some(url) = &source.url {
        let parsed = url::Url::parse(url).map_err(|error| ValidationError::InvalidValue {
            field: format!("{}.url", source.id),
            reason: error.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ValidationError::InvalidValue {
                field: format!("{}.url", source.id),
                reason: format!("Unsupported URL scheme: {} (expected http/https)", parsed.scheme()),
            });
        }
    }
    Ok(())
}

/// Errors that can occur during validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid instrument '{key}': {reason}")]
    InvalidInstrument { key: String, reason: String },

    #[error("Source '{source_id}' configured twice for {instrument}")]
    DuplicateSource { instrument: String, source_id: String },

    #[error("Missing required field '{field}' for source '{source_id}'")]
    MissingRequiredField { source_id: String, field: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrape(id: &str) -> SourceConfig {
        SourceConfig {
            url: Some("https://www.moex.com/ru/derivatives/currency-rate.aspx?currency=USD_RUB".to_string()),
            selector: Some("table tbody tr td".to_string()),
            ..SourceConfig::new(id, "MOEX", SourceKind::Scrape)
        }
    }

    #[test]
    fn builtin_catalog_is_valid() {
        assert!(validate_config(&RatewatchConfig::default()).is_ok());
    }

    #[test]
    fn rejects_duplicate_source_ids() {
        let mut config = RatewatchConfig::default();
        config.instruments.insert(
            "USD/RUB".to_string(),
            InstrumentConfig {
                sources: vec![scrape("moex"), scrape("moex")],
            },
        );
        assert!(matches!(validate_config(&config), Err(ValidationError::DuplicateSource { .. })));
    }

    #[test]
    fn rejects_scrape_without_selector() {
        let source = SourceConfig {
            selector: None,
            ..scrape("moex")
        };
        assert!(matches!(
            validate_source(&source),
            Err(ValidationError::MissingRequiredField { field, .. }) if field == "selector"
        ));
    }

    #[test]
    fn rejects_non_http_urls_and_bad_keys() {
        let source = SourceConfig {
            url: Some("ftp://example.com/rates".to_string()),
            ..scrape("moex")
        };
        assert!(validate_source(&source).is_err());

        let mut config = RatewatchConfig::default();
        config.instruments.insert("dollars".to_string(), InstrumentConfig::default());
        assert!(matches!(validate_config(&config), Err(ValidationError::InvalidInstrument { .. })));
    }

    #[test]
    fn rejects_zero_attempts() {
        let mut config = RatewatchConfig::default();
        config.retry.attempts = 0;
        assert!(validate_config(&config).is_err());
    }
}
