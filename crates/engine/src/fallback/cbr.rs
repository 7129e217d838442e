//! Client for the Bank of Russia daily rate publication (`XML_daily.asp`).

use std::time::Duration;

use chrono::NaiveDate;
use ratewatch_types::{DatedRate, FetchError, Instrument};
use ratewatch_util::{format_request_date, parse_publication_date, sanitize_numeric};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use super::DailyRatePublisher;
use crate::config::DatedConfig;

/// Blocking client; run it from the blocking pool.
#[derive(Debug, Clone)]
pub struct CbrDailyClient {
    endpoint: String,
    timeout: Duration,
}

impl CbrDailyClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn from_config(config: &DatedConfig) -> Self {
        Self::new(config.endpoint.clone(), Duration::from_millis(config.timeout_ms))
    }

    fn request_url(&self, date: NaiveDate) -> String {
        format!("{}?date_req={}", self.endpoint, format_request_date(date))
    }
}

impl DailyRatePublisher for CbrDailyClient {
    fn fetch(&self, instrument: &Instrument, date: NaiveDate) -> Result<Option<DatedRate>, FetchError> {
        if instrument.quote() != "RUB" {
            return Ok(None);
        }

        // Built per call so the client never outlives the blocking thread.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| FetchError::resource(format!("building CBR client: {error}")))?;
        let url = self.request_url(date);
        let response = client
            .get(&url)
            .send()
            .map_err(|error| FetchError::network(format!("GET {url}: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!("GET {url}: HTTP {status}")));
        }
        let body = response.text().map_err(|error| FetchError::network(format!("reading {url}: {error}")))?;
        let rate = parse_daily_xml(&body, instrument.base())?;
        debug!(%instrument, requested = %date, published = ?rate.map(|r| r.date), "Fetched CBR publication");
        Ok(rate)
    }
}

#[derive(Debug, Deserialize)]
struct ValCurs {
    #[serde(rename = "@Date")]
    date: String,
    #[serde(rename = "Valute", default)]
    valutes: Vec<Valute>,
}

#[derive(Debug, Deserialize)]
struct Valute {
    #[serde(rename = "CharCode")]
    char_code: String,
    #[serde(rename = "Nominal")]
    nominal: String,
    #[serde(rename = "Value")]
    value: String,
}

/// Rate per one unit of `char_code` from a `ValCurs` document, dated by `ValCurs@Date`.
pub fn parse_daily_xml(xml: &str, char_code: &str) -> Result<Option<DatedRate>, FetchError> {
    let document: ValCurs = quick_xml::de::from_str(xml).map_err(|error| FetchError::parse(format!("CBR document: {error}")))?;
    let date = parse_publication_date(&document.date).ok_or_else(|| FetchError::parse(document.date.clone()))?;

    let Some(valute) = document
        .valutes
        .iter()
        .find(|valute| valute.char_code.trim().eq_ignore_ascii_case(char_code))
    else {
        return Ok(None);
    };

    let value = sanitize_numeric(&valute.value)?;
    let nominal = sanitize_numeric(&valute.nominal)?;
    if nominal.is_zero() {
        return Err(FetchError::parse(valute.nominal.clone()));
    }
    let per_unit = if nominal == Decimal::ONE { value } else { (value / nominal).normalize() };
    Ok(Some(DatedRate::new(date, per_unit)))
}
