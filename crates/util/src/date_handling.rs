//! # Date Handling Utilities
//!
//! Rates are published against the Moscow calendar; these helpers pin
//! "today" to that zone and format the dates used by the daily-rate
//! publisher and the rendered table title.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

/// Moscow has observed UTC+3 year-round since 2014.
pub const MOSCOW_UTC_OFFSET_SECONDS: i32 = 3 * 3600;

/// Fixed offset for Moscow time.
pub fn moscow_offset() -> FixedOffset {
    FixedOffset::east_opt(MOSCOW_UTC_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
}

/// Convert an instant to Moscow local time.
pub fn to_moscow(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    instant.with_timezone(&moscow_offset())
}

/// Calendar date in Moscow at `instant`.
pub fn moscow_date(instant: DateTime<Utc>) -> NaiveDate {
    to_moscow(instant).date_naive()
}

/// Today's calendar date in Moscow.
pub fn moscow_today() -> NaiveDate {
    moscow_date(Utc::now())
}

/// The calendar day after `date`, saturating at the end of the supported range.
pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// `DD/MM/YYYY`, the request-date form of the daily publisher.
pub fn format_request_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// Parse a publication date in `DD.MM.YYYY` form.
pub fn parse_publication_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%d.%m.%Y").ok()
}

/// `DD.MM.YYYY HH:MM` in Moscow time, as shown in table titles.
pub fn format_title_timestamp(instant: DateTime<Utc>) -> String {
    to_moscow(instant).format("%d.%m.%Y %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn moscow_date_rolls_over_at_21_utc() {
        let before = Utc.with_ymd_and_hms(2026, 10, 14, 20, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 10, 14, 21, 0, 0).unwrap();
        assert_eq!(moscow_date(before), NaiveDate::from_ymd_opt(2026, 10, 14).unwrap());
        assert_eq!(moscow_date(after), NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
    }

    #[test]
    fn formats_publisher_and_title_dates() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert_eq!(format_request_date(date), "07/03/2026");
        assert_eq!(parse_publication_date("07.03.2026"), Some(date));
        assert_eq!(parse_publication_date("2026-03-07"), None);
        assert_eq!(next_day(date), NaiveDate::from_ymd_opt(2026, 3, 8).unwrap());

        let instant = Utc.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(format_title_timestamp(instant), "07.03.2026 12:05");
    }
}
