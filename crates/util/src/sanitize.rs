//! Numeric sanitization of scraped or fetched text.
//!
//! Upstream pages render rates with locale-specific grouping and decimal
//! separators (`91,2000`, `1 234,56`, `1,234.56`). Everything except digits,
//! separators and a leading minus is dropped and the decimal separator is
//! normalized to `.` before parsing.

use std::str::FromStr;

use ratewatch_types::FetchError;
use rust_decimal::Decimal;

/// Sanitize `raw` and parse it as a decimal, preserving its scale.
///
/// Returns [`FetchError::Parse`] when nothing numeric survives cleanup.
///
/// # Example
/// ```rust
/// use ratewatch_util::sanitize_numeric;
///
/// assert_eq!(sanitize_numeric("91,20 ₽").unwrap().to_string(), "91.20");
/// assert_eq!(sanitize_numeric("1,234.50").unwrap().to_string(), "1234.50");
/// assert!(sanitize_numeric("n/a").is_err());
/// ```
pub fn sanitize_numeric(raw: &str) -> Result<Decimal, FetchError> {
    let cleaned = sanitize_text(raw).ok_or_else(|| FetchError::parse(raw))?;
    Decimal::from_str(&cleaned).map_err(|_| FetchError::parse(raw))
}

/// Reduce `raw` to a canonical numeric string, or `None` when no digit remains.
pub fn sanitize_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start();
    let negative = trimmed.starts_with('-') || trimmed.starts_with('\u{2212}');
    let kept: String = trimmed
        .chars()
        .filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == ',')
        .collect();
    if !kept.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let canonical = normalize_separators(&kept);
    Some(if negative { format!("-{canonical}") } else { canonical })
}

fn normalize_separators(text: &str) -> String {
    let dots = text.matches('.').count();
    let commas = text.matches(',').count();

    let decimal = match (dots, commas) {
        (0, 0) => None,
        (_, 0) if dots == 1 => Some('.'),
        (0, _) if commas == 1 => Some(','),
        (_, 0) | (0, _) => None,
        _ => {
            let last_dot = text.rfind('.');
            let last_comma = text.rfind(',');
            if last_comma > last_dot { Some(',') } else { Some('.') }
        }
    };

    text.chars()
        .filter_map(|ch| match ch {
            '.' | ',' if Some(ch) == decimal => Some('.'),
            '.' | ',' => None,
            digit => Some(digit),
        })
        .collect()
}
