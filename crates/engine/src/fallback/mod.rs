//! Per-instrument cache of today, tomorrow and last-known rates for a
//! date-indexed publisher.
//!
//! A publication addressed to a date carries its own intrinsic date. The
//! addressed slot is only filled when the two match. The last-known rate
//! follows every today publication that is not older than the one it holds,
//! so a same-day correction replaces it.

mod cbr;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use ratewatch_types::{DatedRate, FallbackState, FetchError, Instrument, RateDay};
use tracing::debug;

pub use cbr::{CbrDailyClient, parse_daily_xml};

/// Date-indexed lookup against a daily-rate publication service.
///
/// Returns the publication's rate together with its intrinsic date, or
/// `None` when the publication does not list the instrument.
pub trait DailyRatePublisher: Send + Sync + fmt::Debug {
    fn fetch(&self, instrument: &Instrument, date: NaiveDate) -> Result<Option<DatedRate>, FetchError>;
}

/// Result of one refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The publication is for the requested date.
    Fresh(DatedRate),
    /// A publication exists but for another date; the addressed slot was cleared.
    Stale { requested: NaiveDate, published: NaiveDate },
    /// The publication does not list the instrument.
    Missing,
}

/// Shared dated fallback state, guarded by a mutex.
#[derive(Debug)]
pub struct DatedFallbackStore {
    publisher: Arc<dyn DailyRatePublisher>,
    states: Mutex<HashMap<Instrument, FallbackState>>,
}

impl DatedFallbackStore {
    pub fn new(publisher: Arc<dyn DailyRatePublisher>) -> Self {
        Self {
            publisher,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the publication addressed to `day` (relative to `today`) and update state.
    ///
    /// Blocks on the publisher; call from a blocking context. A failed fetch
    /// clears the addressed slot and leaves the last-known rate untouched.
    pub fn refresh(&self, instrument: &Instrument, day: RateDay, today: NaiveDate) -> Result<RefreshOutcome, FetchError> {
        let requested = day.resolve(today);
        let fetched = self.publisher.fetch(instrument, requested);

        let mut states = self.states.lock().expect("fallback state lock poisoned");
        let state = states.entry(instrument.clone()).or_default();
        let slot = match day {
            RateDay::Today => &mut state.today_rate,
            RateDay::Tomorrow => &mut state.tomorrow_rate,
        };

        let rate = match fetched {
            Ok(Some(rate)) => rate,
            Ok(None) => {
                *slot = None;
                return Ok(RefreshOutcome::Missing);
            }
            Err(error) => {
                *slot = None;
                return Err(error);
            }
        };

        let outcome = if rate.date == requested {
            *slot = Some(rate);
            RefreshOutcome::Fresh(rate)
        } else {
            *slot = None;
            debug!(%instrument, ?day, %requested, published = %rate.date, "Publication is for another date");
            RefreshOutcome::Stale {
                requested,
                published: rate.date,
            }
        };

        if day == RateDay::Today && state.last_known_rate.is_none_or(|known| rate.date >= known.date) {
            state.last_known_rate = Some(rate);
        }
        Ok(outcome)
    }

    /// Today's rate, falling back to the last known rate.
    pub fn get_today(&self, instrument: &Instrument) -> Option<DatedRate> {
        let states = self.states.lock().expect("fallback state lock poisoned");
        states
            .get(instrument)
            .and_then(|state| state.today_rate.or(state.last_known_rate))
    }

    /// Tomorrow's rate; never falls back.
    pub fn get_tomorrow(&self, instrument: &Instrument) -> Option<DatedRate> {
        let states = self.states.lock().expect("fallback state lock poisoned");
        states.get(instrument).and_then(|state| state.tomorrow_rate)
    }

    /// Copy of the state held for `instrument`.
    pub fn state(&self, instrument: &Instrument) -> FallbackState {
        let states = self.states.lock().expect("fallback state lock poisoned");
        states.get(instrument).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::collections::VecDeque;
    use std::str::FromStr;

    /// Replays scripted publications in order.
    #[derive(Debug, Default)]
    struct Scripted {
        answers: Mutex<VecDeque<Result<Option<DatedRate>, FetchError>>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<Option<DatedRate>, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
            })
        }
    }

    impl DailyRatePublisher for Scripted {
        fn fetch(&self, _instrument: &Instrument, _date: NaiveDate) -> Result<Option<DatedRate>, FetchError> {
            self.answers.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    fn rate(day: u32, value: &str) -> DatedRate {
        DatedRate::new(date(day), Decimal::from_str(value).unwrap())
    }

    fn usd() -> Instrument {
        Instrument::new("USD", "RUB").unwrap()
    }

    #[test]
    fn matching_date_sets_today() {
        let store = DatedFallbackStore::new(Scripted::new(vec![Ok(Some(rate(14, "91.00")))]));
        let outcome = store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        assert_eq!(outcome, RefreshOutcome::Fresh(rate(14, "91.00")));
        assert_eq!(store.get_today(&usd()), Some(rate(14, "91.00")));
    }

    #[test]
    fn stale_today_falls_back_to_last_known() {
        let store = DatedFallbackStore::new(Scripted::new(vec![Ok(Some(rate(13, "90.50")))]));
        let outcome = store.refresh(&usd(), RateDay::Today, date(14)).unwrap();

        assert!(matches!(outcome, RefreshOutcome::Stale { published, .. } if published == date(13)));
        let state = store.state(&usd());
        assert_eq!(state.today_rate, None);
        assert_eq!(state.last_known_rate, Some(rate(13, "90.50")));
        assert_eq!(store.get_today(&usd()), Some(rate(13, "90.50")));
    }

    #[test]
    fn tomorrow_requires_exact_date_and_never_falls_back() {
        let store = DatedFallbackStore::new(Scripted::new(vec![
            Ok(Some(rate(14, "91.00"))),
            Ok(Some(rate(14, "91.00"))),
            Ok(Some(rate(15, "91.40"))),
        ]));
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        store.refresh(&usd(), RateDay::Tomorrow, date(14)).unwrap();
        assert_eq!(store.get_tomorrow(&usd()), None);

        store.refresh(&usd(), RateDay::Tomorrow, date(14)).unwrap();
        assert_eq!(store.get_tomorrow(&usd()), Some(rate(15, "91.40")));
        assert_eq!(store.state(&usd()).last_known_rate, Some(rate(14, "91.00")));
    }

    #[test]
    fn last_known_never_moves_back_in_time() {
        let store = DatedFallbackStore::new(Scripted::new(vec![
            Ok(Some(rate(14, "91.00"))),
            Ok(Some(rate(12, "89.00"))),
        ]));
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();

        let state = store.state(&usd());
        assert_eq!(state.last_known_rate, Some(rate(14, "91.00")));
        assert_eq!(state.today_rate, None);
    }

    #[test]
    fn same_day_correction_survives_publisher_outage() {
        let store = DatedFallbackStore::new(Scripted::new(vec![
            Ok(Some(rate(14, "91.00"))),
            Ok(Some(rate(14, "95.00"))),
            Err(FetchError::network("publisher down")),
        ]));
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        assert!(store.refresh(&usd(), RateDay::Today, date(14)).is_err());

        let state = store.state(&usd());
        assert_eq!(state.today_rate, None);
        assert_eq!(state.last_known_rate, Some(rate(14, "95.00")));
        assert_eq!(store.get_today(&usd()), Some(rate(14, "95.00")));
    }

    #[test]
    fn failed_refresh_clears_slot_and_keeps_history() {
        let store = DatedFallbackStore::new(Scripted::new(vec![
            Ok(Some(rate(14, "91.00"))),
            Err(FetchError::network("timeout")),
        ]));
        store.refresh(&usd(), RateDay::Today, date(14)).unwrap();
        assert!(store.refresh(&usd(), RateDay::Today, date(14)).is_err());

        let state = store.state(&usd());
        assert_eq!(state.today_rate, None);
        assert_eq!(store.get_today(&usd()), Some(rate(14, "91.00")));
    }
}
