use std::sync::Arc;

use chrono::NaiveDate;
use ratewatch_types::{FetchError, Instrument, RateDay, SourceId};
use ratewatch_util::moscow_today;
use tracing::debug;

use super::{BlockingSourceAdapter, Fetched};
use crate::fallback::DatedFallbackStore;

/// Refreshes the dated store for today and tomorrow, then reads both rows.
///
/// Today falls back to the last known rate; tomorrow never does.
pub struct DatedAdapter {
    source_id: SourceId,
    store: Arc<DatedFallbackStore>,
    today: fn() -> NaiveDate,
}

impl DatedAdapter {
    pub fn new(source_id: SourceId, store: Arc<DatedFallbackStore>) -> Self {
        Self::with_clock(source_id, store, moscow_today)
    }

    pub fn with_clock(source_id: SourceId, store: Arc<DatedFallbackStore>, today: fn() -> NaiveDate) -> Self {
        Self { source_id, store, today }
    }
}

impl BlockingSourceAdapter for DatedAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn fetch_blocking(&self, instrument: &Instrument) -> Result<Fetched, FetchError> {
        let today = (self.today)();
        let today_refresh = self.store.refresh(instrument, RateDay::Today, today);
        if let Err(error) = self.store.refresh(instrument, RateDay::Tomorrow, today) {
            debug!(source = %self.source_id, %instrument, error = %error, "Tomorrow's rate unavailable");
        }

        let Some(current) = self.store.get_today(instrument) else {
            return Err(match today_refresh {
                Err(error) => error,
                Ok(_) => FetchError::stale_date(today, None),
            });
        };
        Ok(Fetched {
            value: current.value,
            next_value: self.store.get_tomorrow(instrument).map(|rate| rate.value),
            artifact: None,
        })
    }
}
