//! Latest refresher values, readable without waiting on refresh activity.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use ratewatch_types::Instrument;
use rust_decimal::Decimal;

/// Latest observation for one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefresherCacheEntry {
    pub last_value: Decimal,
    pub last_observed_at: DateTime<Utc>,
    /// Capture of the page the value was read from.
    pub screenshot_ref: Option<PathBuf>,
}

/// Copy-on-write map; readers are wait-free and only the refresher writes.
#[derive(Debug, Default)]
pub struct RefresherCache {
    entries: ArcSwap<HashMap<Instrument, RefresherCacheEntry>>,
}

impl RefresherCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instrument: &Instrument) -> Option<RefresherCacheEntry> {
        self.entries.load().get(instrument).cloned()
    }

    pub fn last_value(&self, instrument: &Instrument) -> Option<Decimal> {
        self.entries.load().get(instrument).map(|entry| entry.last_value)
    }

    pub fn screenshot_ref(&self, instrument: &Instrument) -> Option<PathBuf> {
        self.entries.load().get(instrument).and_then(|entry| entry.screenshot_ref.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    pub(crate) fn update(&self, instrument: Instrument, entry: RefresherCacheEntry) {
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(instrument.clone(), entry.clone());
            Arc::new(next)
        });
    }
}
