use std::sync::Arc;

use async_trait::async_trait;
use ratewatch_types::{FetchError, Instrument, SourceId};

use super::{Fetched, SourceAdapter};
use crate::refresher::RefresherCache;

/// Non-blocking read of the background refresher's latest value.
pub struct CachedAdapter {
    source_id: SourceId,
    cache: Arc<RefresherCache>,
}

impl CachedAdapter {
    pub fn new(source_id: SourceId, cache: Arc<RefresherCache>) -> Self {
        Self { source_id, cache }
    }
}

#[async_trait]
impl SourceAdapter for CachedAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn fetch(&self, instrument: &Instrument) -> Result<Fetched, FetchError> {
        let entry = self
            .cache
            .get(instrument)
            .ok_or_else(|| FetchError::element_not_found(format!("refresher cache entry for {instrument}")))?;
        Ok(Fetched {
            value: entry.last_value,
            next_value: None,
            artifact: entry.screenshot_ref.clone(),
        })
    }
}
