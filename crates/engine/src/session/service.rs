use std::sync::Arc;

use chrono::Utc;
use ratewatch_types::{Instrument, RequesterId, SnapshotError};
use thiserror::Error;
use tracing::warn;

use super::{AggregationSession, SessionReport};
use crate::adapter::{AdapterResources, SessionBrowser, build_adapters, needs_browser};
use crate::browser::BrowserDriver;
use crate::config::{ConfigError, RatewatchConfig};
use crate::gate::{ExclusivityGate, GateError};
use crate::render::{OutputChannel, TableLayout};

/// Reply shown to a requester whose previous session is still running.
pub const CONFLICT_MESSAGE: &str = "A request is already being processed for you.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

impl SessionError {
    /// Whether the request was rejected because the requester already holds the gate.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SessionError::Gate(GateError::ConcurrencyConflict { .. }))
    }
}

/// Entry point for requests: gate, build and run one session.
#[derive(Clone)]
pub struct SessionService {
    config: Arc<RatewatchConfig>,
    gate: Arc<ExclusivityGate>,
    driver: Arc<dyn BrowserDriver>,
    resources: AdapterResources,
}

impl SessionService {
    pub fn new(config: Arc<RatewatchConfig>, gate: Arc<ExclusivityGate>, driver: Arc<dyn BrowserDriver>, resources: AdapterResources) -> Self {
        Self {
            config,
            gate,
            driver,
            resources,
        }
    }

    pub fn config(&self) -> &RatewatchConfig {
        &self.config
    }

    /// Run a session for `requester`. The gate lease is held until this returns.
    pub async fn start(&self, requester: RequesterId, instrument: &Instrument, channel: Arc<dyn OutputChannel>) -> Result<SessionReport, SessionError> {
        let _lease = self.gate.lease(requester)?;
        let sources = self.config.sources_for(instrument)?;

        let browser = if needs_browser(sources) {
            match self.driver.new_context().await {
                Ok(context) => SessionBrowser::Ready(context),
                Err(error) => {
                    warn!(requester = %requester, error = %error, "Failed to create browser context; scrape sources will be absent");
                    SessionBrowser::Failed(error)
                }
            }
        } else {
            SessionBrowser::NotNeeded
        };

        let adapters = match build_adapters(sources, &self.resources, &browser) {
            Ok(adapters) => adapters,
            Err(error) => {
                if let Some(context) = browser.context() {
                    context.close().await;
                }
                return Err(error.into());
            }
        };

        let layout = TableLayout::new(instrument, sources, Utc::now());
        let session = AggregationSession::new(requester, instrument.clone(), layout, adapters).with_context(browser.context().cloned());
        Ok(session.run(channel).await?)
    }
}
