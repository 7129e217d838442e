//! Source adapters: one fetch capability per upstream provider.
//!
//! Cooperative adapters implement [`SourceAdapter`] and run on the async
//! scheduler. The dated adapter blocks on its HTTP client and implements
//! [`BlockingSourceAdapter`]; [`Adapter::spawn`] sends it to the blocking pool.

mod cached;
mod dated;
mod http_json;
mod scrape;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ratewatch_types::{FetchError, Instrument, SourceId};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::browser::BrowserContext;
use crate::config::{ConfigError, SourceConfig, SourceKind};
use crate::egress::{RouteClients, RouteSelector};
use crate::fallback::DatedFallbackStore;
use crate::fetch::RetryPolicy;
use crate::refresher::RefresherCache;

pub use cached::CachedAdapter;
pub use dated::DatedAdapter;
pub use http_json::{HttpJsonAdapter, HttpJsonDescriptor};
pub use scrape::{ScrapeAdapter, ScrapeDescriptor};

/// Successful adapter result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub value: Decimal,
    /// Next-day value, only produced by the dated adapter.
    pub next_value: Option<Decimal>,
    /// Side artifact (page capture) to forward with the table.
    pub artifact: Option<PathBuf>,
}

impl Fetched {
    pub fn value(value: Decimal) -> Self {
        Self {
            value,
            next_value: None,
            artifact: None,
        }
    }
}

/// Adapter running on the async scheduler.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &SourceId;

    async fn fetch(&self, instrument: &Instrument) -> Result<Fetched, FetchError>;
}

/// Adapter performing blocking I/O; always run off the async scheduler.
pub trait BlockingSourceAdapter: Send + Sync {
    fn source_id(&self) -> &SourceId;

    fn fetch_blocking(&self, instrument: &Instrument) -> Result<Fetched, FetchError>;
}

/// A configured adapter, tagged by how it must be dispatched.
#[derive(Clone)]
pub enum Adapter {
    Cooperative(Arc<dyn SourceAdapter>),
    Blocking(Arc<dyn BlockingSourceAdapter>),
}

impl Adapter {
    pub fn source_id(&self) -> &SourceId {
        match self {
            Adapter::Cooperative(adapter) => adapter.source_id(),
            Adapter::Blocking(adapter) => adapter.source_id(),
        }
    }

    /// Start the fetch as its own task.
    pub fn spawn(self, instrument: Instrument) -> JoinHandle<Result<Fetched, FetchError>> {
        match self {
            Adapter::Cooperative(adapter) => tokio::spawn(async move { adapter.fetch(&instrument).await }),
            Adapter::Blocking(adapter) => tokio::task::spawn_blocking(move || adapter.fetch_blocking(&instrument)),
        }
    }
}

/// Stands in for a source whose prerequisites could not be set up.
pub struct UnavailableAdapter {
    source_id: SourceId,
    error: FetchError,
}

impl UnavailableAdapter {
    pub fn new(source_id: SourceId, error: FetchError) -> Self {
        Self { source_id, error }
    }
}

#[async_trait]
impl SourceAdapter for UnavailableAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
        Err(self.error.clone())
    }
}

/// Shared dependencies adapters are built from.
#[derive(Clone)]
pub struct AdapterResources {
    pub routes: Arc<dyn RouteSelector>,
    /// HTTP clients reused across sessions, one per route.
    pub http: Arc<RouteClients>,
    pub retry: RetryPolicy,
    pub cache: Arc<RefresherCache>,
    pub dated: Arc<DatedFallbackStore>,
}

/// Browser context state of one session.
#[derive(Clone)]
pub enum SessionBrowser {
    /// No configured source scrapes pages.
    NotNeeded,
    Ready(Arc<dyn BrowserContext>),
    /// Context creation failed; scrape sources resolve absent with this error.
    Failed(FetchError),
}

impl SessionBrowser {
    pub fn context(&self) -> Option<&Arc<dyn BrowserContext>> {
        match self {
            SessionBrowser::Ready(context) => Some(context),
            _ => None,
        }
    }
}

/// Whether any of `sources` needs a browser context.
pub fn needs_browser(sources: &[SourceConfig]) -> bool {
    sources.iter().any(|source| source.kind == SourceKind::Scrape)
}

/// Build one adapter per configured source, in configured order.
pub fn build_adapters(sources: &[SourceConfig], resources: &AdapterResources, browser: &SessionBrowser) -> Result<Vec<Adapter>, ConfigError> {
    sources.iter().map(|source| build_adapter(source, resources, browser)).collect()
}

fn build_adapter(source: &SourceConfig, resources: &AdapterResources, browser: &SessionBrowser) -> Result<Adapter, ConfigError> {
    let source_id = SourceId::new(source.id.clone());
    let adapter = match source.kind {
        SourceKind::Scrape => {
            let descriptor = ScrapeDescriptor::from_config(source)?;
            match browser {
                SessionBrowser::Ready(context) => Adapter::Cooperative(Arc::new(ScrapeAdapter::new(
                    source_id,
                    descriptor,
                    context.clone(),
                    resources.routes.clone(),
                    resources.retry,
                ))),
                SessionBrowser::Failed(error) => Adapter::Cooperative(Arc::new(UnavailableAdapter::new(source_id, error.clone()))),
                SessionBrowser::NotNeeded => Adapter::Cooperative(Arc::new(UnavailableAdapter::new(
                    source_id,
                    FetchError::resource("no browser context for this session"),
                ))),
            }
        }
        SourceKind::HttpJson => Adapter::Cooperative(Arc::new(HttpJsonAdapter::new(
            source_id,
            HttpJsonDescriptor::from_config(source)?,
            resources.routes.clone(),
            resources.http.clone(),
            resources.retry,
        ))),
        SourceKind::Cached => Adapter::Cooperative(Arc::new(CachedAdapter::new(source_id, resources.cache.clone()))),
        SourceKind::Dated => Adapter::Blocking(Arc::new(DatedAdapter::new(source_id, resources.dated.clone()))),
    };
    Ok(adapter)
}

fn required<'a>(source: &'a SourceConfig, value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or_else(|| ConfigError::MissingField {
        source_id: source.id.clone(),
        field,
        kind: source.kind.as_str(),
    })
}
