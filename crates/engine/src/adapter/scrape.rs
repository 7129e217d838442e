use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratewatch_types::{FetchError, Instrument, SourceId};
use tokio::time::sleep;
use tracing::debug;

use super::{Fetched, SourceAdapter, required};
use crate::browser::{BrowserContext, PageHandle};
use crate::config::{ConfigError, SourceConfig};
use crate::egress::RouteSelector;
use crate::fetch::{RetryPolicy, fetch_with_retry};

/// Wait bound for the best-effort banner dismissal.
const DISMISS_TIMEOUT: Duration = Duration::from_secs(3);

/// Page locator specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeDescriptor {
    pub url: String,
    pub selector: String,
    pub dismiss_selector: Option<String>,
    pub settle: Duration,
    pub timeout: Duration,
}

impl ScrapeDescriptor {
    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            url: required(source, &source.url, "url")?.to_string(),
            selector: required(source, &source.selector, "selector")?.to_string(),
            dismiss_selector: source.dismiss_selector.clone(),
            settle: source.settle(),
            timeout: source.timeout(),
        })
    }
}

/// Reads a visible element's text from a rendered page.
pub struct ScrapeAdapter {
    source_id: SourceId,
    descriptor: ScrapeDescriptor,
    context: Arc<dyn BrowserContext>,
    routes: Arc<dyn RouteSelector>,
    retry: RetryPolicy,
}

impl ScrapeAdapter {
    pub fn new(
        source_id: SourceId,
        descriptor: ScrapeDescriptor,
        context: Arc<dyn BrowserContext>,
        routes: Arc<dyn RouteSelector>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source_id,
            descriptor,
            context,
            routes,
            retry,
        }
    }

    async fn attempt(&self) -> Result<String, FetchError> {
        let route = self.routes.select();
        debug!(source = %self.source_id, url = %self.descriptor.url, egress = ?route.as_ref().map(ToString::to_string), "Opening page");
        let mut page = self
            .context
            .open_page(&self.descriptor.url, route, self.descriptor.timeout)
            .await?;
        let text = read_page(page.as_mut(), &self.descriptor).await;
        page.close().await;
        text
    }
}

async fn read_page(page: &mut dyn PageHandle, descriptor: &ScrapeDescriptor) -> Result<String, FetchError> {
    if !descriptor.settle.is_zero() {
        sleep(descriptor.settle).await;
    }
    if let Some(dismiss) = &descriptor.dismiss_selector
        && page.click_if_visible(dismiss, DISMISS_TIMEOUT).await
    {
        debug!(url = page.url(), selector = %dismiss, "Dismissed banner");
    }
    page.wait_for_visible(&descriptor.selector, descriptor.timeout).await?;
    page.text_content(&descriptor.selector).await
}

#[async_trait]
impl SourceAdapter for ScrapeAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
        let value = fetch_with_retry(&self.retry, self.source_id.as_str(), |_| self.attempt()).await?;
        Ok(Fetched::value(value))
    }
}
