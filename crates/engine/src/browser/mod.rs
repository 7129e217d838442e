//! Browser abstraction used by the scrape adapter and the background refresher.
//!
//! A [`BrowserDriver`] creates isolated [`BrowserContext`]s (cookie jar and
//! navigation state). A context opens [`PageHandle`]s, each with its own
//! egress route. Sessions share one context across their own adapters and
//! never across sessions.

mod chromium;
mod static_html;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratewatch_types::FetchError;
use tracing::warn;

use crate::config::{BrowserConfig, BrowserDriverKind};
use crate::egress::EgressRoute;

pub use chromium::ChromiumDriver;
pub use static_html::StaticHtmlDriver;

/// Build the configured driver, falling back to [`StaticHtmlDriver`] when
/// Chromium cannot start and the fallback is enabled.
pub async fn launch_driver(config: &BrowserConfig) -> Result<Arc<dyn BrowserDriver>, FetchError> {
    match config.driver {
        BrowserDriverKind::Static => Ok(Arc::new(StaticHtmlDriver::default())),
        BrowserDriverKind::Chromium => match ChromiumDriver::launch(config).await {
            Ok(driver) => Ok(Arc::new(driver)),
            Err(error) if config.fallback_to_static => {
                warn!(error = %error, "Chromium unavailable; using the static HTML driver");
                Ok(Arc::new(StaticHtmlDriver::default()))
            }
            Err(error) => Err(error),
        },
    }
}

/// Creates isolated browsing contexts.
#[async_trait]
pub trait BrowserDriver: Send + Sync + fmt::Debug {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, FetchError>;
}

/// An isolated browsing context.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Process-unique identity, used in logs.
    fn id(&self) -> u64;

    /// Navigate a new page to `url` through `egress`, bounded by `timeout`.
    async fn open_page(&self, url: &str, egress: Option<EgressRoute>, timeout: Duration) -> Result<Box<dyn PageHandle>, FetchError>;

    /// Close the context; later `open_page` calls fail with a resource error.
    async fn close(&self);
}

/// One open page.
#[async_trait]
pub trait PageHandle: Send {
    fn url(&self) -> &str;

    /// Wait until an element matching `selector` is visible.
    async fn wait_for_visible(&mut self, selector: &str, timeout: Duration) -> Result<(), FetchError>;

    /// Text of the first visible element matching `selector`.
    async fn text_content(&mut self, selector: &str) -> Result<String, FetchError>;

    /// Click `selector` if it becomes visible within `timeout`; reports whether it did.
    async fn click_if_visible(&mut self, selector: &str, timeout: Duration) -> bool;

    /// Reload the current document.
    async fn refresh(&mut self) -> Result<(), FetchError>;

    /// Save a capture of the page at `path`, with the extension set by the
    /// driver. Returns the written file.
    async fn capture(&mut self, path: &Path) -> Result<PathBuf, FetchError>;

    async fn close(self: Box<Self>);
}
