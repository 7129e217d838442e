//! Browser driver over plain HTTP and server-rendered HTML.
//!
//! Pages are fetched with `reqwest` and queried with `scraper` CSS
//! selectors. Each context owns a cookie jar and one client per egress
//! route; the route is still chosen per page. Captures save the fetched
//! document as `.html`. Pages that only render client-side need
//! [`ChromiumDriver`](super::ChromiumDriver).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ratewatch_types::FetchError;
use reqwest::cookie::Jar;
use scraper::{ElementRef, Html, Selector};
use tokio::time::{Instant, sleep};
use tracing::debug;

use super::{BrowserContext, BrowserDriver, PageHandle};
use crate::egress::{EgressRoute, RouteClients};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Reload cadence while waiting for an element.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// HTTP-backed [`BrowserDriver`].
#[derive(Debug, Clone)]
pub struct StaticHtmlDriver {
    user_agent: String,
}

impl Default for StaticHtmlDriver {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl StaticHtmlDriver {
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl BrowserDriver for StaticHtmlDriver {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, FetchError> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, "Created static HTML context");
        let jar = Arc::new(Jar::default());
        let user_agent = self.user_agent.clone();
        Ok(Arc::new(StaticContext {
            id,
            clients: RouteClients::new(move || {
                reqwest::Client::builder()
                    .cookie_provider(jar.clone())
                    .user_agent(user_agent.clone())
            }),
            closed: AtomicBool::new(false),
        }))
    }
}

struct StaticContext {
    id: u64,
    clients: RouteClients,
    closed: AtomicBool,
}

#[async_trait]
impl BrowserContext for StaticContext {
    fn id(&self) -> u64 {
        self.id
    }

    async fn open_page(&self, url: &str, egress: Option<EgressRoute>, timeout: Duration) -> Result<Box<dyn PageHandle>, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::resource(format!("context {} is closed", self.id)));
        }

        let client = self.clients.client_for(egress.as_ref())?;
        let mut page = StaticPage {
            client,
            url: url.to_string(),
            timeout,
            html: String::new(),
        };
        page.load().await?;
        debug!(context = self.id, url, egress = ?egress.as_ref().map(ToString::to_string), "Opened page");
        Ok(Box::new(page))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        debug!(context = self.id, "Closed static HTML context");
    }
}

struct StaticPage {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    html: String,
}

impl StaticPage {
    async fn load(&mut self) -> Result<(), FetchError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| FetchError::network(format!("GET {}: {error}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::network(format!("GET {}: HTTP {status}", self.url)));
        }
        self.html = response
            .text()
            .await
            .map_err(|error| FetchError::network(format!("reading {}: {error}", self.url)))?;
        Ok(())
    }
}

#[async_trait]
impl PageHandle for StaticPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn wait_for_visible(&mut self, selector: &str, timeout: Duration) -> Result<(), FetchError> {
        let deadline = Instant::now() + timeout;
        loop {
            if visible_text(&self.html, selector)?.is_some() {
                return Ok(());
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Err(FetchError::element_not_found(selector));
            }
            sleep(POLL_INTERVAL).await;
            self.load().await?;
        }
    }

    async fn text_content(&mut self, selector: &str) -> Result<String, FetchError> {
        visible_text(&self.html, selector)?.ok_or_else(|| FetchError::element_not_found(selector))
    }

    async fn click_if_visible(&mut self, selector: &str, timeout: Duration) -> bool {
        // Static documents have no scripts to dismiss; report presence only.
        self.wait_for_visible(selector, timeout).await.is_ok()
    }

    async fn refresh(&mut self) -> Result<(), FetchError> {
        self.load().await
    }

    async fn capture(&mut self, path: &Path) -> Result<PathBuf, FetchError> {
        let path = path.with_extension("html");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| FetchError::resource(format!("creating {}: {error}", parent.display())))?;
        }
        tokio::fs::write(&path, self.html.as_bytes())
            .await
            .map_err(|error| FetchError::resource(format!("writing {}: {error}", path.display())))?;
        Ok(path)
    }

    async fn close(self: Box<Self>) {}
}

/// Text of the first visible match, `None` when nothing visible matches.
fn visible_text(html: &str, selector: &str) -> Result<Option<String>, FetchError> {
    let parsed = Selector::parse(selector).map_err(|error| FetchError::element_not_found(format!("{selector} (invalid selector: {error})")))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&parsed)
        .find(|element| is_visible(element))
        .map(|element| element.text().collect::<String>().trim().to_string()))
}

fn is_visible(element: &ElementRef<'_>) -> bool {
    let hidden = std::iter::once(**element)
        .chain(element.ancestors())
        .filter_map(|node| node.value().as_element())
        .any(|el| {
            el.attr("hidden").is_some()
                || el.attr("aria-hidden") == Some("true")
                || el
                    .attr("style")
                    .is_some_and(|style| style.replace(' ', "").to_ascii_lowercase().contains("display:none"))
        });
    !hidden && !element.text().collect::<String>().trim().is_empty()
}
