//! Headless Chromium driver over the DevTools protocol.
//!
//! One browser process is launched per driver. Each context is a set of
//! Chromium browser contexts, one per egress route, since Chromium applies
//! proxies per browser context. Pages opened on the same route within one
//! context share cookies; nothing is shared across contexts. Captures are
//! PNG screenshots.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::auth::Credentials;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page};
use futures_util::StreamExt;
use ratewatch_types::FetchError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::{BrowserContext, BrowserDriver, PageHandle};
use crate::config::BrowserConfig;
use crate::egress::EgressRoute;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Poll cadence while waiting for an element.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Key of the browser context used without a proxy.
const DIRECT_ROUTE: &str = "direct";

/// [`BrowserDriver`] backed by a headless Chromium process.
pub struct ChromiumDriver {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl fmt::Debug for ChromiumDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromiumDriver").finish_non_exhaustive()
    }
}

impl ChromiumDriver {
    /// Launch Chromium and start its protocol event loop.
    pub async fn launch(config: &BrowserConfig) -> Result<Self, FetchError> {
        let mut builder = LaunchConfig::builder().window_size(1366, 900);
        if let Some(executable) = config.executable() {
            builder = builder.chrome_executable(executable);
        }
        if config.no_sandbox {
            builder = builder.no_sandbox();
        }
        let launch = builder.build().map_err(|error| FetchError::resource(format!("invalid browser settings: {error}")))?;

        let (browser, mut events) = Browser::launch(launch)
            .await
            .map_err(|error| FetchError::resource(format!("launching chromium: {error}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(error) = event {
                    debug!(error = %error, "Chromium protocol event error");
                }
            }
            debug!("Chromium event loop ended");
        });
        info!("Launched headless chromium");
        Ok(Self {
            browser: Arc::new(browser),
            handler,
        })
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, FetchError> {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(context = id, "Created chromium context");
        Ok(Arc::new(ChromiumContext {
            id,
            browser: self.browser.clone(),
            routes: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ChromiumContext {
    id: u64,
    browser: Arc<Browser>,
    /// Chromium browser context per route, keyed by proxy server.
    routes: Mutex<HashMap<String, BrowserContextId>>,
    closed: AtomicBool,
}

impl ChromiumContext {
    async fn route_context(&self, egress: Option<&EgressRoute>) -> Result<BrowserContextId, FetchError> {
        let key = egress.map_or_else(|| DIRECT_ROUTE.to_string(), |route| route.server.clone());
        let mut routes = self.routes.lock().await;
        if let Some(existing) = routes.get(&key) {
            return Ok(existing.clone());
        }
        let params = CreateBrowserContextParams {
            proxy_server: egress.map(|route| route.server.clone()),
            ..CreateBrowserContextParams::default()
        };
        let created = self
            .browser
            .execute(params)
            .await
            .map_err(|error| FetchError::resource(format!("creating browser context: {error}")))?;
        let browser_context_id = created.result.browser_context_id.clone();
        routes.insert(key, browser_context_id.clone());
        Ok(browser_context_id)
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    fn id(&self) -> u64 {
        self.id
    }

    async fn open_page(&self, url: &str, egress: Option<EgressRoute>, wait: Duration) -> Result<Box<dyn PageHandle>, FetchError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FetchError::resource(format!("context {} is closed", self.id)));
        }
        let browser_context_id = self.route_context(egress.as_ref()).await?;

        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(browser_context_id);
        let page = self
            .browser
            .new_page(target)
            .await
            .map_err(|error| FetchError::resource(format!("opening tab: {error}")))?;

        if let Some(route) = &egress
            && let Some(username) = &route.username
        {
            let credentials = Credentials {
                username: username.clone(),
                password: route.password.clone().unwrap_or_default(),
            };
            page.authenticate(credentials)
                .await
                .map_err(|error| FetchError::resource(format!("proxy authentication: {error}")))?;
        }

        let mut handle = ChromiumPage {
            page,
            url: url.to_string(),
            timeout: wait,
        };
        handle.navigate().await?;
        debug!(context = self.id, url, egress = ?egress.as_ref().map(ToString::to_string), "Opened page");
        Ok(Box::new(handle))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let routes: Vec<BrowserContextId> = self.routes.lock().await.drain().map(|(_, id)| id).collect();
        for browser_context_id in routes {
            if let Err(error) = self.browser.execute(DisposeBrowserContextParams::new(browser_context_id)).await {
                warn!(context = self.id, error = %error, "Failed to dispose browser context");
            }
        }
        debug!(context = self.id, "Closed chromium context");
    }
}

struct ChromiumPage {
    page: Page,
    url: String,
    timeout: Duration,
}

impl ChromiumPage {
    async fn navigate(&mut self) -> Result<(), FetchError> {
        match timeout(self.timeout, self.page.goto(self.url.as_str())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(FetchError::network(format!("navigating to {}: {error}", self.url))),
            Err(_) => Err(FetchError::network(format!("navigating to {}: timed out", self.url))),
        }
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, FetchError> {
        let evaluated = self
            .page
            .evaluate(script)
            .await
            .map_err(|error| FetchError::network(format!("evaluating on {}: {error}", self.url)))?;
        evaluated
            .into_value()
            .map_err(|error| FetchError::network(format!("reading script result on {}: {error}", self.url)))
    }

    /// Trimmed text of the first visible match; empty when nothing visible matches.
    async fn visible_text(&self, selector: &str) -> Result<String, FetchError> {
        self.evaluate(visible_text_script(selector)?).await
    }

    async fn wait_until_visible(&self, selector: &str, wait: Duration) -> Result<String, FetchError> {
        let deadline = Instant::now() + wait;
        loop {
            let text = self.visible_text(selector).await?;
            if !text.is_empty() {
                return Ok(text);
            }
            if Instant::now() + POLL_INTERVAL > deadline {
                return Err(FetchError::element_not_found(selector));
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageHandle for ChromiumPage {
    fn url(&self) -> &str {
        &self.url
    }

    async fn wait_for_visible(&mut self, selector: &str, wait: Duration) -> Result<(), FetchError> {
        self.wait_until_visible(selector, wait).await.map(|_| ())
    }

    async fn text_content(&mut self, selector: &str) -> Result<String, FetchError> {
        let text = self.visible_text(selector).await?;
        if text.is_empty() {
            return Err(FetchError::element_not_found(selector));
        }
        Ok(text)
    }

    async fn click_if_visible(&mut self, selector: &str, wait: Duration) -> bool {
        if self.wait_until_visible(selector, wait).await.is_err() {
            return false;
        }
        let Ok(script) = click_script(selector) else {
            return false;
        };
        match self.evaluate::<bool>(script).await {
            Ok(clicked) => clicked,
            Err(error) => {
                debug!(selector, error = %error, "Dismiss click failed");
                false
            }
        }
    }

    async fn refresh(&mut self) -> Result<(), FetchError> {
        match timeout(self.timeout, self.page.reload()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(FetchError::network(format!("reloading {}: {error}", self.url))),
            Err(_) => Err(FetchError::network(format!("reloading {}: timed out", self.url))),
        }
    }

    async fn capture(&mut self, path: &Path) -> Result<PathBuf, FetchError> {
        let path = path.with_extension("png");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| FetchError::resource(format!("creating {}: {error}", parent.display())))?;
        }
        let params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).build();
        self.page
            .save_screenshot(params, &path)
            .await
            .map_err(|error| FetchError::resource(format!("screenshot of {}: {error}", self.url)))?;
        Ok(path)
    }

    async fn close(self: Box<Self>) {
        let ChromiumPage { page, url, .. } = *self;
        if let Err(error) = page.close().await {
            debug!(url = %url, error = %error, "Failed to close tab");
        }
    }
}

fn selector_literal(selector: &str) -> Result<String, FetchError> {
    serde_json::to_string(selector).map_err(|error| FetchError::element_not_found(format!("{selector} ({error})")))
}

fn visible_text_script(selector: &str) -> Result<String, FetchError> {
    Ok(format!(
        "(() => {{ for (const el of document.querySelectorAll({})) {{ {VISIBLE_CHECK} \
         const text = (el.innerText || '').trim(); if (text) return text; }} return ''; }})()",
        selector_literal(selector)?
    ))
}

fn click_script(selector: &str) -> Result<String, FetchError> {
    Ok(format!(
        "(() => {{ for (const el of document.querySelectorAll({})) {{ {VISIBLE_CHECK} \
         el.click(); return true; }} return false; }})()",
        selector_literal(selector)?
    ))
}

/// Skips the current `el` unless it is rendered with a non-empty box.
const VISIBLE_CHECK: &str = "const style = getComputedStyle(el); const rect = el.getBoundingClientRect(); \
     if (style.display === 'none' || style.visibility === 'hidden' || rect.width === 0 || rect.height === 0) continue;";
