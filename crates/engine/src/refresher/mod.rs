//! Background refresher feeding the cached source.
//!
//! Keeps one long-lived page per tracked instrument, re-reads each page on a
//! short interval and publishes the value into [`RefresherCache`]. The whole
//! browser resource is leased: on the renewal interval it is torn down and
//! recreated, and a resource-level failure relaunches it after a short delay.
//! Fetch-level failures are logged and the loop carries on.

mod cache;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use ratewatch_types::{FetchError, Instrument, InstrumentParseError};
use ratewatch_util::sanitize_numeric;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::{BrowserContext, BrowserDriver, PageHandle};
use crate::config::RefresherConfig;
use crate::egress::RouteSelector;

pub use cache::{RefresherCache, RefresherCacheEntry};

/// Wait bound for the best-effort cookie banner click.
const DISMISS_TIMEOUT: Duration = Duration::from_secs(2);

/// A page kept warm for one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefresherTarget {
    pub instrument: Instrument,
    pub url: String,
    pub selector: String,
    pub dismiss_selector: Option<String>,
}

/// Timing and targets of the refresher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefresherSettings {
    pub refresh_interval: Duration,
    pub renewal_interval: Duration,
    pub relaunch_delay: Duration,
    pub page_timeout: Duration,
    pub artifact_dir: PathBuf,
    pub targets: Vec<RefresherTarget>,
}

impl RefresherSettings {
    pub fn from_config(config: &RefresherConfig) -> Result<Self, InstrumentParseError> {
        let targets = config
            .targets
            .iter()
            .map(|target| -> Result<RefresherTarget, InstrumentParseError> {
                Ok(RefresherTarget {
                    instrument: target.instrument.parse()?,
                    url: target.url.clone(),
                    selector: target.selector.clone(),
                    dismiss_selector: target.dismiss_selector.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            refresh_interval: config.refresh_interval(),
            renewal_interval: config.renewal_interval(),
            relaunch_delay: config.relaunch_delay(),
            page_timeout: config.page_timeout(),
            artifact_dir: config.artifact_dir(),
            targets,
        })
    }
}

/// Owned browser resource: one context, one page per target.
pub struct ResourceLease {
    context: Arc<dyn BrowserContext>,
    pages: Vec<(RefresherTarget, Box<dyn PageHandle>)>,
    created_at: Instant,
    renewal_interval: Duration,
}

impl ResourceLease {
    /// Whether the lease has outlived its renewal interval.
    pub fn is_due(&self) -> bool {
        self.created_at.elapsed() >= self.renewal_interval
    }

    async fn teardown(self) {
        for (_, page) in self.pages {
            page.close().await;
        }
        self.context.close().await;
    }
}

enum LeaseEnd {
    Cancelled,
    Renewal,
    ResourceFailure(FetchError),
}

/// Independent loop maintaining the cached source.
pub struct BackgroundRefresher {
    driver: Arc<dyn BrowserDriver>,
    routes: Arc<dyn RouteSelector>,
    cache: Arc<RefresherCache>,
    settings: RefresherSettings,
    restarts: Arc<AtomicU64>,
}

impl BackgroundRefresher {
    pub fn new(driver: Arc<dyn BrowserDriver>, routes: Arc<dyn RouteSelector>, cache: Arc<RefresherCache>, settings: RefresherSettings) -> Self {
        Self {
            driver,
            routes,
            cache,
            settings,
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared cache this refresher writes.
    pub fn cache(&self) -> Arc<RefresherCache> {
        self.cache.clone()
    }

    /// Counter of resource teardowns followed by a relaunch.
    pub fn restart_counter(&self) -> Arc<AtomicU64> {
        self.restarts.clone()
    }

    /// Run on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!(targets = self.settings.targets.len(), "Background refresher started");
        while !cancel.is_cancelled() {
            let end = match self.launch().await {
                Ok(lease) => self.drive(lease, &cancel).await,
                Err(error) => LeaseEnd::ResourceFailure(error),
            };
            match end {
                LeaseEnd::Cancelled => break,
                LeaseEnd::Renewal => {
                    let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(restarts, "Renewing refresher browser resource");
                }
                LeaseEnd::ResourceFailure(error) => {
                    let restarts = self.restarts.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(restarts, error = %error, delay_ms = self.settings.relaunch_delay.as_millis() as u64, "Refresher resource failed; relaunching");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = sleep(self.settings.relaunch_delay) => {}
                    }
                }
            }
        }
        info!("Background refresher stopped");
    }

    async fn launch(&self) -> Result<ResourceLease, FetchError> {
        let context = self.driver.new_context().await?;
        let mut pages = Vec::with_capacity(self.settings.targets.len());
        for target in &self.settings.targets {
            match context.open_page(&target.url, self.routes.select(), self.settings.page_timeout).await {
                Ok(mut page) => {
                    if let Some(dismiss) = &target.dismiss_selector {
                        page.click_if_visible(dismiss, DISMISS_TIMEOUT).await;
                    }
                    pages.push((target.clone(), page));
                }
                Err(error) => {
                    for (_, page) in pages {
                        page.close().await;
                    }
                    context.close().await;
                    return Err(FetchError::resource(format!("opening {}: {error}", target.url)));
                }
            }
        }
        debug!(context = context.id(), pages = pages.len(), "Refresher resource launched");
        Ok(ResourceLease {
            context,
            pages,
            created_at: Instant::now(),
            renewal_interval: self.settings.renewal_interval,
        })
    }

    async fn drive(&self, mut lease: ResourceLease, cancel: &CancellationToken) -> LeaseEnd {
        let mut ticker = interval(self.settings.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    lease.teardown().await;
                    return LeaseEnd::Cancelled;
                }
                _ = ticker.tick() => {}
            }
            if lease.is_due() {
                lease.teardown().await;
                return LeaseEnd::Renewal;
            }
            if let Err(error) = self.refresh_pages(&mut lease).await {
                lease.teardown().await;
                return LeaseEnd::ResourceFailure(error);
            }
        }
    }

    /// One tick over every page; only resource-level failures abort it.
    async fn refresh_pages(&self, lease: &mut ResourceLease) -> Result<(), FetchError> {
        for (target, page) in lease.pages.iter_mut() {
            match self.refresh_page(target, page.as_mut()).await {
                Ok(entry) => {
                    debug!(instrument = %target.instrument, value = %entry.last_value, "Refreshed cached value");
                    self.cache.update(target.instrument.clone(), entry);
                }
                Err(error) if error.is_resource_level() => return Err(error),
                Err(error) => {
                    warn!(instrument = %target.instrument, error = %error, "Refresh tick failed; keeping previous value");
                }
            }
        }
        Ok(())
    }

    async fn refresh_page(&self, target: &RefresherTarget, page: &mut dyn PageHandle) -> Result<RefresherCacheEntry, FetchError> {
        page.refresh()
            .await
            .map_err(|error| FetchError::resource(format!("reloading {}: {error}", target.url)))?;
        page.wait_for_visible(&target.selector, self.settings.page_timeout).await?;
        let text = page.text_content(&target.selector).await?;
        let value = sanitize_numeric(&text)?;

        let capture_path = self.settings.artifact_dir.join(format!(
            "refresher_{}_{}",
            target.instrument.base().to_ascii_lowercase(),
            target.instrument.quote().to_ascii_lowercase()
        ));
        let screenshot_ref = match page.capture(&capture_path).await {
            Ok(path) => Some(path),
            Err(error) => {
                warn!(instrument = %target.instrument, error = %error, "Page capture failed");
                None
            }
        };
        Ok(RefresherCacheEntry {
            last_value: value,
            last_observed_at: Utc::now(),
            screenshot_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::{EgressRoute, FixedRouteSelector};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;

    /// Driver whose first `failing_launches` contexts cannot open pages.
    #[derive(Debug)]
    struct FakeDriver {
        launches: AtomicU32,
        failing_launches: u32,
        value: &'static str,
    }

    struct FakeContext {
        broken: bool,
        value: &'static str,
    }

    struct FakePage {
        value: &'static str,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, FetchError> {
            let launch = self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeContext {
                broken: launch < self.failing_launches,
                value: self.value,
            }))
        }
    }

    #[async_trait]
    impl BrowserContext for FakeContext {
        fn id(&self) -> u64 {
            1
        }

        async fn open_page(&self, _url: &str, _egress: Option<EgressRoute>, _timeout: Duration) -> Result<Box<dyn PageHandle>, FetchError> {
            if self.broken {
                return Err(FetchError::network("browser crashed"));
            }
            Ok(Box::new(FakePage { value: self.value }))
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl PageHandle for FakePage {
        fn url(&self) -> &str {
            "https://ru.investing.com/currencies/usd-rub"
        }

        async fn wait_for_visible(&mut self, _selector: &str, _timeout: Duration) -> Result<(), FetchError> {
            Ok(())
        }

        async fn text_content(&mut self, _selector: &str) -> Result<String, FetchError> {
            Ok(self.value.to_string())
        }

        async fn click_if_visible(&mut self, _selector: &str, _timeout: Duration) -> bool {
            true
        }

        async fn refresh(&mut self) -> Result<(), FetchError> {
            Ok(())
        }

        async fn capture(&mut self, path: &Path) -> Result<PathBuf, FetchError> {
            Ok(path.with_extension("png"))
        }

        async fn close(self: Box<Self>) {}
    }

    fn settings(renewal_interval: Duration) -> RefresherSettings {
        RefresherSettings {
            refresh_interval: Duration::from_millis(5),
            renewal_interval,
            relaunch_delay: Duration::from_millis(5),
            page_timeout: Duration::from_millis(50),
            artifact_dir: PathBuf::from("/tmp/ratewatch-test"),
            targets: vec![RefresherTarget {
                instrument: Instrument::new("USD", "RUB").unwrap(),
                url: "https://ru.investing.com/currencies/usd-rub".to_string(),
                selector: "span[data-test='instrument-price-last']".to_string(),
                dismiss_selector: Some("#onetrust-accept-btn-handler".to_string()),
            }],
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn refresher(failing_launches: u32, renewal_interval: Duration) -> BackgroundRefresher {
        let driver = Arc::new(FakeDriver {
            launches: AtomicU32::new(0),
            failing_launches,
            value: "91,2000",
        });
        BackgroundRefresher::new(
            driver,
            Arc::new(FixedRouteSelector::direct()),
            Arc::new(RefresherCache::new()),
            settings(renewal_interval),
        )
    }

    #[tokio::test]
    async fn relaunches_after_resource_failure_and_fills_cache() {
        let refresher = refresher(2, Duration::from_secs(3_600));
        let cache = refresher.cache();
        let restarts = refresher.restart_counter();
        let cancel = CancellationToken::new();
        let handle = refresher.spawn(cancel.clone());

        let usd = Instrument::new("USD", "RUB").unwrap();
        wait_for(|| cache.last_value(&usd).is_some()).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(restarts.load(Ordering::SeqCst), 2);
        let entry = cache.get(&usd).unwrap();
        assert_eq!(entry.last_value.to_string(), "91.2000");
        assert_eq!(entry.screenshot_ref, Some(PathBuf::from("/tmp/ratewatch-test/refresher_usd_rub.png")));
    }

    #[tokio::test]
    async fn renews_resource_on_interval() {
        let refresher = refresher(0, Duration::from_millis(20));
        let restarts = refresher.restart_counter();
        let cancel = CancellationToken::new();
        let handle = refresher.spawn(cancel.clone());

        wait_for(|| restarts.load(Ordering::SeqCst) >= 2).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    type Readings = tokio::sync::mpsc::UnboundedReceiver<Option<&'static str>>;

    /// One context whose single page takes one reading per reload; `None`
    /// makes the target element missing for that tick.
    #[derive(Debug)]
    struct ScriptedDriver {
        readings: std::sync::Mutex<Option<Readings>>,
        reloads: Arc<AtomicU32>,
    }

    struct ScriptedContext {
        readings: std::sync::Mutex<Option<Readings>>,
        reloads: Arc<AtomicU32>,
    }

    struct ScriptedPage {
        readings: Readings,
        current: Option<&'static str>,
        reloads: Arc<AtomicU32>,
    }

    #[async_trait]
    impl BrowserDriver for ScriptedDriver {
        async fn new_context(&self) -> Result<Arc<dyn BrowserContext>, FetchError> {
            let readings = self.readings.lock().unwrap().take();
            Ok(Arc::new(ScriptedContext {
                readings: std::sync::Mutex::new(readings),
                reloads: self.reloads.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserContext for ScriptedContext {
        fn id(&self) -> u64 {
            2
        }

        async fn open_page(&self, _url: &str, _egress: Option<EgressRoute>, _timeout: Duration) -> Result<Box<dyn PageHandle>, FetchError> {
            let readings = self
                .readings
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| FetchError::resource("page already opened"))?;
            Ok(Box::new(ScriptedPage {
                readings,
                current: None,
                reloads: self.reloads.clone(),
            }))
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl PageHandle for ScriptedPage {
        fn url(&self) -> &str {
            "https://ru.investing.com/currencies/usd-rub"
        }

        async fn wait_for_visible(&mut self, selector: &str, _timeout: Duration) -> Result<(), FetchError> {
            match self.current {
                Some(_) => Ok(()),
                None => Err(FetchError::element_not_found(selector)),
            }
        }

        async fn text_content(&mut self, selector: &str) -> Result<String, FetchError> {
            self.current
                .map(str::to_string)
                .ok_or_else(|| FetchError::element_not_found(selector))
        }

        async fn click_if_visible(&mut self, _selector: &str, _timeout: Duration) -> bool {
            false
        }

        async fn refresh(&mut self) -> Result<(), FetchError> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            self.current = self.readings.recv().await.flatten();
            Ok(())
        }

        async fn capture(&mut self, path: &Path) -> Result<PathBuf, FetchError> {
            Ok(path.to_path_buf())
        }

        async fn close(self: Box<Self>) {}
    }

    #[tokio::test]
    async fn missing_element_keeps_previous_value_without_restart() {
        let (readings, script) = tokio::sync::mpsc::unbounded_channel();
        let reloads = Arc::new(AtomicU32::new(0));
        let driver = Arc::new(ScriptedDriver {
            readings: std::sync::Mutex::new(Some(script)),
            reloads: reloads.clone(),
        });
        let refresher = BackgroundRefresher::new(
            driver,
            Arc::new(FixedRouteSelector::direct()),
            Arc::new(RefresherCache::new()),
            settings(Duration::from_secs(3_600)),
        );
        let cache = refresher.cache();
        let restarts = refresher.restart_counter();
        let cancel = CancellationToken::new();
        let handle = refresher.spawn(cancel.clone());
        let usd = Instrument::new("USD", "RUB").unwrap();

        readings.send(Some("91,20")).unwrap();
        wait_for(|| cache.last_value(&usd).is_some_and(|value| value.to_string() == "91.20")).await;
        let first = cache.get(&usd).unwrap();

        // The third reload only starts once the failing tick has been handled.
        readings.send(None).unwrap();
        wait_for(|| reloads.load(Ordering::SeqCst) >= 3).await;
        let kept = cache.get(&usd).unwrap();
        assert_eq!(kept.last_value, first.last_value);
        assert_eq!(kept.last_observed_at, first.last_observed_at);
        assert_eq!(restarts.load(Ordering::SeqCst), 0);

        readings.send(Some("91,35")).unwrap();
        wait_for(|| cache.last_value(&usd).is_some_and(|value| value.to_string() == "91.35")).await;
        assert_eq!(restarts.load(Ordering::SeqCst), 0);

        drop(readings);
        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn settings_from_builtin_config() {
        let settings = RefresherSettings::from_config(&RefresherConfig::default()).unwrap();
        assert_eq!(settings.targets.len(), 3);
        assert_eq!(settings.refresh_interval, Duration::from_secs(30));
        assert_eq!(settings.relaunch_delay, Duration::from_secs(5));
    }
}
