//! Data models for ratewatch configuration.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use ratewatch_types::{Instrument, InstrumentParseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RatewatchConfig {
    /// Quote currency assumed when an instrument is given as a bare base code.
    #[serde(default = "default_quote_currency")]
    pub default_quote_currency: String,

    /// Fetch retry policy shared by the scrape and HTTP adapters.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pool of upstream egress routes (proxies).
    #[serde(default)]
    pub egress: EgressConfig,

    /// Daily-rate publisher used by the dated source.
    #[serde(default)]
    pub dated: DatedConfig,

    /// Browser used by scrape sources and the refresher.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Background refresher feeding the cached source.
    #[serde(default)]
    pub refresher: RefresherConfig,

    /// Sources per instrument, keyed by `BASE/QUOTE`.
    #[serde(default = "catalog::builtin_instruments")]
    pub instruments: IndexMap<String, InstrumentConfig>,

    /// Override for the exclusivity flag file.
    pub flags_path: Option<String>,
}

impl Default for RatewatchConfig {
    fn default() -> Self {
        Self {
            default_quote_currency: default_quote_currency(),
            retry: RetryConfig::default(),
            egress: EgressConfig::default(),
            dated: DatedConfig::default(),
            browser: BrowserConfig::default(),
            refresher: RefresherConfig::default(),
            instruments: catalog::builtin_instruments(),
            flags_path: None,
        }
    }
}

impl RatewatchConfig {
    /// Parse user input such as `usd` or `EUR/RUB` against the default quote currency.
    pub fn parse_instrument(&self, input: &str) -> Result<Instrument, InstrumentParseError> {
        Instrument::parse_with_default(input, &self.default_quote_currency)
    }

    /// Configured sources for `instrument`, in render order.
    pub fn sources_for(&self, instrument: &Instrument) -> Result<&[SourceConfig], ConfigError> {
        self.instruments
            .iter()
            .find(|(key, _)| key.parse::<Instrument>().is_ok_and(|parsed| &parsed == instrument))
            .map(|(_, config)| config.sources.as_slice())
            .ok_or_else(|| ConfigError::UnknownInstrument {
                instrument: instrument.to_string(),
            })
    }
}

fn default_quote_currency() -> String {
    "RUB".to_string()
}

/// Bounded retry policy for one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 3, delay_ms: 2_000 }
    }
}

/// Egress route pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EgressConfig {
    #[serde(default)]
    pub routes: Vec<EgressRouteConfig>,
}

/// One proxy route, e.g. `http://10.0.0.1:8080` with optional basic credentials.
///
/// String fields accept `${env:NAME}` and `${secret:NAME}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EgressRouteConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Daily-rate publisher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DatedConfig {
    pub endpoint: String,
    #[serde(default = "default_dated_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DatedConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.cbr.ru/scripts/XML_daily.asp".to_string(),
            timeout_ms: default_dated_timeout_ms(),
        }
    }
}

fn default_dated_timeout_ms() -> u64 {
    15_000
}

/// Which [`BrowserDriver`](crate::browser::BrowserDriver) backs page sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BrowserDriverKind {
    /// Headless Chromium over the DevTools protocol.
    #[default]
    Chromium,
    /// Plain HTTP with server-rendered HTML only.
    Static,
}

/// Browser launch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct BrowserConfig {
    pub driver: BrowserDriverKind,
    /// Chromium binary; looked up on `PATH` when unset.
    pub executable: Option<String>,
    /// Pass `--no-sandbox`, needed when running as root in containers.
    pub no_sandbox: bool,
    /// Fall back to the static driver when Chromium cannot be launched.
    pub fallback_to_static: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver: BrowserDriverKind::Chromium,
            executable: None,
            no_sandbox: false,
            fallback_to_static: true,
        }
    }
}

impl BrowserConfig {
    pub fn executable(&self) -> Option<PathBuf> {
        self.executable.as_deref().map(ratewatch_util::expand_tilde)
    }
}

/// Background refresher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefresherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_renewal_interval_secs")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_relaunch_delay_secs")]
    pub relaunch_delay_secs: u64,
    #[serde(default = "default_page_timeout_ms")]
    pub page_timeout_ms: u64,
    /// Directory receiving page captures; defaults to the system temp dir.
    pub artifact_dir: Option<String>,
    #[serde(default = "catalog::builtin_refresher_targets")]
    pub targets: Vec<RefresherTargetConfig>,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: default_refresh_interval_secs(),
            renewal_interval_secs: default_renewal_interval_secs(),
            relaunch_delay_secs: default_relaunch_delay_secs(),
            page_timeout_ms: default_page_timeout_ms(),
            artifact_dir: None,
            targets: catalog::builtin_refresher_targets(),
        }
    }
}

impl RefresherConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn relaunch_delay(&self) -> Duration {
        Duration::from_secs(self.relaunch_delay_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .as_deref()
            .map(ratewatch_util::expand_tilde)
            .unwrap_or_else(|| std::env::temp_dir().join("ratewatch"))
    }
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_renewal_interval_secs() -> u64 {
    3_600
}

fn default_relaunch_delay_secs() -> u64 {
    5
}

fn default_page_timeout_ms() -> u64 {
    30_000
}

/// One long-lived page kept warm by the refresher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefresherTargetConfig {
    pub instrument: String,
    pub url: String,
    pub selector: String,
    pub dismiss_selector: Option<String>,
}

/// Sources configured for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstrumentConfig {
    pub sources: Vec<SourceConfig>,
}

/// Kind of upstream a source reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    /// Browser-rendered page, value read from a visible element.
    Scrape,
    /// JSON endpoint, value read from a field path.
    HttpJson,
    /// Latest value kept by the background refresher.
    Cached,
    /// Date-indexed daily publication (today and tomorrow rows).
    Dated,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Scrape => "scrape",
            SourceKind::HttpJson => "httpJson",
            SourceKind::Cached => "cached",
            SourceKind::Dated => "dated",
        }
    }
}

/// A single source row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceConfig {
    /// Stable identity, unique per instrument.
    pub id: String,
    /// Row label in the rendered table.
    pub label: String,
    pub kind: SourceKind,
    /// Rendered after the core rows.
    #[serde(default)]
    pub extra: bool,
    /// Unit appended after the value, e.g. `USDT/RUB`.
    pub suffix: Option<String>,
    /// Page or endpoint URL (scrape, httpJson).
    pub url: Option<String>,
    /// CSS selector of the value element (scrape).
    pub selector: Option<String>,
    /// Banner/close button clicked best-effort before waiting (scrape).
    pub dismiss_selector: Option<String>,
    /// Dot path into the JSON body, e.g. `bid.0.price` (httpJson).
    pub field_path: Option<String>,
    /// Delay after navigation before waiting for the element (scrape).
    pub settle_ms: Option<u64>,
    /// Wait bound for the element or response.
    pub timeout_ms: Option<u64>,
}

impl SourceConfig {
    pub fn new(id: &str, label: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind,
            extra: false,
            suffix: None,
            url: None,
            selector: None,
            dismiss_selector: None,
            field_path: None,
            settle_ms: None,
            timeout_ms: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(20_000))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms.unwrap_or(0))
    }
}

/// Errors raised when resolving configuration for a request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no sources configured for instrument '{instrument}'")]
    UnknownInstrument { instrument: String },

    #[error(transparent)]
    Instrument(#[from] InstrumentParseError),

    #[error("source '{source_id}' is missing '{field}' required by kind {kind}")]
    MissingField { source_id: String, field: &'static str, kind: &'static str },
}
