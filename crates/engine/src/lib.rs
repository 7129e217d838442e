//! # Ratewatch Engine
//!
//! Concurrent multi-source quote aggregation. A request for an instrument
//! fans out to every configured source adapter, fills a write-once
//! [`Snapshot`](ratewatch_types::Snapshot) as results arrive and pushes each
//! new rendering through an idempotent sink.
//!
//! ## Architecture
//!
//! - **`config`**: JSON configuration, interpolation and validation
//! - **`catalog`**: built-in sources for USD, EUR and CNY
//! - **`egress`**: upstream route pool and per-call selection
//! - **`browser`**: page abstraction with headless Chromium and static HTML drivers
//! - **`fetch`**: bounded retry with sanitization
//! - **`adapter`**: scrape, HTTP/JSON, cached and dated adapters
//! - **`fallback`**: dated fallback store and the daily-rate publisher client
//! - **`refresher`**: background refresher feeding the cached adapter
//! - **`render`**: table layout, render sink and output channels
//! - **`gate`**: per-requester exclusivity flags
//! - **`session`**: the aggregation session and its service entry point

pub mod adapter;
pub mod browser;
pub mod catalog;
pub mod config;
pub mod egress;
pub mod fallback;
pub mod fetch;
pub mod gate;
pub mod refresher;
pub mod render;
pub mod session;

pub use adapter::{Adapter, AdapterResources, Fetched};
pub use config::{RatewatchConfig, load_config};
pub use fallback::{CbrDailyClient, DatedFallbackStore};
pub use gate::{ExclusivityGate, GateError, GateLease};
pub use refresher::{BackgroundRefresher, RefresherCache};
pub use render::{OutputChannel, RenderSink, TableLayout};
pub use session::{AggregationSession, SessionError, SessionReport, SessionService};
