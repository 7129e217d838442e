use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use indexmap::IndexMap;
use ratewatch_engine::adapter::{Adapter, AdapterResources, DatedAdapter, Fetched, SourceAdapter};
use ratewatch_engine::browser::StaticHtmlDriver;
use ratewatch_engine::config::{InstrumentConfig, RatewatchConfig, SourceConfig, SourceKind};
use ratewatch_engine::egress::{FixedRouteSelector, RouteClients};
use ratewatch_engine::fallback::{DailyRatePublisher, DatedFallbackStore};
use ratewatch_engine::fetch::RetryPolicy;
use ratewatch_engine::gate::{ExclusivityGate, MemoryFlagStore};
use ratewatch_engine::refresher::RefresherCache;
use ratewatch_engine::render::{NONE_PLACEHOLDER, RecordingChannel, TableLayout};
use ratewatch_engine::session::{AggregationSession, SessionService};
use ratewatch_types::{DatedRate, FetchError, Instrument, RequesterId, SourceId};
use rust_decimal::Decimal;

/// Cooperative adapter that completes only when the shared turn reaches its own.
struct Ordered {
    id: SourceId,
    turn: usize,
    clock: Arc<AtomicUsize>,
    result: Result<Fetched, FetchError>,
}

#[async_trait]
impl SourceAdapter for Ordered {
    fn source_id(&self) -> &SourceId {
        &self.id
    }

    async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
        while self.clock.load(Ordering::SeqCst) != self.turn {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        self.clock.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Publishes 91.00 dated today for every requested date, once turn 5 arrives.
#[derive(Debug)]
struct TodayOnlyPublisher {
    clock: Arc<AtomicUsize>,
}

impl DailyRatePublisher for TodayOnlyPublisher {
    fn fetch(&self, _instrument: &Instrument, _date: NaiveDate) -> Result<Option<DatedRate>, FetchError> {
        while self.clock.load(Ordering::SeqCst) < 5 {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(Some(DatedRate::new(fixed_today(), decimal("91.00"))))
    }
}

fn fixed_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 14).unwrap()
}

fn decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

fn usd() -> Instrument {
    Instrument::new("USD", "RUB").unwrap()
}

fn sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig::new("investing", "Investing", SourceKind::Cached),
        SourceConfig::new("cbr", "CBR", SourceKind::Dated),
        SourceConfig::new("profinance", "ProFinance", SourceKind::Scrape),
        SourceConfig::new("moex", "MOEX", SourceKind::Scrape),
        SourceConfig {
            extra: true,
            ..SourceConfig::new("abcex", "ABCEX", SourceKind::HttpJson)
        },
        SourceConfig {
            extra: true,
            ..SourceConfig::new("xe", "XE", SourceKind::Scrape)
        },
    ]
}

fn filled_rows(text: &str) -> usize {
    text.lines()
        .skip(1)
        .filter_map(|line| line.split_once("| "))
        .filter(|(_, value)| *value != NONE_PLACEHOLDER)
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_fills_progressively_in_completion_order() {
    let clock = Arc::new(AtomicUsize::new(0));
    let ordered = |id: &str, turn: usize, result: Result<Fetched, FetchError>| {
        Adapter::Cooperative(Arc::new(Ordered {
            id: id.into(),
            turn,
            clock: clock.clone(),
            result,
        }))
    };
    let store = Arc::new(DatedFallbackStore::new(Arc::new(TodayOnlyPublisher { clock: clock.clone() })));
    let adapters = vec![
        ordered("investing", 0, Ok(Fetched::value(decimal("91.20")))),
        Adapter::Blocking(Arc::new(DatedAdapter::with_clock("cbr".into(), store.clone(), fixed_today))),
        ordered("profinance", 2, Ok(Fetched::value(decimal("91.10")))),
        ordered("moex", 3, Err(FetchError::element_not_found("td:nth-child(2)"))),
        ordered("abcex", 1, Ok(Fetched::value(decimal("91.35")))),
        ordered("xe", 4, Ok(Fetched::value(decimal("91.40")))),
    ];
    let layout = TableLayout::new(&usd(), &sources(), Utc::now());
    let reference = layout.clone();
    let channel = Arc::new(RecordingChannel::new());

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        AggregationSession::new(RequesterId(1), usd(), layout, adapters).run(channel.clone()),
    )
    .await
    .expect("session should finish")
    .unwrap();

    let published = channel.published();
    assert!(published.len() <= 6, "{} emissions", published.len());
    assert_eq!(report.emissions, published.len());
    let counts: Vec<usize> = published.iter().map(|text| filled_rows(text)).collect();
    assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]), "{counts:?}");

    let snapshot = &report.snapshot;
    assert_eq!(snapshot.len(), 6);
    assert_eq!(snapshot.resolved_count(), 6);
    assert_eq!(snapshot.filled_count(), 5);
    let cbr = snapshot.get(&"cbr".into()).and_then(|slot| slot.quote()).unwrap();
    assert_eq!(cbr.value, Some(decimal("91.00")));
    assert_eq!(cbr.next_value, None);

    let last = published.last().unwrap();
    assert_eq!(last, &reference.render(snapshot));
    let labels: Vec<&str> = last.lines().skip(1).filter_map(|line| line.split('|').next()).map(str::trim).collect();
    assert_eq!(labels, vec!["Investing", "CBR (today)", "CBR (tomorrow)", "ProFinance", "MOEX", "ABCEX", "XE"]);
    assert!(last.contains("MOEX           | none"), "{last}");
}

#[derive(Debug)]
struct UnusedPublisher;

impl DailyRatePublisher for UnusedPublisher {
    fn fetch(&self, _instrument: &Instrument, _date: NaiveDate) -> Result<Option<DatedRate>, FetchError> {
        Err(FetchError::network("publisher not reachable in tests"))
    }
}

fn service(gate: Arc<ExclusivityGate>) -> SessionService {
    let mut instruments = IndexMap::new();
    instruments.insert(
        "USD/RUB".to_string(),
        InstrumentConfig {
            sources: vec![SourceConfig::new("investing", "Investing", SourceKind::Cached)],
        },
    );
    let config = RatewatchConfig {
        instruments,
        ..RatewatchConfig::default()
    };
    let resources = AdapterResources {
        routes: Arc::new(FixedRouteSelector::direct()),
        http: Arc::new(RouteClients::plain()),
        retry: RetryPolicy::immediate(1),
        cache: Arc::new(RefresherCache::new()),
        dated: Arc::new(DatedFallbackStore::new(Arc::new(UnusedPublisher))),
    };
    SessionService::new(Arc::new(config), gate, Arc::new(StaticHtmlDriver::default()), resources)
}

#[tokio::test]
async fn service_rejects_requester_with_session_in_progress() {
    let gate = Arc::new(ExclusivityGate::new(Arc::new(MemoryFlagStore::new())));
    let service = service(gate.clone());
    let requester = RequesterId(7);

    let held = gate.lease(requester).unwrap();
    let rejected = service.start(requester, &usd(), Arc::new(RecordingChannel::new())).await;
    assert!(rejected.as_ref().is_err_and(|error| error.is_conflict()));
    drop(held);

    let channel = Arc::new(RecordingChannel::new());
    let report = service.start(requester, &usd(), channel.clone()).await.unwrap();
    assert!(report.snapshot.is_complete());
    assert_eq!(report.snapshot.filled_count(), 0);
    assert_eq!(channel.published().len(), 1);

    assert!(gate.acquire(requester).unwrap(), "flag must be released after the session");
}

#[tokio::test]
async fn service_releases_flag_when_instrument_is_unknown() {
    let gate = Arc::new(ExclusivityGate::new(Arc::new(MemoryFlagStore::new())));
    let service = service(gate.clone());
    let eur = Instrument::new("EUR", "RUB").unwrap();

    let error = service.start(RequesterId(3), &eur, Arc::new(RecordingChannel::new())).await.unwrap_err();
    assert!(!error.is_conflict());
    assert!(gate.acquire(RequesterId(3)).unwrap());
}
