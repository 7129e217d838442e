//! One aggregation session: fan out to every adapter, fill the snapshot as
//! results arrive and push each new rendering through the sink.

mod service;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use ratewatch_types::{FetchError, Instrument, Quote, RequesterId, Snapshot, SnapshotError, SourceId};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, Fetched};
use crate::browser::BrowserContext;
use crate::render::{OutputChannel, RenderSink, TableLayout};

pub use service::{CONFLICT_MESSAGE, SessionError, SessionService};

/// Footer sent once every source has answered.
pub const SESSION_FOOTER: &str = "Done. You can send further commands.";

/// Outcome of a completed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub snapshot: Snapshot,
    /// Number of table updates actually published.
    pub emissions: usize,
    pub elapsed: Duration,
}

pub struct AggregationSession {
    requester: RequesterId,
    instrument: Instrument,
    layout: TableLayout,
    adapters: Vec<Adapter>,
    context: Option<Arc<dyn BrowserContext>>,
}

impl AggregationSession {
    pub fn new(requester: RequesterId, instrument: Instrument, layout: TableLayout, adapters: Vec<Adapter>) -> Self {
        Self {
            requester,
            instrument,
            layout,
            adapters,
            context: None,
        }
    }

    /// Browser context owned by this session, closed when the run ends.
    pub fn with_context(mut self, context: Option<Arc<dyn BrowserContext>>) -> Self {
        self.context = context;
        self
    }

    pub async fn run(self, channel: Arc<dyn OutputChannel>) -> Result<SessionReport, SnapshotError> {
        let started = Instant::now();
        let Self {
            requester,
            instrument,
            layout,
            adapters,
            context,
        } = self;

        let mut snapshot = Snapshot::new(instrument.clone(), adapters.iter().map(|adapter| adapter.source_id().clone()))?;
        info!(requester = %requester, instrument = %instrument, sources = snapshot.len(), "Starting aggregation session");

        if let Err(error) = channel.open(&format!("Collecting {instrument} rates...")).await {
            warn!(requester = %requester, error = %error, "Failed to open output channel");
        }

        let mut pending: FuturesUnordered<_> = adapters
            .into_iter()
            .map(|adapter| {
                let source_id = adapter.source_id().clone();
                track(source_id, adapter.spawn(instrument.clone()))
            })
            .collect();

        let mut sink = RenderSink::new(channel.clone());
        while let Some((source_id, joined)) = pending.next().await {
            let result = joined.unwrap_or_else(|error| Err(FetchError::internal(format!("adapter task failed: {error}"))));
            let observed_at = Utc::now();
            let (quote, artifact) = match result {
                Ok(Fetched {
                    value,
                    next_value,
                    artifact,
                }) => {
                    debug!(source = %source_id, value = %value, "Source resolved");
                    let quote = Quote::resolved(source_id.clone(), instrument.clone(), value, observed_at).with_next_value(next_value);
                    (quote, artifact)
                }
                Err(error) => {
                    warn!(source = %source_id, kind = error.kind().label(), error = %error, "Source resolved absent");
                    (Quote::absent(source_id.clone(), instrument.clone(), error.kind(), observed_at), None)
                }
            };

            if let Err(error) = snapshot.fill(quote) {
                warn!(source = %source_id, error = %error, "Discarding result with no pending slot");
                continue;
            }
            sink.emit(layout.render(&snapshot)).await;

            if let Some(path) = artifact {
                let caption = format!("{} screenshot ({instrument})", layout.label_for(&source_id).unwrap_or(source_id.as_str()));
                if let Err(error) = channel.attach_artifact(&path, &caption).await {
                    warn!(source = %source_id, path = %path.display(), error = %error, "Failed to attach artifact");
                }
            }
        }

        if let Some(context) = context {
            context.close().await;
        }

        if let Err(error) = channel.close(SESSION_FOOTER).await {
            warn!(requester = %requester, error = %error, "Failed to close output channel");
        }

        let elapsed = started.elapsed();
        info!(
            requester = %requester,
            instrument = %instrument,
            filled = snapshot.filled_count(),
            absent = snapshot.resolved_count() - snapshot.filled_count(),
            emissions = sink.emissions(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Aggregation session complete"
        );
        Ok(SessionReport {
            snapshot,
            emissions: sink.emissions(),
            elapsed,
        })
    }
}

async fn track(source_id: SourceId, handle: JoinHandle<Result<Fetched, FetchError>>) -> (SourceId, Result<Result<Fetched, FetchError>, JoinError>) {
    (source_id, handle.await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SourceAdapter;
    use crate::config::{SourceConfig, SourceKind};
    use crate::render::{ChannelEvent, RecordingChannel};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use std::str::FromStr;

    struct Fixed {
        id: SourceId,
        result: Result<Fetched, FetchError>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn source_id(&self) -> &SourceId {
            &self.id
        }

        async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
            self.result.clone()
        }
    }

    struct Panicking(SourceId);

    #[async_trait]
    impl SourceAdapter for Panicking {
        fn source_id(&self) -> &SourceId {
            &self.0
        }

        async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
            panic!("adapter bug")
        }
    }

    /// Reports one id when the snapshot is built and another afterwards.
    struct Shifting {
        ids: [SourceId; 2],
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SourceAdapter for Shifting {
        fn source_id(&self) -> &SourceId {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            &self.ids[call.min(1)]
        }

        async fn fetch(&self, _instrument: &Instrument) -> Result<Fetched, FetchError> {
            Ok(Fetched::value(Decimal::from_str("90.00").unwrap()))
        }
    }

    fn usd() -> Instrument {
        Instrument::new("USD", "RUB").unwrap()
    }

    #[tokio::test]
    async fn panicking_adapter_resolves_absent_and_artifact_is_forwarded() {
        let sources = vec![
            SourceConfig::new("investing", "Investing", SourceKind::Cached),
            SourceConfig::new("moex", "MOEX", SourceKind::Scrape),
        ];
        let layout = TableLayout::new(&usd(), &sources, Utc::now());
        let fetched = Fetched {
            artifact: Some(PathBuf::from("/tmp/usd.png")),
            ..Fetched::value(Decimal::from_str("91.20").unwrap())
        };
        let adapters = vec![
            Adapter::Cooperative(Arc::new(Fixed {
                id: "investing".into(),
                result: Ok(fetched),
            })),
            Adapter::Cooperative(Arc::new(Panicking("moex".into()))),
        ];
        let channel = Arc::new(RecordingChannel::new());

        let report = AggregationSession::new(RequesterId(1), usd(), layout, adapters)
            .run(channel.clone())
            .await
            .unwrap();

        assert!(report.snapshot.is_complete());
        assert_eq!(report.snapshot.filled_count(), 1);
        let moex = report.snapshot.get(&"moex".into()).and_then(|slot| slot.quote()).unwrap();
        assert_eq!(moex.failure, Some(ratewatch_types::FetchErrorKind::Internal));

        let events = channel.events();
        assert_eq!(events.first(), Some(&ChannelEvent::Opened("Collecting USD/RUB rates...".to_string())));
        assert!(events.contains(&ChannelEvent::Artifact {
            path: PathBuf::from("/tmp/usd.png"),
            caption: "Investing screenshot (USD/RUB)".to_string(),
        }));
        assert_eq!(events.last(), Some(&ChannelEvent::Closed(SESSION_FOOTER.to_string())));
    }

    #[tokio::test]
    async fn unchanged_rendering_is_published_once() {
        let sources = vec![
            SourceConfig::new("moex", "MOEX", SourceKind::Scrape),
            SourceConfig::new("profinance", "Profinance", SourceKind::Scrape),
        ];
        let layout = TableLayout::new(&usd(), &sources, Utc::now());
        let adapters = sources
            .iter()
            .map(|source| {
                Adapter::Cooperative(Arc::new(Fixed {
                    id: SourceId::new(source.id.clone()),
                    result: Err(FetchError::network("unreachable")),
                }) as Arc<dyn SourceAdapter>)
            })
            .collect();
        let channel = Arc::new(RecordingChannel::new());

        let report = AggregationSession::new(RequesterId(1), usd(), layout, adapters)
            .run(channel.clone())
            .await
            .unwrap();

        assert_eq!(report.emissions, 1);
        assert_eq!(channel.published().len(), 1);
        assert_eq!(report.snapshot.filled_count(), 0);
    }

    #[tokio::test]
    async fn result_without_pending_slot_is_dropped_and_session_completes() {
        let sources = vec![
            SourceConfig::new("xe", "XE", SourceKind::Scrape),
            SourceConfig::new("moex", "MOEX", SourceKind::Scrape),
        ];
        let layout = TableLayout::new(&usd(), &sources, Utc::now());
        let adapters = vec![
            Adapter::Cooperative(Arc::new(Shifting {
                ids: ["xe".into(), "ghost".into()],
                calls: std::sync::atomic::AtomicUsize::new(0),
            }) as Arc<dyn SourceAdapter>),
            Adapter::Cooperative(Arc::new(Fixed {
                id: "moex".into(),
                result: Ok(Fetched::value(Decimal::from_str("91.10").unwrap())),
            })),
        ];
        let channel = Arc::new(RecordingChannel::new());

        let report = AggregationSession::new(RequesterId(1), usd(), layout, adapters)
            .run(channel.clone())
            .await
            .unwrap();

        assert_eq!(report.snapshot.filled_count(), 1);
        assert_eq!(report.snapshot.pending_count(), 1);
        assert_eq!(report.emissions, 1);
        assert_eq!(channel.events().last(), Some(&ChannelEvent::Closed(SESSION_FOOTER.to_string())));
    }
}
