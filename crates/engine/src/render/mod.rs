//! Textual table layout and the idempotent render sink.

mod channel;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ratewatch_types::{Instrument, Snapshot, SourceId};
use ratewatch_util::format_title_timestamp;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::{SourceConfig, SourceKind};

pub use channel::{ChannelError, ChannelEvent, OutputChannel, RecordingChannel, StdoutChannel};

/// Label column width.
const LABEL_WIDTH: usize = 15;

/// Placeholder for pending and absent values.
pub const NONE_PLACEHOLDER: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowValue {
    Value,
    NextValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RowSpec {
    source_id: SourceId,
    label: String,
    suffix: Option<String>,
    value: RowValue,
}

/// Fixed row layout for one session, keyed by source identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    title: String,
    rows: Vec<RowSpec>,
    labels: HashMap<SourceId, String>,
}

impl TableLayout {
    /// Core rows in configured order, then extra rows. The timestamp is fixed here.
    pub fn new(instrument: &Instrument, sources: &[SourceConfig], created_at: DateTime<Utc>) -> Self {
        let title = format!("{instrument} rates at {} (MSK)", format_title_timestamp(created_at));
        let ordered = sources
            .iter()
            .filter(|source| !source.extra)
            .chain(sources.iter().filter(|source| source.extra));

        let mut rows = Vec::with_capacity(sources.len() + 1);
        let mut labels = HashMap::with_capacity(sources.len());
        for source in ordered {
            let source_id = SourceId::new(source.id.clone());
            labels.insert(source_id.clone(), source.label.clone());
            if source.kind == SourceKind::Dated {
                rows.push(RowSpec {
                    source_id: source_id.clone(),
                    label: format!("{} (today)", source.label),
                    suffix: source.suffix.clone(),
                    value: RowValue::Value,
                });
                rows.push(RowSpec {
                    source_id,
                    label: format!("{} (tomorrow)", source.label),
                    suffix: source.suffix.clone(),
                    value: RowValue::NextValue,
                });
            } else {
                rows.push(RowSpec {
                    source_id,
                    label: source.label.clone(),
                    suffix: source.suffix.clone(),
                    value: RowValue::Value,
                });
            }
        }
        Self { title, rows, labels }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Display label of `source_id`, as configured.
    pub fn label_for(&self, source_id: &SourceId) -> Option<&str> {
        self.labels.get(source_id).map(String::as_str)
    }

    /// Render `snapshot`; arrival order never affects the result.
    pub fn render(&self, snapshot: &Snapshot) -> String {
        let mut text = self.title.clone();
        for row in &self.rows {
            let quote = snapshot.get(&row.source_id).and_then(|slot| slot.quote());
            let value = quote.and_then(|quote| match row.value {
                RowValue::Value => quote.value,
                RowValue::NextValue => quote.next_value,
            });
            text.push('\n');
            text.push_str(&render_row(&row.label, value, row.suffix.as_deref()));
        }
        text
    }
}

fn render_row(label: &str, value: Option<Decimal>, suffix: Option<&str>) -> String {
    let value = value.map(|value| value.to_string()).unwrap_or_else(|| NONE_PLACEHOLDER.to_string());
    match suffix {
        Some(suffix) => format!("{label:<LABEL_WIDTH$}| {value} {suffix}"),
        None => format!("{label:<LABEL_WIDTH$}| {value}"),
    }
}

/// Pushes rendered text to a channel, suppressing consecutive duplicates.
pub struct RenderSink {
    channel: Arc<dyn OutputChannel>,
    last_emitted: Option<String>,
    emissions: usize,
}

impl RenderSink {
    pub fn new(channel: Arc<dyn OutputChannel>) -> Self {
        Self {
            channel,
            last_emitted: None,
            emissions: 0,
        }
    }

    /// Publish `candidate` unless it equals the last emitted text.
    ///
    /// Returns whether a publish happened. A failed publish is logged and
    /// not recorded, so the same text is attempted again next time.
    pub async fn emit(&mut self, candidate: String) -> bool {
        if self.last_emitted.as_deref() == Some(candidate.as_str()) {
            debug!("Rendered text unchanged; skipping update");
            return false;
        }
        match self.channel.publish(&candidate).await {
            Ok(()) => {
                self.last_emitted = Some(candidate);
                self.emissions += 1;
                true
            }
            Err(error) => {
                warn!(error = %error, "Failed to publish rendered table");
                false
            }
        }
    }

    /// Number of successful publishes.
    pub fn emissions(&self) -> usize {
        self.emissions
    }

    pub fn last_emitted(&self) -> Option<&str> {
        self.last_emitted.as_deref()
    }
}
