//! Per-session snapshot of source slots.
//!
//! A snapshot is created with one pending slot per configured source, in
//! configured order. Slots are write-once: the orchestrating loop fills each
//! slot exactly once and a second write is rejected.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Instrument, Quote, SourceId};

/// State of one source within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "quote", rename_all = "snake_case")]
pub enum Slot {
    Pending,
    Resolved(Quote),
}

impl Slot {
    pub fn quote(&self) -> Option<&Quote> {
        match self {
            Slot::Pending => None,
            Slot::Resolved(quote) => Some(quote),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }

    pub fn is_filled(&self) -> bool {
        self.quote().is_some_and(Quote::is_filled)
    }
}

/// Rejected snapshot mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("source '{source_id}' is configured more than once")]
    DuplicateSource { source_id: SourceId },
    #[error("source '{source_id}' has no slot in this snapshot")]
    UnknownSource { source_id: SourceId },
    #[error("slot for source '{source_id}' is already resolved")]
    AlreadyResolved { source_id: SourceId },
}

/// Ordered mapping `source_id -> Quote | pending` for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    instrument: Instrument,
    slots: IndexMap<SourceId, Slot>,
}

impl Snapshot {
    /// Create a snapshot with one pending slot per source, preserving order.
    pub fn new(instrument: Instrument, sources: impl IntoIterator<Item = SourceId>) -> Result<Self, SnapshotError> {
        let mut slots = IndexMap::new();
        for source_id in sources {
            if slots.contains_key(&source_id) {
                return Err(SnapshotError::DuplicateSource { source_id });
            }
            slots.insert(source_id, Slot::Pending);
        }
        Ok(Self { instrument, slots })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Resolve the slot owned by `quote.source_id`.
    pub fn fill(&mut self, quote: Quote) -> Result<(), SnapshotError> {
        let slot = self
            .slots
            .get_mut(&quote.source_id)
            .ok_or_else(|| SnapshotError::UnknownSource {
                source_id: quote.source_id.clone(),
            })?;
        if !slot.is_pending() {
            return Err(SnapshotError::AlreadyResolved {
                source_id: quote.source_id.clone(),
            });
        }
        *slot = Slot::Resolved(quote);
        Ok(())
    }

    pub fn get(&self, source_id: &SourceId) -> Option<&Slot> {
        self.slots.get(source_id)
    }

    /// Slots in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, &Slot)> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots holding a value.
    pub fn filled_count(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_filled()).count()
    }

    /// Number of slots that are resolved, with or without a value.
    pub fn resolved_count(&self) -> usize {
        self.slots.values().filter(|slot| !slot.is_pending()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.len() - self.resolved_count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending_count() == 0
    }
}
