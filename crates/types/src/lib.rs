//! Shared type definitions for the ratewatch workspace.
//!
//! Everything here is plain data: quotes, instruments, per-session snapshots,
//! dated rates and the fetch error taxonomy. Behavior lives in
//! `ratewatch-engine`.

pub mod dated;
pub mod errors;
pub mod instrument;
pub mod quote;
pub mod snapshot;

pub use dated::{DatedRate, FallbackState, RateDay};
pub use errors::{FetchError, FetchErrorKind};
pub use instrument::{CurrencyFamily, Instrument, InstrumentParseError};
pub use quote::{Quote, RequesterId, SourceId};
pub use snapshot::{Slot, Snapshot, SnapshotError};
