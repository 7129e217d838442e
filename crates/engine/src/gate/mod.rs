//! Per-requester mutual exclusion for aggregation sessions.

mod store;

use std::sync::{Arc, Mutex};

use ratewatch_types::RequesterId;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use store::{FLAGS_FILE_NAME, FLAGS_PATH_ENV, FlagStore, FlagStoreError, JsonFlagStore, MemoryFlagStore, default_flags_path};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("requester {requester} already has a session in progress")]
    ConcurrencyConflict { requester: RequesterId },

    #[error(transparent)]
    Store(#[from] FlagStoreError),
}

/// Check-and-set over a [`FlagStore`], serialized in process.
pub struct ExclusivityGate {
    store: Arc<dyn FlagStore>,
    guard: Mutex<()>,
}

impl ExclusivityGate {
    pub fn new(store: Arc<dyn FlagStore>) -> Self {
        Self { store, guard: Mutex::new(()) }
    }

    /// Build the gate at process start, clearing flags a crashed run left set.
    pub fn startup(store: Arc<dyn FlagStore>) -> Result<Self, GateError> {
        store.reset_all()?;
        info!("Reset all exclusivity flags");
        Ok(Self::new(store))
    }

    /// Set the flag if clear. Returns `false` without touching state if already set.
    pub fn acquire(&self, requester: RequesterId) -> Result<bool, GateError> {
        let _guard = self.guard.lock().expect("gate lock poisoned");
        if self.store.get(requester)? {
            debug!(requester = %requester, "Exclusivity flag already set");
            return Ok(false);
        }
        self.store.set(requester, true)?;
        Ok(true)
    }

    pub fn release(&self, requester: RequesterId) -> Result<(), GateError> {
        let _guard = self.guard.lock().expect("gate lock poisoned");
        self.store.set(requester, false)?;
        Ok(())
    }

    /// Acquire as a scoped lease released on drop.
    pub fn lease(self: &Arc<Self>, requester: RequesterId) -> Result<GateLease, GateError> {
        if !self.acquire(requester)? {
            return Err(GateError::ConcurrencyConflict { requester });
        }
        Ok(GateLease {
            gate: Arc::clone(self),
            requester,
        })
    }
}

/// Held for the lifetime of one session.
pub struct GateLease {
    gate: Arc<ExclusivityGate>,
    requester: RequesterId,
}

impl GateLease {
    pub fn requester(&self) -> RequesterId {
        self.requester
    }
}

impl Drop for GateLease {
    fn drop(&mut self) {
        if let Err(error) = self.gate.release(self.requester) {
            warn!(requester = %self.requester, error = %error, "Failed to release exclusivity flag");
        }
    }
}
