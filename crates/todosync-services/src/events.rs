//! Notifications published by the sync engine.

use crate::remote::RemoteError;

/// Event delivered to the single subscriber (usually the UI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The in-memory task snapshot changed.
    StoreChanged,
    /// A user-visible error message.
    Alert { message: String },
    /// The remote became unreachable or reachable again.
    Connectivity { offline: bool },
}

/// How a spawned sync operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server confirmed the single-item change or the plain load.
    Confirmed,
    /// A full reconciliation completed.
    Reconciled,
    /// The operation failed for good; local state is marked dirty.
    Failed(RemoteError),
    /// Superseded by a newer mutation or stopped by shutdown.
    Cancelled,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Confirmed | SyncOutcome::Reconciled)
    }
}
