//! Runtime event stream payloads.

use crate::types::{OpId, OpStatus};

use super::handle::DrainReport;

/// Events emitted by [`super::handle::OfflineQueue`] after each persisted change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A record was enqueued.
    Added {
        id: OpId,
    },
    /// A record was removed explicitly.
    Removed {
        id: OpId,
    },
    /// A failed record was replaced by a fresh pending one.
    Requeued {
        /// Failed record id.
        old: OpId,
        /// Replacement record id.
        new: OpId,
    },
    /// A record moved to a new status during a drain.
    StatusChanged {
        id: OpId,
        /// Status after the transition.
        status: OpStatus,
    },
    /// Records were bulk-removed by `clear` or `clear_completed`.
    Cleared {
        removed: usize,
    },
    /// A drain cycle started.
    DrainStarted,
    /// A drain cycle finished.
    DrainFinished {
        report: DrainReport,
    },
    Closed,
}
