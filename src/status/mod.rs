//! UI-facing sync status derived from queue stats and connectivity.

/// Background task that keeps a [`SyncStatus`] current and triggers drains.
pub mod monitor;

use serde::Serialize;

use crate::op::QueueStats;

/// Raw signals a [`SyncStatus`] is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncInputs {
    /// Network reachable.
    pub online: bool,
    /// A drain cycle is in flight.
    pub syncing: bool,
    /// Current queue stats.
    pub stats: QueueStats,
    /// Remote conflicts reported by the host.
    pub conflicts: usize,
}

/// Headline state, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    /// No connectivity.
    Offline,
    /// Remote conflicts need attention.
    Conflicts,
    /// A drain cycle is running.
    Syncing,
    /// Operations wait for the next drain.
    Pending,
    /// Nothing outstanding.
    Synced,
}

impl StatusLevel {
    /// Short label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Conflicts => "Conflicts",
            Self::Syncing => "Syncing",
            Self::Pending => "Pending",
            Self::Synced => "Synced",
        }
    }

    /// Indicator color name.
    pub fn color(self) -> &'static str {
        match self {
            Self::Offline => "gray",
            Self::Conflicts => "red",
            Self::Syncing => "blue",
            Self::Pending => "yellow",
            Self::Synced => "green",
        }
    }
}

/// Aggregate sync state for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Network reachable.
    pub is_online: bool,
    /// A drain cycle is in flight.
    pub is_syncing: bool,
    /// Pending plus executing records.
    pub pending_count: usize,
    /// Terminally failed records.
    pub failed_count: usize,
    /// Remote conflicts.
    pub conflict_count: usize,
    /// `pending_count > 0`.
    pub has_pending_operations: bool,
    /// `conflict_count > 0`.
    pub has_conflicts: bool,
    /// Online and not already syncing.
    pub can_sync: bool,
    /// Online with nothing pending and no conflicts.
    pub is_fully_synced: bool,
    /// Headline state.
    pub level: StatusLevel,
}

impl SyncStatus {
    /// Derives the status from raw signals.
    pub fn derive(inputs: SyncInputs) -> Self {
        let pending_count = inputs.stats.pending + inputs.stats.executing;
        let has_pending_operations = pending_count > 0;
        let has_conflicts = inputs.conflicts > 0;

        let level = if !inputs.online {
            StatusLevel::Offline
        } else if has_conflicts {
            StatusLevel::Conflicts
        } else if inputs.syncing {
            StatusLevel::Syncing
        } else if has_pending_operations {
            StatusLevel::Pending
        } else {
            StatusLevel::Synced
        };

        Self {
            is_online: inputs.online,
            is_syncing: inputs.syncing,
            pending_count,
            failed_count: inputs.stats.failed,
            conflict_count: inputs.conflicts,
            has_pending_operations,
            has_conflicts,
            can_sync: inputs.online && !inputs.syncing,
            is_fully_synced: inputs.online && !has_pending_operations && !has_conflicts,
            level,
        }
    }

    /// Short label of the headline state.
    pub fn label(&self) -> &'static str {
        self.level.label()
    }

    /// Indicator color of the headline state.
    pub fn color(&self) -> &'static str {
        self.level.color()
    }

    /// Human-readable summary. Failed records are always mentioned.
    pub fn message(&self) -> String {
        let mut msg = match self.level {
            StatusLevel::Offline if self.has_pending_operations => {
                format!("Offline, {} pending", self.pending_count)
            }
            StatusLevel::Offline => "Offline".to_string(),
            StatusLevel::Conflicts => format!("{} conflict(s) need attention", self.conflict_count),
            StatusLevel::Syncing => format!("Syncing {} operation(s)", self.pending_count),
            StatusLevel::Pending => format!("{} operation(s) pending", self.pending_count),
            StatusLevel::Synced => "All changes synced".to_string(),
        };
        if self.failed_count > 0 {
            msg.push_str(&format!(", {} failed", self.failed_count));
        }
        msg
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::derive(SyncInputs::default())
    }
}
