//! Queued operation model and persisted snapshot wrapper.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::types::{OpId, OpKind, OpStatus, TimestampMs};

/// Version number for serialized [`QueueSnapshot`] payloads.
pub const SNAPSHOT_FORMAT_VERSION: u16 = 1;

/// Retry ceiling used when neither the request nor the config names one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Request to enqueue one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub kind: OpKind,
    /// Logical resource targeted, e.g. `"meal_plan"`.
    pub entity: String,
    /// Mutation arguments, opaque to the queue.
    pub data: serde_json::Value,
    /// Attempts allowed before the record is terminally failed.
    ///
    /// `None` takes `QueueConfig::default_max_retries` at enqueue time.
    pub max_retries: Option<u32>,
}

impl NewOperation {
    /// Builds a request that takes the queue's configured retry ceiling.
    pub fn new(kind: OpKind, entity: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            entity: entity.into(),
            data,
            max_retries: None,
        }
    }

    /// Builds a request from any serializable payload.
    pub fn with_payload<T: Serialize>(
        kind: OpKind,
        entity: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, entity, serde_json::to_value(payload)?))
    }

    /// Overrides the retry ceiling.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// One queued mutation plus its retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    /// Stable id assigned at enqueue time.
    pub id: OpId,
    #[serde(rename = "type")]
    pub kind: OpKind,
    pub entity: String,
    pub data: serde_json::Value,
    /// Creation time in milliseconds.
    #[serde(rename = "timestamp")]
    pub ts_ms: TimestampMs,
    /// Executions attempted and failed so far.
    pub retry_count: u32,
    /// Ceiling for `retry_count`.
    pub max_retries: u32,
    pub status: OpStatus,
    /// Message of the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OperationRecord {
    /// Materializes a fresh pending record from a request.
    ///
    /// A request without a ceiling gets [`DEFAULT_MAX_RETRIES`].
    pub fn from_new(new: NewOperation, ts_ms: TimestampMs) -> Self {
        Self {
            id: OpId::new(),
            kind: new.kind,
            entity: new.entity,
            data: new.data,
            ts_ms,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            status: OpStatus::Pending,
            last_error: None,
        }
    }

    /// Decodes the payload into a typed value.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }

    /// Milliseconds elapsed since creation, relative to `now_ms`.
    pub fn age_ms(&self, now_ms: TimestampMs) -> u64 {
        now_ms.saturating_sub(self.ts_ms)
    }
}

/// Counts of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    /// Records waiting for a drain.
    pub pending: usize,
    /// Records currently handed to an executor.
    pub executing: usize,
    /// Records that succeeded and await `clear_completed`.
    pub completed: usize,
    /// Records that exhausted their retries.
    pub failed: usize,
}

impl QueueStats {
    /// Tallies a slice of records.
    pub fn from_records(records: &[OperationRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };
        for rec in records {
            match rec.status {
                OpStatus::Pending => stats.pending += 1,
                OpStatus::Executing => stats.executing += 1,
                OpStatus::Completed => stats.completed += 1,
                OpStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Versioned wrapper for the full persisted record collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Payload format version.
    pub format_version: u16,
    /// Records in insertion order.
    pub records: Vec<OperationRecord>,
}

impl QueueSnapshot {
    /// Wraps records using [`SNAPSHOT_FORMAT_VERSION`].
    pub fn new(records: Vec<OperationRecord>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            records,
        }
    }
}

pub(crate) fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
