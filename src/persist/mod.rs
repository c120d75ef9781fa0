//! Durable queue store abstraction and snapshot codec.

pub mod memory;
pub mod sqlite;

use crate::op::{OperationRecord, QueueSnapshot, SNAPSHOT_FORMAT_VERSION};

/// Failure reading or writing the durable store.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Snapshot bytes could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Snapshot written by an unknown format version.
    #[error("unsupported snapshot format version: {0}")]
    UnsupportedFormat(u16),
    #[error("{0}")]
    Message(String),
}

impl PersistError {
    /// True when the stored bytes exist but cannot be decoded.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Serde(_) | Self::UnsupportedFormat(_))
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Durable medium for the full record collection.
///
/// `save` must be all-or-nothing: after a failed save the previously saved
/// snapshot is still the one `load` returns.
pub trait QueueStore: Send {
    /// Returns the last saved snapshot, or `None` when nothing was saved yet.
    fn load(&mut self) -> PersistResult<Option<Vec<OperationRecord>>>;
    /// Replaces the stored snapshot with `records`.
    fn save(&mut self, records: &[OperationRecord]) -> PersistResult<()>;
}

impl<S: QueueStore + ?Sized> QueueStore for Box<S> {
    fn load(&mut self) -> PersistResult<Option<Vec<OperationRecord>>> {
        (**self).load()
    }

    fn save(&mut self, records: &[OperationRecord]) -> PersistResult<()> {
        (**self).save(records)
    }
}

/// Serializes records into a versioned snapshot payload.
pub fn encode_snapshot(records: &[OperationRecord]) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&QueueSnapshot::new(records.to_vec()))?)
}

/// Decodes a snapshot payload written by [`encode_snapshot`].
pub fn decode_snapshot(payload: &[u8]) -> PersistResult<Vec<OperationRecord>> {
    if let Ok(snapshot) = serde_json::from_slice::<QueueSnapshot>(payload) {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::UnsupportedFormat(snapshot.format_version));
        }
        return Ok(snapshot.records);
    }

    // Unversioned payloads are a bare JSON array of records.
    Ok(serde_json::from_slice::<Vec<OperationRecord>>(payload)?)
}
