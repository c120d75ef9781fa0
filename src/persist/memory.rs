//! Shared in-memory snapshot store.

use std::sync::{Arc, Mutex, PoisonError};

use crate::op::OperationRecord;

use super::{PersistResult, QueueStore, decode_snapshot, encode_snapshot};

/// In-memory [`QueueStore`] whose clones share one slot.
///
/// Holds the encoded payload rather than the records, so a reload goes
/// through the same codec as a durable backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self) -> Option<Vec<u8>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overwrites the stored payload with arbitrary bytes.
    pub fn set_raw(&self, payload: impl Into<Vec<u8>>) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(payload.into());
    }

    /// Decoded view of the stored records.
    pub fn records(&self) -> PersistResult<Vec<OperationRecord>> {
        match self.raw() {
            Some(payload) => decode_snapshot(&payload),
            None => Ok(Vec::new()),
        }
    }
}

impl QueueStore for MemoryStore {
    fn load(&mut self) -> PersistResult<Option<Vec<OperationRecord>>> {
        self.raw().map(|payload| decode_snapshot(&payload)).transpose()
    }

    fn save(&mut self, records: &[OperationRecord]) -> PersistResult<()> {
        let payload = encode_snapshot(records)?;
        self.set_raw(payload);
        Ok(())
    }
}
