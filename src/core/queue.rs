use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use hashbrown::HashMap;

use crate::{
    config::QueueConfig,
    op::{NewOperation, OperationRecord, QueueStats, now_ms},
    persist::{PersistError, QueueStore},
    types::{OpId, OpStatus, TimestampMs},
};

/// Errors raised by queue mutations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Saving the snapshot failed; the in-memory mutation was rolled back.
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
    /// No record has this id.
    #[error("operation not found: {0}")]
    NotFound(OpId),
    /// The configured bound is reached and nothing is evictable.
    #[error("queue is full ({capacity} records, none evictable)")]
    QueueFull {
        /// Configured `max_records`.
        capacity: usize,
    },
    /// The queue handle was closed.
    #[error("queue is closed")]
    Closed,
}

/// Callback invoked with fresh stats after every persisted mutation.
pub type Listener = dyn Fn(&QueueStats) + Send + Sync;

struct ListenerEntry {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Arc<Listener>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<ListenerEntry>,
}

/// Handle returned by [`QueueEngine::add_listener`].
///
/// Dropping it keeps the listener registered; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Detaches the listener. It is never invoked again afterwards.
    pub fn unsubscribe(self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(registry) = self.registry.upgrade() {
            let mut listeners = registry.lock().unwrap_or_else(PoisonError::into_inner);
            listeners.entries.retain(|entry| entry.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// In-memory inverse of one mutation, applied when the save fails.
enum Undo {
    Pop,
    Restore(Vec<OperationRecord>),
    Record(usize, OperationRecord),
}

/// Authoritative, persisted collection of queued operations.
///
/// Every mutation is followed by a full-snapshot save. Listeners are notified
/// only after the save succeeds; a failed save rolls the mutation back.
pub struct QueueEngine {
    store: Box<dyn QueueStore>,
    records: Vec<OperationRecord>,
    pos: HashMap<OpId, usize>,
    listeners: Arc<Mutex<Listeners>>,
    config: QueueConfig,
}

impl QueueEngine {
    /// Loads the persisted snapshot and recovers interrupted records.
    ///
    /// Records left `executing` by an abnormal exit come back as `pending`.
    /// An unreadable snapshot is treated as an empty queue.
    pub fn open(store: impl QueueStore + 'static, config: QueueConfig) -> Self {
        let mut store: Box<dyn QueueStore> = Box::new(store);
        let loaded = match store.load() {
            Ok(records) => records.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "discarding unreadable queue snapshot");
                Vec::new()
            }
        };

        let mut engine = Self {
            store,
            records: Vec::with_capacity(loaded.len()),
            pos: HashMap::new(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
            config,
        };

        let mut repaired = 0usize;
        for mut rec in loaded {
            if engine.pos.contains_key(&rec.id) {
                tracing::warn!(id = %rec.id, "dropping duplicate record in snapshot");
                repaired += 1;
                continue;
            }
            if rec.status == OpStatus::Executing {
                rec.status = OpStatus::Pending;
                repaired += 1;
            }
            if rec.max_retries == 0 {
                rec.max_retries = 1;
                repaired += 1;
            }
            if rec.retry_count >= rec.max_retries && !rec.status.is_terminal() {
                rec.retry_count = rec.max_retries;
                rec.status = OpStatus::Failed;
                repaired += 1;
            }
            engine.pos.insert(rec.id, engine.records.len());
            engine.records.push(rec);
        }

        if repaired > 0 {
            tracing::info!(repaired, "recovered interrupted queue records");
            if let Err(err) = engine.store.save(&engine.records) {
                tracing::warn!(error = %err, "failed to persist recovered queue snapshot");
            }
        }

        engine
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueues a new pending record and returns its id.
    ///
    /// A request without its own ceiling takes `default_max_retries`.
    pub fn add(&mut self, mut new: NewOperation) -> Result<OpId, QueueError> {
        let undo = if self.is_full() {
            let before = self.records.clone();
            if let Err(err) = self.make_room() {
                self.records = before;
                self.reindex();
                return Err(err);
            }
            Undo::Restore(before)
        } else {
            Undo::Pop
        };

        let max_retries = new.max_retries.unwrap_or(self.config.default_max_retries);
        new.max_retries = Some(max_retries.max(1));
        let rec = OperationRecord::from_new(new, now_ms());
        let id = rec.id;
        self.pos.insert(id, self.records.len());
        self.records.push(rec);

        self.commit(undo)?;
        tracing::debug!(%id, "operation enqueued");
        Ok(id)
    }

    /// Deletes a record. Returns `false` when no record has this id.
    pub fn remove(&mut self, id: OpId) -> Result<bool, QueueError> {
        let Some(idx) = self.pos.get(&id).copied() else {
            return Ok(false);
        };
        let before = self.records.clone();
        self.records.remove(idx);
        self.reindex();
        self.commit(Undo::Restore(before))?;
        Ok(true)
    }

    pub fn get(&self, id: OpId) -> Option<&OperationRecord> {
        self.pos.get(&id).and_then(|idx| self.records.get(*idx))
    }

    /// Owned copy of the record with this id.
    pub fn get_cloned(&self, id: OpId) -> Option<OperationRecord> {
        self.get(id).cloned()
    }

    /// Borrowed view of all records in insertion order.
    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    /// Snapshot of all records in insertion order.
    pub fn get_all(&self) -> Vec<OperationRecord> {
        self.records.clone()
    }

    /// Snapshot of pending records in insertion order.
    pub fn get_pending(&self) -> Vec<OperationRecord> {
        self.with_status(OpStatus::Pending)
    }

    /// Snapshot of terminally failed records in insertion order.
    pub fn get_failed(&self) -> Vec<OperationRecord> {
        self.with_status(OpStatus::Failed)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats::from_records(&self.records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Creation time of the oldest pending record.
    pub fn oldest_pending_ts_ms(&self) -> Option<TimestampMs> {
        self.records
            .iter()
            .filter(|rec| rec.status == OpStatus::Pending)
            .map(|rec| rec.ts_ms)
            .min()
    }

    /// Removes every completed record and returns how many were removed.
    pub fn clear_completed(&mut self) -> Result<usize, QueueError> {
        let before = self.records.clone();
        self.records.retain(|rec| rec.status != OpStatus::Completed);
        let removed = before.len() - self.records.len();
        self.reindex();
        self.commit(Undo::Restore(before))?;
        Ok(removed)
    }

    /// Removes every record and returns how many were removed.
    pub fn clear(&mut self) -> Result<usize, QueueError> {
        let before = std::mem::take(&mut self.records);
        let removed = before.len();
        self.pos.clear();
        self.commit(Undo::Restore(before))?;
        Ok(removed)
    }

    /// Re-enqueues a failed record as a fresh pending record.
    ///
    /// The failed record is replaced in one saved snapshot. Returns the new
    /// id, or `None` when `id` is unknown or not failed.
    pub fn requeue(&mut self, id: OpId) -> Result<Option<OpId>, QueueError> {
        let Some(idx) = self.pos.get(&id).copied() else {
            return Ok(None);
        };
        if self.records[idx].status != OpStatus::Failed {
            return Ok(None);
        }

        let before = self.records.clone();
        let failed = self.records.remove(idx);
        let fresh = OperationRecord::from_new(
            NewOperation {
                kind: failed.kind,
                entity: failed.entity,
                data: failed.data,
                max_retries: Some(failed.max_retries),
            },
            now_ms(),
        );
        let new_id = fresh.id;
        self.records.push(fresh);
        self.reindex();
        self.commit(Undo::Restore(before))?;
        tracing::info!(old = %id, new = %new_id, "failed operation requeued");
        Ok(Some(new_id))
    }

    /// Registers a stats listener.
    ///
    /// A panicking listener is logged and skipped; it cannot affect the
    /// engine or other listeners.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueueStats) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.push(ListenerEntry {
            id,
            active: Arc::clone(&active),
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            active,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Moves a pending record to `executing` and returns a copy of it.
    pub fn mark_executing(&mut self, id: OpId) -> Result<OperationRecord, QueueError> {
        let idx = self.index_of(id)?;
        let before = self.records[idx].clone();
        self.records[idx].status = OpStatus::Executing;
        self.commit(Undo::Record(idx, before))?;
        Ok(self.records[idx].clone())
    }

    /// Records a successful execution.
    pub fn mark_completed(&mut self, id: OpId) -> Result<(), QueueError> {
        let idx = self.index_of(id)?;
        let before = self.records[idx].clone();
        let rec = &mut self.records[idx];
        rec.status = OpStatus::Completed;
        rec.last_error = None;
        self.commit(Undo::Record(idx, before))
    }

    /// Records a failed execution and returns the resulting status.
    ///
    /// The record goes back to `pending` while retries remain and becomes
    /// `failed` once `retry_count` reaches `max_retries`.
    pub fn mark_failed_attempt(
        &mut self,
        id: OpId,
        message: impl Into<String>,
    ) -> Result<OpStatus, QueueError> {
        let idx = self.index_of(id)?;
        let before = self.records[idx].clone();
        let rec = &mut self.records[idx];
        rec.retry_count = rec.retry_count.saturating_add(1).min(rec.max_retries);
        rec.status = if rec.retry_count < rec.max_retries {
            OpStatus::Pending
        } else {
            OpStatus::Failed
        };
        rec.last_error = Some(message.into());
        let status = rec.status;
        self.commit(Undo::Record(idx, before))?;
        Ok(status)
    }

    /// Returns an `executing` record to `pending`, saves and notifies.
    ///
    /// Used when a drain is abandoned mid-operation, where there is no caller
    /// to hand an error to. A failed save is logged and the in-memory release
    /// stands: a stored `executing` record reloads as `pending` anyway.
    pub fn release_executing(&mut self, id: OpId) -> bool {
        let Some(idx) = self.pos.get(&id).copied() else {
            return false;
        };
        let rec = &mut self.records[idx];
        if rec.status != OpStatus::Executing {
            return false;
        }
        rec.status = OpStatus::Pending;
        if let Err(err) = self.store.save(&self.records) {
            tracing::warn!(%id, error = %err, "failed to persist released record");
        }
        self.notify();
        true
    }

    /// Saves the current snapshot without notifying listeners.
    pub fn flush(&mut self) -> Result<(), QueueError> {
        self.store.save(&self.records)?;
        Ok(())
    }

    fn index_of(&self, id: OpId) -> Result<usize, QueueError> {
        self.pos.get(&id).copied().ok_or(QueueError::NotFound(id))
    }

    fn with_status(&self, status: OpStatus) -> Vec<OperationRecord> {
        self.records
            .iter()
            .filter(|rec| rec.status == status)
            .cloned()
            .collect()
    }

    fn is_full(&self) -> bool {
        self.config
            .max_records
            .is_some_and(|cap| self.records.len() >= cap)
    }

    fn make_room(&mut self) -> Result<(), QueueError> {
        let capacity = self.config.max_records.unwrap_or(usize::MAX);
        while self.records.len() >= capacity {
            let victim = self
                .records
                .iter()
                .position(|rec| rec.status == OpStatus::Completed)
                .or_else(|| {
                    self.records
                        .iter()
                        .position(|rec| rec.status == OpStatus::Failed)
                });
            let Some(idx) = victim else {
                return Err(QueueError::QueueFull { capacity });
            };
            let evicted = self.records.remove(idx);
            tracing::warn!(id = %evicted.id, status = %evicted.status, "evicted record to make room");
        }
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        self.pos.clear();
        for (idx, rec) in self.records.iter().enumerate() {
            self.pos.insert(rec.id, idx);
        }
    }

    fn commit(&mut self, undo: Undo) -> Result<(), QueueError> {
        if let Err(err) = self.store.save(&self.records) {
            match undo {
                Undo::Pop => {
                    if let Some(rec) = self.records.pop() {
                        self.pos.remove(&rec.id);
                    }
                }
                Undo::Restore(records) => {
                    self.records = records;
                    self.reindex();
                }
                Undo::Record(idx, rec) => self.records[idx] = rec,
            }
            tracing::warn!(error = %err, "queue save failed, mutation rolled back");
            return Err(err.into());
        }
        self.notify();
        Ok(())
    }

    fn notify(&self) {
        let stats = self.stats();
        let callbacks: Vec<(Arc<AtomicBool>, Arc<Listener>)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|entry| (Arc::clone(&entry.active), Arc::clone(&entry.callback)))
            .collect();

        for (active, callback) in callbacks {
            if !active.load(Ordering::SeqCst) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(&stats))).is_err() {
                tracing::warn!("queue listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for QueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}
