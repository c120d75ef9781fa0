use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::broadcast;

use crate::{
    config::QueueConfig,
    core::queue::{QueueEngine, QueueError, Subscription},
    op::{NewOperation, OperationRecord, QueueStats},
    persist::QueueStore,
    types::{OpId, OpStatus},
};

use super::{
    events::QueueEvent,
    executor::{Executor, ExecutorError},
};

/// Outcome counts of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Records handed to the executor.
    pub attempted: usize,
    /// Records that succeeded.
    pub completed: usize,
    /// Records that failed and went back to pending.
    pub retried: usize,
    /// Records that failed terminally.
    pub failed: usize,
    /// True when this call only waited for a drain already in flight.
    pub coalesced: bool,
}

struct Shared {
    engine: Mutex<QueueEngine>,
    drain: tokio::sync::Mutex<()>,
    syncing: AtomicBool,
    closed: AtomicBool,
    events_tx: broadcast::Sender<QueueEvent>,
    execute_timeout: Option<Duration>,
}

/// Cloneable handle over one queue engine plus its drain processor.
///
/// Engine access is short and synchronous; the lock is never held across an
/// executor call. At most one drain cycle runs at a time per queue.
#[derive(Clone)]
pub struct OfflineQueue {
    shared: Arc<Shared>,
}

impl OfflineQueue {
    /// Opens the queue over `store`, recovering interrupted records.
    pub fn open(store: impl QueueStore + 'static, config: QueueConfig) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let execute_timeout = config.execute_timeout_ms.map(Duration::from_millis);
        let engine = QueueEngine::open(store, config);
        Self {
            shared: Arc::new(Shared {
                engine: Mutex::new(engine),
                drain: tokio::sync::Mutex::new(()),
                syncing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                events_tx,
                execute_timeout,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Registers a stats listener on the underlying engine.
    ///
    /// Listeners run while the queue is locked and must not call back into
    /// this handle; use [`OfflineQueue::subscribe`] for reactive work.
    pub fn add_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&QueueStats) + Send + Sync + 'static,
    {
        self.engine().add_listener(callback)
    }

    /// Enqueues a new pending record.
    pub fn add(&self, new: NewOperation) -> Result<OpId, QueueError> {
        self.ensure_open()?;
        let id = self.engine().add(new)?;
        self.emit(QueueEvent::Added { id });
        Ok(id)
    }

    /// Deletes a record; `false` when the id is unknown.
    pub fn remove(&self, id: OpId) -> Result<bool, QueueError> {
        self.ensure_open()?;
        let removed = self.engine().remove(id)?;
        if removed {
            self.emit(QueueEvent::Removed { id });
        }
        Ok(removed)
    }

    /// Replaces a failed record with a fresh pending copy.
    pub fn requeue(&self, id: OpId) -> Result<Option<OpId>, QueueError> {
        self.ensure_open()?;
        let new = self.engine().requeue(id)?;
        if let Some(new) = new {
            self.emit(QueueEvent::Requeued { old: id, new });
        }
        Ok(new)
    }

    /// Removes completed records and returns how many were removed.
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let removed = self.engine().clear_completed()?;
        self.emit(QueueEvent::Cleared { removed });
        Ok(removed)
    }

    /// Removes every record.
    pub fn clear(&self) -> Result<usize, QueueError> {
        self.ensure_open()?;
        let removed = self.engine().clear()?;
        self.emit(QueueEvent::Cleared { removed });
        Ok(removed)
    }

    pub fn get(&self, id: OpId) -> Option<OperationRecord> {
        self.engine().get_cloned(id)
    }

    /// Copy of all records in insertion order.
    pub fn get_all(&self) -> Vec<OperationRecord> {
        self.engine().get_all()
    }

    /// Copy of pending records in insertion order.
    pub fn get_pending(&self) -> Vec<OperationRecord> {
        self.engine().get_pending()
    }

    /// Copy of failed records in insertion order.
    pub fn get_failed(&self) -> Vec<OperationRecord> {
        self.engine().get_failed()
    }

    pub fn stats(&self) -> QueueStats {
        self.engine().stats()
    }

    /// True while a drain cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::SeqCst)
    }

    /// True once [`OfflineQueue::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Runs one drain cycle through `executor`.
    ///
    /// Pending records are attempted one at a time in insertion order.
    /// Executor failures are recorded per record and never returned here;
    /// only persistence failures abort the cycle. A call made while another
    /// cycle is in flight waits for it and returns a coalesced report.
    pub async fn process<E>(&self, executor: &E) -> Result<DrainReport, QueueError>
    where
        E: Executor + ?Sized,
    {
        self.ensure_open()?;
        let _drain = match self.shared.drain.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("drain already in flight, waiting for it");
                let _wait = self.shared.drain.lock().await;
                return Ok(DrainReport {
                    coalesced: true,
                    ..DrainReport::default()
                });
            }
        };

        let pending = self.engine().get_pending();
        if pending.is_empty() {
            return Ok(DrainReport::default());
        }

        self.shared.syncing.store(true, Ordering::SeqCst);
        let mut cycle = DrainCycle {
            queue: self,
            current: None,
            report: DrainReport::default(),
            settled: false,
        };
        self.emit(QueueEvent::DrainStarted);
        let result = cycle.run(pending, executor).await;
        cycle.settled = true;
        let report = cycle.report;
        drop(cycle);

        match result {
            Ok(()) => {
                tracing::info!(
                    attempted = report.attempted,
                    completed = report.completed,
                    retried = report.retried,
                    failed = report.failed,
                    "drain cycle finished"
                );
                self.emit(QueueEvent::DrainFinished { report });
                Ok(report)
            }
            Err(err) => {
                tracing::error!(error = %err, "drain cycle aborted");
                self.emit(QueueEvent::DrainFinished { report });
                Err(err)
            }
        }
    }

    /// Waits for any in-flight drain, saves a final snapshot and closes.
    ///
    /// Later mutations and drains return [`QueueError::Closed`].
    pub async fn close(&self) -> Result<(), QueueError> {
        let _drain = self.shared.drain.lock().await;
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine().flush()?;
        self.emit(QueueEvent::Closed);
        Ok(())
    }

    fn engine(&self) -> MutexGuard<'_, QueueEngine> {
        self.shared
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.shared.events_tx.send(event);
    }

    async fn attempt<E>(&self, executor: &E, rec: &OperationRecord) -> Result<(), ExecutorError>
    where
        E: Executor + ?Sized,
    {
        match self.shared.execute_timeout {
            Some(limit) => match tokio::time::timeout(limit, executor.execute(rec)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecutorError::new(format!(
                    "operation timed out after {}ms",
                    limit.as_millis()
                ))),
            },
            None => executor.execute(rec).await,
        }
    }
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("stats", &self.stats())
            .field("syncing", &self.is_syncing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State of one in-flight drain.
///
/// Dropping it mid-operation (cancelled future or early error) releases the
/// record being executed back to pending and clears the syncing flag. A
/// cancelled cycle never reaches `process`'s epilogue, so the guard also
/// sends `DrainFinished` with the partial counts.
struct DrainCycle<'a> {
    queue: &'a OfflineQueue,
    current: Option<OpId>,
    report: DrainReport,
    settled: bool,
}

impl DrainCycle<'_> {
    async fn run<E>(&mut self, pending: Vec<OperationRecord>, executor: &E) -> Result<(), QueueError>
    where
        E: Executor + ?Sized,
    {
        for candidate in pending {
            let rec = {
                let mut engine = self.queue.engine();
                let still_pending = engine
                    .get(candidate.id)
                    .is_some_and(|rec| rec.status == OpStatus::Pending);
                if !still_pending {
                    continue;
                }
                engine.mark_executing(candidate.id)
            }?;
            let id = rec.id;
            self.current = Some(id);
            self.queue.emit(QueueEvent::StatusChanged {
                id,
                status: OpStatus::Executing,
            });
            self.report.attempted += 1;
            tracing::debug!(%id, entity = %rec.entity, kind = ?rec.kind, "executing operation");

            let outcome = self.queue.attempt(executor, &rec).await;

            let status = {
                let mut engine = self.queue.engine();
                if engine.get(id).is_none() {
                    tracing::debug!(%id, "operation removed while executing");
                    None
                } else {
                    Some(match &outcome {
                        Ok(()) => engine.mark_completed(id).map(|()| OpStatus::Completed),
                        Err(err) => engine.mark_failed_attempt(id, err.message()),
                    })
                }
            };
            let Some(status) = status else {
                self.current = None;
                continue;
            };
            let status = status?;
            self.current = None;

            match (status, outcome) {
                (OpStatus::Completed, _) => self.report.completed += 1,
                (OpStatus::Failed, Err(err)) => {
                    self.report.failed += 1;
                    tracing::error!(%id, error = %err, "operation failed permanently");
                }
                (_, Err(err)) => {
                    self.report.retried += 1;
                    tracing::warn!(%id, error = %err, "operation failed, will retry");
                }
                (_, Ok(())) => {}
            }
            self.queue.emit(QueueEvent::StatusChanged { id, status });
        }

        Ok(())
    }
}

impl Drop for DrainCycle<'_> {
    fn drop(&mut self) {
        let released = self
            .current
            .take()
            .filter(|id| self.queue.engine().release_executing(*id));
        self.queue.shared.syncing.store(false, Ordering::SeqCst);

        if let Some(id) = released {
            tracing::warn!(%id, "drain abandoned mid-operation, record released");
            self.queue.emit(QueueEvent::StatusChanged {
                id,
                status: OpStatus::Pending,
            });
        }
        if !self.settled {
            tracing::warn!(attempted = self.report.attempted, "drain cycle cancelled");
            self.queue.emit(QueueEvent::DrainFinished {
                report: self.report,
            });
        }
    }
}
