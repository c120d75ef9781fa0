use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{Interval, MissedTickBehavior},
};

use crate::{
    config::MonitorConfig,
    core::queue::QueueError,
    runtime::{
        events::QueueEvent,
        executor::Executor,
        handle::{DrainReport, OfflineQueue},
    },
};

use super::{SyncInputs, SyncStatus};

/// Reasons a manual sync is refused.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No connectivity.
    #[error("cannot sync while offline")]
    Offline,
    /// A drain cycle is already running.
    #[error("sync already in progress")]
    AlreadySyncing,
    /// The drain itself failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

struct Inner {
    queue: OfflineQueue,
    executor: Arc<dyn Executor>,
    online_rx: watch::Receiver<bool>,
    conflicts: AtomicUsize,
    status_tx: watch::Sender<SyncStatus>,
}

impl Inner {
    fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    fn refresh(&self) -> SyncStatus {
        let status = SyncStatus::derive(SyncInputs {
            online: self.is_online(),
            syncing: self.queue.is_syncing(),
            stats: self.queue.stats(),
            conflicts: self.conflicts.load(Ordering::SeqCst),
        });
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        status
    }

    async fn drain(&self) -> Result<DrainReport, QueueError> {
        let report = self.queue.process(&*self.executor).await;
        self.refresh();
        report
    }
}

/// Keeps a [`SyncStatus`] current and drains the queue when connectivity returns.
///
/// Watches queue events, a connectivity signal and an optional periodic timer.
/// Each offline to online transition triggers one drain.
pub struct SyncMonitor {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncMonitor {
    /// Spawns the monitor task on the current tokio runtime.
    pub fn spawn(
        queue: OfflineQueue,
        executor: Arc<dyn Executor>,
        online_rx: watch::Receiver<bool>,
        config: MonitorConfig,
    ) -> Self {
        let events_rx = queue.subscribe();
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let inner = Arc::new(Inner {
            queue,
            executor,
            online_rx,
            conflicts: AtomicUsize::new(0),
            status_tx,
        });
        inner.refresh();

        let task = tokio::spawn(run_monitor(Arc::clone(&inner), events_rx, config));
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// Current status, recomputed from live signals.
    pub fn status(&self) -> SyncStatus {
        self.inner.refresh()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Records the number of unresolved remote conflicts.
    pub fn set_conflicts(&self, count: usize) {
        self.inner.conflicts.store(count, Ordering::SeqCst);
        self.inner.refresh();
    }

    /// Runs a drain now, bypassing reconnect and timer triggers.
    pub async fn force_sync(&self) -> Result<DrainReport, SyncError> {
        if !self.inner.is_online() {
            return Err(SyncError::Offline);
        }
        if self.inner.queue.is_syncing() {
            return Err(SyncError::AlreadySyncing);
        }
        Ok(self.inner.drain().await?)
    }

    /// Stops the background task. Drains already started run to completion.
    pub fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for SyncMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_monitor(
    inner: Arc<Inner>,
    mut events_rx: broadcast::Receiver<QueueEvent>,
    config: MonitorConfig,
) {
    let mut online_rx = inner.online_rx.clone();
    let mut was_online = *online_rx.borrow_and_update();
    let mut connectivity_open = true;
    let mut timer = config.sync_interval_ms.map(|ms| {
        let mut timer = tokio::time::interval(Duration::from_millis(ms.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Ok(QueueEvent::Closed) | Err(broadcast::error::RecvError::Closed) => {
                    inner.refresh();
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    inner.refresh();
                }
            },
            changed = online_rx.changed(), if connectivity_open => {
                if changed.is_err() {
                    tracing::debug!("connectivity signal dropped");
                    connectivity_open = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                inner.refresh();
                if online && !was_online {
                    tracing::info!("connectivity restored");
                    if config.auto_sync_on_reconnect {
                        spawn_drain(&inner, "reconnect");
                    }
                } else if !online && was_online {
                    tracing::info!("connectivity lost");
                }
                was_online = online;
            }
            _ = tick(&mut timer) => {
                if inner.is_online() && inner.queue.stats().pending > 0 {
                    spawn_drain(&inner, "interval");
                }
            }
        }
    }
}

fn spawn_drain(inner: &Arc<Inner>, trigger: &'static str) {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        if let Err(err) = inner.drain().await {
            tracing::error!(trigger, error = %err, "automatic drain failed");
        }
    });
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
