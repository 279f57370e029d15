//! Worker pool: the authoritative registry of workers and their sessions.
//!
//! [`WorkerPool`] is constructed once at process start and shared as an
//! `Arc`. It loads the configured workers from the [`WorkerStore`],
//! spawns one session per enabled worker (connections establish in the
//! background, independently of each other), and applies hot add/remove
//! without disturbing unrelated sessions.
//!
//! Locking: the worker map sits behind an `RwLock` that is only held for
//! map-structure reads and writes, never across a session close.
//! Structural changes (add, remove, stop) are additionally serialised by
//! a separate mutex so a slow close never blocks [`WorkerPool::snapshot`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

use drawproxy_core::store::WorkerStore;
use drawproxy_core::types::{Timestamp, WorkerId};
use drawproxy_core::worker::Worker;
use drawproxy_gateway::SessionState;

use crate::admission::{Admission, Load};
use crate::connector::{SessionConnector, WorkerSession};
use crate::error::DispatchError;
use crate::selection::{SelectMode, Selector};

/// Point-in-time, owned view of one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub worker: Worker,
    pub state: SessionState,
    pub last_heartbeat_ack: Option<Timestamp>,
    pub last_error: Option<String>,
    #[serde(flatten)]
    pub load: Load,
}

impl WorkerView {
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

struct Entry {
    worker: Worker,
    session: Option<Arc<dyn WorkerSession>>,
}

impl Entry {
    fn view(&self, admission: &Admission) -> WorkerView {
        let status = self.session.as_ref().map(|s| s.status());
        let load = admission.load(&self.worker.id).unwrap_or_default();
        let mut worker = self.worker.clone();
        worker.day_draw_count = load.day_draw_count;
        WorkerView {
            worker,
            state: status
                .as_ref()
                .map_or(SessionState::Disconnected, |s| s.state),
            last_heartbeat_ack: status.as_ref().and_then(|s| s.last_heartbeat_ack),
            last_error: status.and_then(|s| s.last_error),
            load,
        }
    }
}

pub struct WorkerPool {
    entries: RwLock<HashMap<WorkerId, Entry>>,
    changes: Mutex<()>,
    connector: Arc<dyn SessionConnector>,
    store: Arc<dyn WorkerStore>,
    admission: Admission,
    selector: Selector,
    /// Parent of every session token.
    cancel: CancellationToken,
    shutdown_timeout: Duration,
    stopped: AtomicBool,
    stop_done: OnceCell<()>,
}

impl WorkerPool {
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        store: Arc<dyn WorkerStore>,
        select_mode: SelectMode,
        shutdown_timeout: Duration,
    ) -> Self {
        Self::with_selector(connector, store, Selector::new(select_mode), shutdown_timeout)
    }

    pub fn with_selector(
        connector: Arc<dyn SessionConnector>,
        store: Arc<dyn WorkerStore>,
        selector: Selector,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            changes: Mutex::new(()),
            connector,
            store,
            admission: Admission::new(),
            selector,
            cancel: CancellationToken::new(),
            shutdown_timeout,
            stopped: AtomicBool::new(false),
            stop_done: OnceCell::new(),
        }
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Load every stored worker and open a session for each enabled one.
    ///
    /// Returns as soon as the sessions are spawned; returns the number of
    /// sessions started.
    pub async fn start(&self) -> Result<usize, DispatchError> {
        let workers = self.store.list().await?;
        let _guard = self.changes.lock().await;
        if self.is_stopped() {
            return Err(DispatchError::Stopped);
        }

        let mut started = 0;
        let mut entries = self.entries.write().await;
        for worker in workers {
            if entries.contains_key(&worker.id) {
                continue;
            }
            let session = self.open(&worker);
            started += usize::from(session.is_some());
            entries.insert(worker.id.clone(), Entry { worker, session });
        }
        tracing::info!(workers = entries.len(), sessions = started, "Worker pool started");
        Ok(started)
    }

    fn open(&self, worker: &Worker) -> Option<Arc<dyn WorkerSession>> {
        self.admission.register(worker);
        if !worker.enabled {
            return None;
        }
        tracing::debug!(worker_id = %worker.id, "Opening worker session");
        Some(self.connector.connect(worker, &self.cancel))
    }

    /// Add a worker or replace the configuration of a known one.
    ///
    /// The record is persisted first. A known worker keeps its live daily
    /// draw count whatever the supplied record says. A running session is
    /// kept when the credential is unchanged and the worker stays enabled;
    /// otherwise it is closed before the new one is opened.
    pub async fn add_worker(&self, mut worker: Worker) -> Result<(), DispatchError> {
        worker.validate()?;
        let _guard = self.changes.lock().await;
        if self.is_stopped() {
            return Err(DispatchError::Stopped);
        }
        if let Some(load) = self.admission.load(&worker.id) {
            worker.day_draw_count = load.day_draw_count;
        }
        self.store.upsert(&worker).await?;

        let previous = self.entries.write().await.remove(&worker.id);
        let kept = match previous {
            Some(Entry {
                worker: old,
                session: Some(session),
            }) if worker.enabled && old.credential == worker.credential => Some(session),
            Some(Entry {
                session: Some(session),
                ..
            }) => {
                self.close_session(&worker.id, session).await;
                None
            }
            _ => None,
        };

        let session = match kept {
            Some(session) => {
                self.admission.register(&worker);
                Some(session)
            }
            None => self.open(&worker),
        };
        tracing::info!(
            worker_id = %worker.id,
            enabled = worker.enabled,
            connected = session.is_some(),
            "Worker configuration applied",
        );
        self.entries
            .write()
            .await
            .insert(worker.id.clone(), Entry { worker, session });
        Ok(())
    }

    /// Remove a worker: it disappears from snapshots at once, and this
    /// returns only after its session has closed (or was abandoned after
    /// the close timeout).
    pub async fn remove_worker(&self, worker_id: &str) -> Result<bool, DispatchError> {
        let _guard = self.changes.lock().await;
        let removed = self.entries.write().await.remove(worker_id);
        if let Some(session) = removed.as_ref().and_then(|e| e.session.clone()) {
            self.close_session(worker_id, session).await;
        }
        let orphaned = self.admission.unregister(worker_id);
        if !orphaned.is_empty() {
            tracing::warn!(worker_id, jobs = orphaned.len(), "Removed worker still held jobs");
        }
        let deleted = self.store.delete(worker_id).await?;
        tracing::info!(worker_id, "Worker removed");
        Ok(removed.is_some() || deleted)
    }

    async fn close_session(&self, worker_id: &str, session: Arc<dyn WorkerSession>) {
        if let Err(e) = session.close().await {
            tracing::warn!(worker_id, error = %e, "Worker session abandoned");
        }
    }

    /// Close every session concurrently and wait for all of them, bounded
    /// by the shutdown timeout. Idempotent; concurrent callers all wait
    /// for the same shutdown.
    pub async fn stop(&self) {
        self.stop_done
            .get_or_init(|| async {
                self.stopped.store(true, Ordering::SeqCst);
                let _guard = self.changes.lock().await;
                tracing::info!("Stopping worker pool");
                self.cancel.cancel();

                let sessions: Vec<(WorkerId, Arc<dyn WorkerSession>)> = self
                    .entries
                    .write()
                    .await
                    .drain()
                    .filter_map(|(id, entry)| entry.session.map(|s| (id, s)))
                    .collect();
                let count = sessions.len();

                let closes = futures::future::join_all(
                    sessions
                        .iter()
                        .map(|(id, session)| self.close_session(id, Arc::clone(session))),
                );
                if tokio::time::timeout(self.shutdown_timeout, closes).await.is_err() {
                    tracing::error!(
                        sessions = count,
                        timeout_secs = self.shutdown_timeout.as_secs(),
                        "Worker sessions did not close within the shutdown timeout; abandoning",
                    );
                } else {
                    tracing::info!(sessions = count, "Worker pool stopped");
                }
            })
            .await;
    }

    /// Point-in-time copy of every worker in the pool.
    pub async fn snapshot(&self) -> HashMap<WorkerId, WorkerView> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.view(&self.admission)))
            .collect()
    }

    /// Snapshot ordered by `(sort, id)`.
    pub async fn views(&self) -> Vec<WorkerView> {
        let mut views: Vec<WorkerView> = self.snapshot().await.into_values().collect();
        views.sort_by(|a, b| {
            a.worker
                .sort
                .cmp(&b.worker.sort)
                .then_with(|| a.worker.id.cmp(&b.worker.id))
        });
        views
    }

    pub async fn view(&self, worker_id: &str) -> Option<WorkerView> {
        self.entries
            .read()
            .await
            .get(worker_id)
            .map(|e| e.view(&self.admission))
    }

    /// Current configuration of `worker_id`, with its live daily draw count.
    pub async fn worker(&self, worker_id: &str) -> Option<Worker> {
        self.view(worker_id).await.map(|v| v.worker)
    }

    /// Send an opaque frame on `worker_id`'s session. Returns the number
    /// of the connection it went out on (see [`SessionStatus::connections`]).
    ///
    /// [`SessionStatus::connections`]: drawproxy_gateway::SessionStatus::connections
    pub async fn submit(
        &self,
        worker_id: &str,
        payload: serde_json::Value,
    ) -> Result<u64, DispatchError> {
        let session = self
            .entries
            .read()
            .await
            .get(worker_id)
            .and_then(|e| e.session.clone())
            .ok_or_else(|| DispatchError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            })?;
        let connection = session.status().connections;
        session
            .submit(payload)
            .await
            .map_err(|source| DispatchError::Session {
                worker_id: worker_id.to_string(),
                source,
            })?;
        Ok(connection)
    }

    /// Persist a worker's daily draw counter.
    pub async fn record_draw_count(&self, worker_id: &str, count: i32) -> Result<(), DispatchError> {
        self.store.update_day_draw_count(worker_id, count).await?;
        Ok(())
    }

    /// Zero every worker's daily counter, in memory and in the store.
    pub async fn reset_daily_counters(&self) -> Result<u64, DispatchError> {
        self.admission.reset_day_counts();
        for entry in self.entries.write().await.values_mut() {
            entry.worker.day_draw_count = 0;
        }
        let touched = self.store.reset_day_draw_counts().await?;
        tracing::info!(touched, "Daily draw counters reset");
        Ok(touched)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
