//! In-process stand-ins for gateway sessions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use drawproxy_core::job::Job;
use drawproxy_core::store::{JobCountQuery, JobQuery, JobStore, StoreError};
use drawproxy_core::worker::Worker;
use drawproxy_db::MemoryStore;
use drawproxy_events::EventBus;
use drawproxy_gateway::{SessionError, SessionState, SessionStatus};

use crate::admission::Load;
use crate::connector::{SessionConnector, WorkerSession};
use crate::dispatcher::Dispatcher;
use crate::pool::{WorkerPool, WorkerView};
use crate::selection::{SelectMode, Selector};

/// Worker with no pacing, so tests never wait on the launch interval.
pub fn worker(id: &str) -> Worker {
    let mut w = Worker::new(id, "token");
    w.interval_secs = 0.0;
    w
}

pub fn view(worker: Worker, state: SessionState) -> WorkerView {
    WorkerView {
        worker,
        state,
        last_heartbeat_ack: None,
        last_error: None,
        load: Load::default(),
    }
}

pub struct FakeSession {
    status: Mutex<SessionStatus>,
    sent: Mutex<Vec<serde_json::Value>>,
    closed: AtomicBool,
    hang_on_close: bool,
    broken: AtomicBool,
}

impl FakeSession {
    pub fn set_state(&self, state: SessionState) {
        self.status.lock().unwrap().state = state;
    }

    /// Simulate a reconnect: READY again on connection number `n`.
    pub fn reconnected(&self, n: u64) {
        let mut status = self.status.lock().unwrap();
        status.state = SessionState::Ready;
        status.connections = n;
    }

    /// Make submissions fail with a transport error.
    pub fn break_transport(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSession for FakeSession {
    fn status(&self) -> SessionStatus {
        self.status.lock().unwrap().clone()
    }

    async fn submit(&self, payload: serde_json::Value) -> Result<(), SessionError> {
        let state = self.status.lock().unwrap().state;
        if state != SessionState::Ready {
            return Err(SessionError::NotReady(state));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Disconnected);
        Ok(())
    }
}

/// Connector whose sessions start in a fixed state.
pub struct FakeConnector {
    initial: SessionState,
    hang_on_close: bool,
    sessions: Mutex<HashMap<String, Arc<FakeSession>>>,
    opened: Mutex<Vec<String>>,
}

impl FakeConnector {
    pub fn ready() -> Self {
        Self {
            initial: SessionState::Ready,
            hang_on_close: false,
            sessions: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn with_hanging_close(mut self) -> Self {
        self.hang_on_close = true;
        self
    }

    /// Latest session opened for `worker_id`.
    pub fn session(&self, worker_id: &str) -> Option<Arc<FakeSession>> {
        self.sessions.lock().unwrap().get(worker_id).cloned()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl SessionConnector for FakeConnector {
    fn connect(&self, worker: &Worker, _parent: &CancellationToken) -> Arc<dyn WorkerSession> {
        let session = Arc::new(FakeSession {
            status: Mutex::new(SessionStatus {
                state: self.initial,
                connections: u64::from(self.initial == SessionState::Ready),
                ..SessionStatus::default()
            }),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            hang_on_close: self.hang_on_close,
            broken: AtomicBool::new(false),
        });
        self.sessions
            .lock()
            .unwrap()
            .insert(worker.id.clone(), Arc::clone(&session));
        self.opened.lock().unwrap().push(worker.id.clone());
        session
    }
}

/// Job store that can be switched into failing every update.
pub struct FailingJobStore {
    inner: Arc<MemoryStore>,
    fail_updates: AtomicBool,
}

impl FailingJobStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_updates: AtomicBool::new(false),
        }
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for FailingJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        JobStore::insert(self.inner.as_ref(), job).await
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        JobStore::get(self.inner.as_ref(), id).await
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        JobStore::update(self.inner.as_ref(), job).await
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        JobStore::list(self.inner.as_ref(), query).await
    }

    async fn count(&self, query: &JobCountQuery) -> Result<i64, StoreError> {
        JobStore::count(self.inner.as_ref(), query).await
    }
}

/// Dispatcher over fake sessions and an in-memory store.
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub connector: Arc<FakeConnector>,
    pub store: Arc<MemoryStore>,
    pub jobs: Arc<FailingJobStore>,
}

pub async fn harness(workers: Vec<Worker>, mode: SelectMode) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let connector = Arc::new(FakeConnector::ready());
    let pool = Arc::new(WorkerPool::with_selector(
        Arc::clone(&connector) as _,
        Arc::clone(&store) as _,
        Selector::seeded(mode, 7),
        Duration::from_secs(1),
    ));
    for w in workers {
        pool.add_worker(w).await.unwrap();
    }
    let jobs = Arc::new(FailingJobStore::new(Arc::clone(&store)));
    let dispatcher = Arc::new(Dispatcher::new(
        pool,
        Arc::clone(&jobs) as _,
        Arc::new(EventBus::default()),
    ));
    Harness {
        dispatcher,
        connector,
        store,
        jobs,
    }
}
