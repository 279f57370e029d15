//! Job dispatch service.
//!
//! [`Dispatcher::submit`] creates the job record, picks and binds a worker
//! and returns; the remote submission happens later on the launch loop
//! ([`Dispatcher::run_launcher`]), which hands admitted jobs to their
//! worker's session as capacity and pacing allow.
//!
//! Every non-terminal bound job is tracked in memory behind its own async
//! mutex. Transitions lock the job, mutate it, persist it and publish a
//! [`JobEvent`] before the lock is released, so a job's stored snapshots
//! and events are always in transition order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use drawproxy_core::error::CoreError;
use drawproxy_core::filter::SelectionFilter;
use drawproxy_core::job::{Job, JobStatus};
use drawproxy_core::store::{JobCountQuery, JobQuery, JobStore};
use drawproxy_core::types::{JobId, Timestamp, WorkerId};
use drawproxy_core::worker::{Worker, DEFAULT_TIMEOUT_MINUTES};
use drawproxy_events::{EventBus, JobEvent};
use drawproxy_gateway::{SessionError, SessionState};

use crate::admission::Refusal;
use crate::command::{command_payload, describe_command, SubmitRequest};
use crate::error::DispatchError;
use crate::pool::WorkerPool;
use crate::selection::{eligible, Requirement};

pub const REASON_NO_ELIGIBLE_WORKER: &str = "no eligible worker";
pub const REASON_CAPACITY_EXHAUSTED: &str = "all eligible workers are at capacity";
pub const REASON_WORKER_DISCONNECTED: &str = "worker disconnected";
pub const REASON_WORKER_REMOVED: &str = "worker removed";
pub const REASON_WORKER_DISABLED: &str = "worker disabled";
pub const REASON_TIMEOUT: &str = "task timeout";

/// A bound, non-terminal job.
#[derive(Clone)]
pub(crate) struct Tracked {
    job: Arc<AsyncMutex<Job>>,
    pub(crate) worker_id: WorkerId,
    pub(crate) nonce: String,
    pub(crate) prompt: String,
    /// Remote message of the parent's output, for child actions.
    pub(crate) parent_message_id: Option<String>,
    pub(crate) status: JobStatus,
    pub(crate) message_id: Option<String>,
    pub(crate) started: Timestamp,
    /// Session connection the job was handed to; `None` while queued.
    pub(crate) launched_on: Option<u64>,
}

/// Why no worker was bound.
enum Rejection {
    NoEligible(String),
    Capacity(String),
}

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    jobs: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    active: Mutex<HashMap<JobId, Tracked>>,
    launcher: Notify,
}

impl Dispatcher {
    pub fn new(pool: Arc<WorkerPool>, jobs: Arc<dyn JobStore>, bus: Arc<EventBus>) -> Self {
        Self {
            pool,
            jobs,
            bus,
            active: Mutex::new(HashMap::new()),
            launcher: Notify::new(),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, Tracked>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- queries ----

    pub async fn get(&self, job_id: &str) -> Result<Job, DispatchError> {
        self.jobs.get(job_id).await?.ok_or_else(|| {
            DispatchError::Core(CoreError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            })
        })
    }

    pub async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, DispatchError> {
        Ok(self.jobs.list(query).await?)
    }

    pub async fn count(&self, query: &JobCountQuery) -> Result<i64, DispatchError> {
        Ok(self.jobs.count(query).await?)
    }

    /// Number of bound, non-terminal jobs.
    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    // ---- submission ----

    /// Create a job and bind it to a worker.
    ///
    /// Child actions are bound to their parent's worker without going
    /// through selection. When no worker can be bound the job is stored
    /// as `FAILURE` and the error names it.
    pub async fn submit(&self, req: SubmitRequest) -> Result<Job, DispatchError> {
        if self.pool.is_stopped() {
            return Err(DispatchError::Stopped);
        }

        let mut job = Job::new(req.action, req.prompt, String::new());
        job.bot_type = req.bot_type.unwrap_or(job.bot_type);
        job.mode = req.mode;
        job.state = req.state;
        job.notify_hook = req.notify_hook;
        job.client_ip = req.client_ip;
        job.user_id = req.user_id;
        job.properties = req.properties;

        let filter = if req.action.requires_parent() {
            let parent = self.ready_parent(req.parent_id.as_deref()).await?;
            let parent_worker = parent.worker_id.clone().unwrap_or_default();
            job.parent_id = Some(parent.id.clone());
            job.bot_type = parent.bot_type;
            job.mode = job.mode.or(parent.mode);
            if job.prompt.is_empty() {
                job.prompt = parent.prompt.clone();
            }
            if let Some(message_id) = parent.message_id {
                job.properties
                    .insert("parent_message_id".into(), message_id.into());
            }
            SelectionFilter::pinned(parent_worker)
        } else {
            let mut filter = req.filter.unwrap_or_default();
            if let Some(bot) = filter.bot_type {
                job.bot_type = bot;
            }
            if job.mode.is_none() {
                job.mode = filter.modes.first().copied();
            }
            filter.bot_type = Some(job.bot_type);
            filter
        };
        job.description =
            describe_command(job.action, &job.prompt, job.parent_id.as_deref(), &job.properties);
        job.filter = (!filter.is_empty()).then(|| filter.clone());

        self.jobs.insert(&job).await?;
        self.bus.publish(JobEvent::from_job(&job));

        let cell = Arc::new(AsyncMutex::new(job));
        let mut guard = Arc::clone(&cell).lock_owned().await;
        let bound = if guard.action.requires_parent() {
            self.bind_pinned(&cell, &mut guard, &filter).await
        } else {
            self.bind_selected(&cell, &mut guard, &filter).await
        };

        match bound {
            Ok((worker_id, day_count)) => {
                if let Err(e) = self.jobs.update(&guard).await {
                    // Nobody learns this job's id; take it back out.
                    self.active().remove(&guard.id);
                    self.pool.admission().withdraw(&worker_id, &guard.id);
                    tracing::error!(job_id = %guard.id, worker_id = %worker_id, error = %e, "Failed to persist bound job");
                    return Err(e.into());
                }
                self.bus.publish(JobEvent::from_job(&guard));
                tracing::info!(
                    job_id = %guard.id,
                    worker_id = %worker_id,
                    action = %guard.action,
                    "Job bound to worker",
                );
                let job = guard.clone();
                drop(guard);
                if let Err(e) = self.pool.record_draw_count(&worker_id, day_count).await {
                    tracing::warn!(worker_id = %worker_id, error = %e, "Failed to persist draw count");
                }
                self.launcher.notify_one();
                Ok(job)
            }
            Err(rejection) => {
                let (reason, err) = match rejection {
                    Rejection::NoEligible(reason) => (
                        reason,
                        DispatchError::NoEligibleWorker {
                            job_id: guard.id.clone(),
                        },
                    ),
                    Rejection::Capacity(reason) => (
                        reason,
                        DispatchError::CapacityExhausted {
                            job_id: guard.id.clone(),
                        },
                    ),
                };
                guard.fail(reason.as_str())?;
                self.jobs.update(&guard).await?;
                self.bus.publish(JobEvent::from_job(&guard));
                tracing::info!(job_id = %guard.id, reason = %reason, "Job rejected at dispatch");
                Err(err)
            }
        }
    }

    async fn ready_parent(&self, parent_id: Option<&str>) -> Result<Job, DispatchError> {
        let parent_id = parent_id.filter(|id| !id.is_empty()).ok_or_else(|| {
            CoreError::Validation("this action needs a parent job".into())
        })?;
        let parent = self.get(parent_id).await?;
        if parent.status != JobStatus::Success || parent.worker_id.is_none() {
            return Err(DispatchError::ParentNotReady {
                parent_id: parent.id,
                status: parent.status,
            });
        }
        Ok(parent)
    }

    /// Bind to the one worker the filter pins (the parent's worker).
    async fn bind_pinned(
        &self,
        cell: &Arc<AsyncMutex<Job>>,
        job: &mut OwnedMutexGuard<Job>,
        filter: &SelectionFilter,
    ) -> Result<(WorkerId, i32), Rejection> {
        let worker_id = filter.instance_id.clone().unwrap_or_default();
        let available = self
            .pool
            .view(&worker_id)
            .await
            .is_some_and(|v| v.worker.is_active() && v.state == SessionState::Ready);
        if !available {
            return Err(Rejection::NoEligible(format!(
                "worker {worker_id} holding the parent job is not available"
            )));
        }
        self.bind(cell, job, &worker_id)
            .map(|count| (worker_id.clone(), count))
            .map_err(|refusal| match refusal {
                Refusal::Unknown => Rejection::NoEligible(format!(
                    "worker {worker_id} holding the parent job is not available"
                )),
                _ => Rejection::Capacity(format!("worker {worker_id} is at capacity")),
            })
    }

    /// Eligibility, admission, then the selection strategy; a worker that
    /// refuses at bind time (stale snapshot) is dropped and the pick
    /// repeated.
    async fn bind_selected(
        &self,
        cell: &Arc<AsyncMutex<Job>>,
        job: &mut OwnedMutexGuard<Job>,
        filter: &SelectionFilter,
    ) -> Result<(WorkerId, i32), Rejection> {
        let snapshot = self.pool.snapshot().await;
        let req = Requirement {
            filter,
            action: job.action,
            bot_type: job.bot_type,
        };
        let mut candidates = eligible(snapshot.values(), &req);
        if candidates.is_empty() {
            return Err(Rejection::NoEligible(REASON_NO_ELIGIBLE_WORKER.into()));
        }

        let admission = self.pool.admission();
        candidates.retain(|v| admission.check(&v.worker.id).is_ok());
        loop {
            let Some(picked) = self.pool.selector().select(&candidates) else {
                return Err(Rejection::Capacity(REASON_CAPACITY_EXHAUSTED.into()));
            };
            let worker_id = picked.worker.id.clone();
            match self.bind(cell, job, &worker_id) {
                Ok(count) => return Ok((worker_id, count)),
                Err(refusal) => {
                    tracing::debug!(worker_id = %worker_id, ?refusal, "Worker refused at bind time");
                    candidates.retain(|v| v.worker.id != worker_id);
                }
            }
        }
    }

    /// Admit the job on `worker_id`, move it to `SUBMITTED` and start
    /// tracking it, all under the tracking lock so the launch loop never
    /// sees an admitted job it cannot find.
    fn bind(
        &self,
        cell: &Arc<AsyncMutex<Job>>,
        job: &mut OwnedMutexGuard<Job>,
        worker_id: &str,
    ) -> Result<i32, Refusal> {
        let mut active = self.active();
        let admission = self.pool.admission();
        let count = admission.try_acquire(worker_id, &job.id)?;
        if let Err(e) = job.mark_submitted(worker_id) {
            tracing::error!(job_id = %job.id, error = %e, "Admitted job could not be marked submitted");
            admission.release(worker_id, &job.id);
            return Err(Refusal::Unknown);
        }
        active.insert(
            job.id.clone(),
            Tracked {
                job: Arc::clone(cell),
                worker_id: worker_id.to_string(),
                nonce: job.nonce.clone(),
                prompt: job.prompt.clone(),
                parent_message_id: job
                    .properties
                    .get("parent_message_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                status: job.status,
                message_id: None,
                started: job.start_time.unwrap_or(job.submit_time),
                launched_on: None,
            },
        );
        Ok(count)
    }

    // ---- transitions ----

    fn tracked(&self, job_id: &str) -> Option<Tracked> {
        self.active().get(job_id).cloned()
    }

    /// Tracked jobs bound to `worker_id`, oldest first.
    pub(crate) fn tracked_on(&self, worker_id: &str) -> Vec<(JobId, Tracked)> {
        let mut jobs: Vec<(JobId, Tracked)> = self
            .active()
            .iter()
            .filter(|(_, t)| t.worker_id == worker_id)
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();
        jobs.sort_by(|a, b| a.1.started.cmp(&b.1.started).then_with(|| a.0.cmp(&b.0)));
        jobs
    }

    /// Tracked job on `worker_id` that was submitted with `nonce`.
    pub(crate) fn find_by_nonce(&self, worker_id: &str, nonce: &str) -> Option<JobId> {
        self.active()
            .iter()
            .find(|(_, t)| t.worker_id == worker_id && t.nonce == nonce)
            .map(|(id, _)| id.clone())
    }

    /// Tracked job on `worker_id` a content update belongs to.
    ///
    /// Tried in order: the job's own message, the message being replied
    /// to (the job's, or its parent's output for child actions), then the
    /// prompt text. Prompt matches prefer the oldest job that has not yet
    /// been tied to a message.
    pub(crate) fn find_for_content(
        &self,
        worker_id: &str,
        message_id: &str,
        referenced: Option<&str>,
        prompt: Option<&str>,
    ) -> Option<JobId> {
        let jobs = self.tracked_on(worker_id);
        let owns = |t: &Tracked, m: &str| t.message_id.as_deref() == Some(m);

        if let Some((id, _)) = jobs.iter().find(|(_, t)| owns(t, message_id)) {
            return Some(id.clone());
        }
        if let Some(r) = referenced {
            let replied = jobs.iter().find(|(_, t)| owns(t, r)).or_else(|| {
                jobs.iter()
                    .find(|(_, t)| t.message_id.is_none() && t.parent_message_id.as_deref() == Some(r))
            });
            if let Some((id, _)) = replied {
                return Some(id.clone());
            }
        }
        let prompt = prompt.map(str::trim).filter(|p| !p.is_empty())?;
        let same_prompt = |t: &&(JobId, Tracked)| t.1.prompt.trim() == prompt;
        jobs.iter()
            .filter(same_prompt)
            .find(|(_, t)| t.message_id.is_none())
            .or_else(|| jobs.iter().find(same_prompt))
            .map(|(id, _)| id.clone())
    }

    /// Apply `change` to a tracked job. `change` returns whether it
    /// modified the job; unmodified jobs are neither persisted nor
    /// published. Returns `None` when the job is not tracked.
    pub(crate) async fn apply<F>(&self, job_id: &str, change: F) -> Result<Option<Job>, DispatchError>
    where
        F: FnOnce(&mut Job) -> Result<bool, CoreError>,
    {
        let Some(tracked) = self.tracked(job_id) else {
            return Ok(None);
        };
        let mut job = tracked.job.lock().await;
        if job.is_finished() {
            // Finished by a concurrent transition since the lookup.
            return Ok(None);
        }
        match change(&mut *job) {
            Ok(true) => {}
            Ok(false) => return Ok(Some(job.clone())),
            Err(e) => {
                if matches!(e, CoreError::InvalidTransition { .. }) {
                    tracing::error!(job_id, error = %e, "Rejected job transition");
                }
                return Err(e.into());
            }
        }
        let persisted = self.jobs.update(&job).await;
        match &persisted {
            Ok(()) => self.bus.publish(JobEvent::from_job(&job)),
            Err(e) => tracing::error!(job_id, status = %job.status, error = %e, "Failed to persist job transition"),
        }
        let snapshot = job.clone();
        drop(job);

        // A finished job gives its slot back even when the store is down.
        if snapshot.is_finished() {
            self.retire(&snapshot);
        } else if let Some(t) = self.active().get_mut(job_id) {
            t.status = snapshot.status;
            t.message_id = snapshot.message_id.clone();
        }
        persisted?;
        Ok(Some(snapshot))
    }

    /// Stop tracking a finished job and free its admission slot.
    fn retire(&self, job: &Job) {
        self.active().remove(&job.id);
        if let Some(worker_id) = job.worker_id.as_deref() {
            if self.pool.admission().release(worker_id, &job.id) {
                self.launcher.notify_one();
            }
        }
        tracing::info!(
            job_id = %job.id,
            status = %job.status,
            reason = job.fail_reason.as_deref().unwrap_or_default(),
            "Job finished",
        );
    }

    /// Move a job to `IN_PROGRESS`, recording a progress marker and the
    /// remote message carrying its output when known.
    pub(crate) async fn mark_in_progress(
        &self,
        job_id: &str,
        progress: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<Option<Job>, DispatchError> {
        self.apply(job_id, |job| {
            let new_message = message_id.filter(|m| job.message_id.as_deref() != Some(*m));
            let advancing = job.status == JobStatus::Submitted;
            let new_progress = progress.filter(|p| job.progress.as_deref() != Some(*p));
            if !advancing && new_message.is_none() && new_progress.is_none() {
                return Ok(false);
            }
            job.mark_in_progress(progress)?;
            if let Some(m) = new_message {
                job.message_id = Some(m.to_string());
            }
            Ok(true)
        })
        .await
    }

    pub(crate) async fn complete(
        &self,
        job_id: &str,
        image_url: String,
        thumbnail_url: Option<String>,
        message_id: &str,
    ) -> Result<Option<Job>, DispatchError> {
        self.apply(job_id, |job| {
            job.message_id = Some(message_id.to_string());
            job.succeed(Some(image_url), thumbnail_url)?;
            Ok(true)
        })
        .await
    }

    pub async fn fail_job(&self, job_id: &str, reason: &str) -> Result<Option<Job>, DispatchError> {
        self.apply(job_id, |job| {
            job.fail(reason)?;
            Ok(true)
        })
        .await
    }

    /// Fail every tracked job on `worker_id`, queued or handed over.
    /// Returns how many failed.
    pub async fn fail_worker_jobs(&self, worker_id: &str, reason: &str) -> usize {
        self.fail_where(worker_id, reason, |_| true).await
    }

    /// Fail the jobs a lost connection was serving: those handed to
    /// connection `connection` or an earlier one. `IN_PROGRESS` jobs
    /// survive when the session will resume. Queued jobs stay queued.
    pub async fn fail_disconnected(&self, worker_id: &str, connection: u64, resumable: bool) -> usize {
        self.fail_where(worker_id, REASON_WORKER_DISCONNECTED, |t| {
            let on_lost_connection = t.launched_on.is_some_and(|c| c <= connection);
            on_lost_connection && !(resumable && t.status == JobStatus::InProgress)
        })
        .await
    }

    async fn fail_where<F>(&self, worker_id: &str, reason: &str, pred: F) -> usize
    where
        F: Fn(&Tracked) -> bool,
    {
        let mut failed = 0;
        for (job_id, tracked) in self.tracked_on(worker_id) {
            if !pred(&tracked) {
                continue;
            }
            match self.fail_job(&job_id, reason).await {
                Ok(Some(_)) => failed += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to fail job"),
            }
        }
        if failed > 0 {
            tracing::warn!(worker_id, failed, reason, "Failed jobs bound to worker");
        }
        failed
    }

    /// Cancel a job. Terminal jobs are refused with
    /// [`CoreError::InvalidTransition`].
    pub async fn cancel(&self, job_id: &str) -> Result<Job, DispatchError> {
        let cancel = |job: &mut Job| -> Result<bool, CoreError> {
            job.cancel()?;
            Ok(true)
        };
        if let Some(job) = self.apply(job_id, cancel).await? {
            return Ok(job);
        }

        // Untracked: finished already, or never bound.
        let mut job = self.get(job_id).await?;
        if let Err(e) = job.cancel() {
            tracing::warn!(job_id, error = %e, "Cancel refused");
            return Err(e.into());
        }
        self.jobs.update(&job).await?;
        self.bus.publish(JobEvent::from_job(&job));
        Ok(job)
    }

    // ---- workers ----

    /// Add or replace a worker. Disabling it fails the jobs it still holds.
    pub async fn upsert_worker(&self, worker: Worker) -> Result<(), DispatchError> {
        let worker_id = worker.id.clone();
        let enabled = worker.enabled;
        self.pool.add_worker(worker).await?;
        if !enabled {
            self.fail_worker_jobs(&worker_id, REASON_WORKER_DISABLED)
                .await;
        }
        Ok(())
    }

    pub async fn set_worker_enabled(&self, worker_id: &str, enabled: bool) -> Result<Worker, DispatchError> {
        let mut worker = self.pool.worker(worker_id).await.ok_or_else(|| {
            DispatchError::WorkerNotFound {
                worker_id: worker_id.to_string(),
            }
        })?;
        worker.enabled = enabled;
        worker.disabled_reason = (!enabled).then(|| "disabled by operator".to_string());
        worker.updated_at = chrono::Utc::now();
        self.upsert_worker(worker.clone()).await?;
        Ok(worker)
    }

    pub async fn remove_worker(&self, worker_id: &str) -> Result<bool, DispatchError> {
        let removed = self.pool.remove_worker(worker_id).await?;
        self.fail_worker_jobs(worker_id, REASON_WORKER_REMOVED)
            .await;
        Ok(removed)
    }

    // ---- background ----

    /// Fail jobs that started longer ago than their worker's timeout.
    pub async fn sweep_timeouts(&self, now: Timestamp) -> usize {
        let tracked: Vec<(JobId, Tracked)> = self
            .active()
            .iter()
            .map(|(id, t)| (id.clone(), t.clone()))
            .collect();

        let mut timeouts: HashMap<WorkerId, chrono::Duration> = HashMap::new();
        let mut expired = 0;
        for (job_id, t) in tracked {
            let timeout = match timeouts.get(&t.worker_id) {
                Some(d) => *d,
                None => {
                    let minutes = self
                        .pool
                        .worker(&t.worker_id)
                        .await
                        .map_or(DEFAULT_TIMEOUT_MINUTES, |w| w.timeout_minutes);
                    let d = chrono::Duration::minutes(i64::from(minutes));
                    timeouts.insert(t.worker_id.clone(), d);
                    d
                }
            };
            if now - t.started < timeout {
                continue;
            }
            match self.fail_job(&job_id, REASON_TIMEOUT).await {
                Ok(Some(_)) => expired += 1,
                Ok(None) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Failed to time out job"),
            }
        }
        expired
    }

    /// Wake the launch loop, e.g. when a session becomes ready.
    pub(crate) fn wake_launcher(&self) {
        self.launcher.notify_one();
    }

    /// Workers whose session is READY right now.
    async fn ready_workers(&self) -> HashSet<WorkerId> {
        self.pool
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, v)| v.is_ready())
            .map(|(id, _)| id)
            .collect()
    }

    /// Hand admitted jobs to their sessions until `cancel` fires. Jobs of
    /// workers that are not READY stay queued.
    pub async fn run_launcher(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!("Job launcher started");
        loop {
            let accepting = self.ready_workers().await;
            let (ready, wake) = self
                .pool
                .admission()
                .take_ready(tokio::time::Instant::now(), |id| accepting.contains(id));
            for (worker_id, job_id) in ready {
                let this = Arc::clone(&self);
                tokio::spawn(async move { this.launch(&worker_id, &job_id).await });
            }

            let paced = async {
                match wake {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job launcher shutting down");
                    break;
                }
                _ = self.launcher.notified() => {}
                _ = paced => {}
            }
        }
    }

    async fn launch(&self, worker_id: &str, job_id: &str) {
        let Some(tracked) = self.tracked(job_id) else {
            // Finished while it was waiting.
            self.pool.admission().release(worker_id, job_id);
            return;
        };
        let job = tracked.job.lock().await.clone();
        let worker = self.pool.worker(worker_id).await;
        let payload = command_payload(&job, worker.as_ref());

        match self.pool.submit(worker_id, payload).await {
            Ok(connection) => {
                if let Some(t) = self.active().get_mut(job_id) {
                    t.launched_on = Some(connection);
                }
                tracing::debug!(job_id, worker_id, connection, "Job handed to session");
            }
            Err(DispatchError::Session {
                source: SessionError::NotReady(state),
                ..
            }) => {
                // Lost READY since the launcher looked; wait for the next one.
                self.pool.admission().requeue(worker_id, job_id);
                tracing::debug!(job_id, worker_id, %state, "Session not ready, job requeued");
            }
            Err(e) => {
                tracing::warn!(job_id, worker_id, error = %e, "Job submission failed");
                let reason = format!("submit failed: {e}");
                if let Err(e) = self.fail_job(job_id, &reason).await {
                    tracing::warn!(job_id, error = %e, "Failed to record submission failure");
                }
            }
        }
    }
}

#[cfg(test)]
impl Dispatcher {
    /// One launch pass, awaited inline.
    pub(crate) async fn launch_pending(&self) {
        let accepting = self.ready_workers().await;
        let (ready, _) = self
            .pool
            .admission()
            .take_ready(tokio::time::Instant::now(), |id| accepting.contains(id));
        for (worker_id, job_id) in ready {
            self.launch(&worker_id, &job_id).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
