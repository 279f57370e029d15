//! Per-worker admission gate.
//!
//! Tracks, for every worker in the pool, the jobs handed to its session
//! (`running`), the jobs admitted but not yet handed over (`pending`), the
//! last hand-over instant and the daily draw counter. All of it sits
//! behind one mutex that is never held across an await.
//!
//! Admission rules, checked under the lock:
//! - a worker whose daily quota is used up takes nothing;
//! - below `core_size` jobs a worker always takes the job;
//! - beyond that, up to `queue_size` jobs may wait (soft overflow);
//! - never more than `max_queue_size` jobs wait (hard overflow).
//!
//! Pacing does not refuse jobs: [`Admission::take_ready`] hands pending
//! jobs over no closer together than the worker's minimum interval.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use drawproxy_core::types::{JobId, Timestamp, WorkerId};
use drawproxy_core::worker::{quota_exhausted, Worker};

/// Limits copied from the worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub core_size: u32,
    pub queue_size: u32,
    pub max_queue_size: u32,
    pub min_interval: Duration,
    pub day_draw_limit: i32,
}

impl From<&Worker> for Limits {
    fn from(worker: &Worker) -> Self {
        Self {
            core_size: worker.core_size,
            queue_size: worker.queue_size,
            max_queue_size: worker.max_queue_size,
            min_interval: worker.min_interval(),
            day_draw_limit: worker.day_draw_limit,
        }
    }
}

/// Why a worker cannot take a job right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The worker is not registered.
    Unknown,
    QuotaExhausted,
    /// Concurrency ceiling and soft queue are both full.
    AtCapacity,
    /// The hard queue ceiling is reached.
    QueueFull,
}

/// Point-in-time counters for one worker.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Load {
    pub running: u32,
    pub pending: u32,
    /// Serialized through the worker record it is copied into.
    #[serde(skip_serializing)]
    pub day_draw_count: i32,
    /// When a job was last handed to the session.
    pub last_dispatch: Option<Timestamp>,
}

#[derive(Debug)]
struct Slot {
    limits: Limits,
    running: HashSet<JobId>,
    pending: VecDeque<JobId>,
    last_start: Option<Instant>,
    last_dispatch: Option<Timestamp>,
    day_count: i32,
}

impl Slot {
    fn new(limits: Limits, day_count: i32) -> Self {
        Self {
            limits,
            running: HashSet::new(),
            pending: VecDeque::new(),
            last_start: None,
            last_dispatch: None,
            day_count,
        }
    }

    fn load(&self) -> Load {
        Load {
            running: count(self.running.len()),
            pending: count(self.pending.len()),
            day_draw_count: self.day_count,
            last_dispatch: self.last_dispatch,
        }
    }

    fn check(&self) -> Result<(), Refusal> {
        if quota_exhausted(self.limits.day_draw_limit, self.day_count) {
            return Err(Refusal::QuotaExhausted);
        }
        let load = count(self.running.len() + self.pending.len());
        if load < self.limits.core_size {
            return Ok(());
        }
        let overflow = load - self.limits.core_size;
        if overflow >= self.limits.max_queue_size {
            return Err(Refusal::QueueFull);
        }
        if overflow >= self.limits.queue_size {
            return Err(Refusal::AtCapacity);
        }
        Ok(())
    }

    fn is_paced(&self, now: Instant) -> Option<Instant> {
        let next = self.last_start? + self.limits.min_interval;
        (now < next).then_some(next)
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[derive(Debug, Default)]
pub struct Admission {
    slots: Mutex<HashMap<WorkerId, Slot>>,
}

impl Admission {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, Slot>> {
        // Nothing panics while holding the lock; recover the map anyway.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a worker, or refresh the limits of a known one. Counters of a
    /// known worker are kept.
    pub fn register(&self, worker: &Worker) {
        let limits = Limits::from(worker);
        let mut slots = self.lock();
        match slots.get_mut(&worker.id) {
            Some(slot) => slot.limits = limits,
            None => {
                slots.insert(worker.id.clone(), Slot::new(limits, worker.day_draw_count));
            }
        }
    }

    /// Forget a worker. Returns the jobs it was still holding, running
    /// ones first.
    pub fn unregister(&self, worker_id: &str) -> Vec<JobId> {
        let Some(slot) = self.lock().remove(worker_id) else {
            return Vec::new();
        };
        slot.running.into_iter().chain(slot.pending).collect()
    }

    pub fn load(&self, worker_id: &str) -> Option<Load> {
        self.lock().get(worker_id).map(Slot::load)
    }

    /// Whether `worker_id` would admit a job right now.
    pub fn check(&self, worker_id: &str) -> Result<(), Refusal> {
        self.lock()
            .get(worker_id)
            .ok_or(Refusal::Unknown)
            .and_then(Slot::check)
    }

    /// Admit `job_id` onto `worker_id` if the worker still has room.
    ///
    /// Re-checks capacity and quota under the lock, so concurrent callers
    /// that selected the same worker from a stale snapshot cannot
    /// overshoot. On success the job is pending and counts against the
    /// daily quota; the new counter value is returned.
    pub fn try_acquire(&self, worker_id: &str, job_id: &str) -> Result<i32, Refusal> {
        let mut slots = self.lock();
        let slot = slots.get_mut(worker_id).ok_or(Refusal::Unknown)?;
        slot.check()?;
        slot.pending.push_back(job_id.to_string());
        slot.day_count = slot.day_count.saturating_add(1);
        Ok(slot.day_count)
    }

    /// Free whatever `job_id` holds on `worker_id`. Returns whether it
    /// held anything.
    pub fn release(&self, worker_id: &str, job_id: &str) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(worker_id) else {
            return false;
        };
        if slot.running.remove(job_id) {
            return true;
        }
        let before = slot.pending.len();
        slot.pending.retain(|id| id != job_id);
        slot.pending.len() != before
    }

    /// Undo an admission whose job was never handed over: drop it from
    /// the queue and give back its quota unit.
    pub fn withdraw(&self, worker_id: &str, job_id: &str) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(worker_id) else {
            return false;
        };
        let before = slot.pending.len();
        slot.pending.retain(|id| id != job_id);
        let withdrawn = slot.pending.len() != before;
        if withdrawn {
            slot.day_count = (slot.day_count - 1).max(0);
        }
        withdrawn
    }

    /// Put a job taken by [`Admission::take_ready`] back at the head of
    /// its worker's queue.
    pub fn requeue(&self, worker_id: &str, job_id: &str) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.get_mut(worker_id) else {
            return false;
        };
        if !slot.running.remove(job_id) {
            return false;
        }
        slot.pending.push_front(job_id.to_string());
        true
    }

    /// Move every pending job that may start now to running, for the
    /// workers `accepting` lets through.
    ///
    /// Returns the `(worker, job)` pairs to hand over, in queue order, and
    /// the earliest instant at which a paced job becomes startable.
    pub fn take_ready<F>(&self, now: Instant, accepting: F) -> (Vec<(WorkerId, JobId)>, Option<Instant>)
    where
        F: Fn(&str) -> bool,
    {
        let mut ready = Vec::new();
        let mut wake: Option<Instant> = None;
        let mut slots = self.lock();
        for (worker_id, slot) in slots.iter_mut() {
            if !accepting(worker_id) {
                continue;
            }
            while count(slot.running.len()) < slot.limits.core_size && !slot.pending.is_empty() {
                if let Some(next) = slot.is_paced(now) {
                    wake = Some(wake.map_or(next, |w| w.min(next)));
                    break;
                }
                let Some(job_id) = slot.pending.pop_front() else {
                    break;
                };
                slot.running.insert(job_id.clone());
                slot.last_start = Some(now);
                slot.last_dispatch = Some(chrono::Utc::now());
                ready.push((worker_id.clone(), job_id));
            }
        }
        (ready, wake)
    }

    /// Zero every daily counter.
    pub fn reset_day_counts(&self) {
        for slot in self.lock().values_mut() {
            slot.day_count = 0;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn worker(id: &str, core: u32, queue: u32) -> Worker {
        let mut w = Worker::new(id, "token");
        w.core_size = core;
        w.queue_size = queue;
        w.interval_secs = 0.0;
        w
    }

    #[test]
    fn core_then_soft_queue_then_refuse() {
        let adm = Admission::new();
        adm.register(&worker("w", 1, 1));

        adm.try_acquire("w", "j1").unwrap();
        adm.try_acquire("w", "j2").unwrap();
        assert_matches!(adm.try_acquire("w", "j3"), Err(Refusal::AtCapacity));

        let load = adm.load("w").unwrap();
        assert_eq!(load.pending, 2);
        assert_eq!(load.running, 0);
    }

    #[test]
    fn hard_ceiling_wins_over_soft() {
        let adm = Admission::new();
        let mut w = worker("w", 1, 2);
        w.max_queue_size = 1;
        adm.register(&w);

        adm.try_acquire("w", "j1").unwrap();
        adm.try_acquire("w", "j2").unwrap();
        assert_matches!(adm.try_acquire("w", "j3"), Err(Refusal::QueueFull));
    }

    #[test]
    fn quota_is_counted_on_admission() {
        let adm = Admission::new();
        let mut w = worker("w", 10, 0);
        w.day_draw_limit = 2;
        adm.register(&w);

        assert_eq!(adm.try_acquire("w", "j1").unwrap(), 1);
        assert_eq!(adm.try_acquire("w", "j2").unwrap(), 2);
        assert_matches!(adm.try_acquire("w", "j3"), Err(Refusal::QuotaExhausted));

        adm.reset_day_counts();
        assert!(adm.check("w").is_ok());
    }

    #[test]
    fn unknown_worker_is_refused() {
        let adm = Admission::new();
        assert_matches!(adm.try_acquire("ghost", "j"), Err(Refusal::Unknown));
    }

    #[test]
    fn take_ready_respects_core_size() {
        let adm = Admission::new();
        adm.register(&worker("w", 1, 5));
        adm.try_acquire("w", "j1").unwrap();
        adm.try_acquire("w", "j2").unwrap();

        let (ready, _) = adm.take_ready(Instant::now(), |_| true);
        assert_eq!(ready, vec![("w".to_string(), "j1".to_string())]);

        // Slot is busy until j1 is released.
        assert!(adm.take_ready(Instant::now(), |_| true).0.is_empty());
        assert!(adm.release("w", "j1"));
        let (ready, _) = adm.take_ready(Instant::now(), |_| true);
        assert_eq!(ready, vec![("w".to_string(), "j2".to_string())]);
    }

    #[test]
    fn take_ready_spaces_hand_overs() {
        let adm = Admission::new();
        let mut w = worker("w", 3, 0);
        w.interval_secs = 2.0;
        adm.register(&w);
        adm.try_acquire("w", "j1").unwrap();
        adm.try_acquire("w", "j2").unwrap();

        let start = Instant::now();
        let (ready, wake) = adm.take_ready(start, |_| true);
        assert_eq!(ready.len(), 1);
        assert_eq!(wake, Some(start + Duration::from_secs(2)));

        let (ready, _) = adm.take_ready(start + Duration::from_secs(2), |_| true);
        assert_eq!(ready, vec![("w".to_string(), "j2".to_string())]);
    }

    #[test]
    fn take_ready_leaves_jobs_of_unready_workers_queued() {
        let adm = Admission::new();
        adm.register(&worker("up", 1, 0));
        adm.register(&worker("down", 1, 0));
        adm.try_acquire("up", "j1").unwrap();
        adm.try_acquire("down", "j2").unwrap();

        let (ready, _) = adm.take_ready(Instant::now(), |id| id == "up");
        assert_eq!(ready, vec![("up".to_string(), "j1".to_string())]);
        assert_eq!(adm.load("down").unwrap().pending, 1);

        let (ready, _) = adm.take_ready(Instant::now(), |_| true);
        assert_eq!(ready, vec![("down".to_string(), "j2".to_string())]);
    }

    #[test]
    fn requeue_puts_job_back_at_the_head() {
        let adm = Admission::new();
        adm.register(&worker("w", 1, 5));
        adm.try_acquire("w", "j1").unwrap();
        adm.try_acquire("w", "j2").unwrap();
        adm.take_ready(Instant::now(), |_| true);

        assert!(adm.requeue("w", "j1"));
        assert!(!adm.requeue("w", "j1"));
        let load = adm.load("w").unwrap();
        assert_eq!((load.running, load.pending), (0, 2));
        let (ready, _) = adm.take_ready(Instant::now(), |_| true);
        assert_eq!(ready, vec![("w".to_string(), "j1".to_string())]);
    }

    #[test]
    fn withdraw_refunds_the_quota_unit() {
        let adm = Admission::new();
        let mut w = worker("w", 1, 0);
        w.day_draw_limit = 1;
        adm.register(&w);
        adm.try_acquire("w", "j1").unwrap();
        assert_matches!(adm.check("w"), Err(Refusal::QuotaExhausted));

        assert!(adm.withdraw("w", "j1"));
        assert!(!adm.withdraw("w", "j1"));
        assert_eq!(adm.load("w").unwrap().day_draw_count, 0);
        assert!(adm.check("w").is_ok());
    }

    #[test]
    fn release_of_pending_job_drops_it_from_queue() {
        let adm = Admission::new();
        adm.register(&worker("w", 1, 5));
        adm.try_acquire("w", "j1").unwrap();
        assert!(adm.release("w", "j1"));
        assert!(!adm.release("w", "j1"));
        assert!(adm.take_ready(Instant::now(), |_| true).0.is_empty());
    }

    #[test]
    fn register_keeps_counters_of_known_worker() {
        let adm = Admission::new();
        adm.register(&worker("w", 1, 0));
        adm.try_acquire("w", "j1").unwrap();

        adm.register(&worker("w", 2, 0));
        let load = adm.load("w").unwrap();
        assert_eq!(load.pending, 1);
        assert_eq!(load.day_draw_count, 1);
        assert!(adm.check("w").is_ok());

        assert_eq!(adm.unregister("w"), vec!["j1".to_string()]);
        assert!(adm.load("w").is_none());
    }
}
