//! Persistence collaborator contracts.
//!
//! The dispatch engine only needs atomic single-record upserts and simple
//! filter queries; concrete engines live in `drawproxy-db`.

use async_trait::async_trait;

use crate::job::{Job, JobStatus};
use crate::types::{Timestamp, WorkerId};
use crate::worker::Worker;

/// Default page size for job listing.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Maximum page size for job listing.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Errors surfaced by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Filter for listing jobs. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    pub worker_id: Option<WorkerId>,
    pub parent_id: Option<String>,
    pub limit: Option<i64>,
}

impl JobQuery {
    /// Effective page size, clamped to `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Filter for counting jobs, used by overview reporting and quota checks.
#[derive(Debug, Clone, Default)]
pub struct JobCountQuery {
    pub status: Option<JobStatus>,
    pub worker_id: Option<WorkerId>,
    /// Only jobs submitted at or after this instant.
    pub since: Option<Timestamp>,
}

impl JobCountQuery {
    /// Whether `job` satisfies every set constraint.
    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self
                .worker_id
                .as_deref()
                .is_none_or(|w| job.worker_id.as_deref() == Some(w))
            && self.since.is_none_or(|t| job.submit_time >= t)
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Replace the stored record with `job` (upsert).
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Newest first.
    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError>;

    async fn count(&self, query: &JobCountQuery) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Worker>, StoreError>;

    async fn list_enabled(&self) -> Result<Vec<Worker>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Worker>, StoreError>;

    async fn upsert(&self, worker: &Worker) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn update_day_draw_count(&self, id: &str, count: i32) -> Result<(), StoreError>;

    /// Zero every worker's daily counter. Returns the number of rows touched.
    async fn reset_day_draw_counts(&self) -> Result<u64, StoreError>;
}
