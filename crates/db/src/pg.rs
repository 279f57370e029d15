//! PostgreSQL store.

use async_trait::async_trait;

use drawproxy_core::job::Job;
use drawproxy_core::store::{JobCountQuery, JobQuery, JobStore, StoreError, WorkerStore};
use drawproxy_core::worker::Worker;

use crate::models::worker::signed;
use crate::repositories::worker_repo::WorkerLimits;
use crate::repositories::{JobRepo, WorkerRepo};
use crate::DbPool;

/// Job and worker persistence on a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        JobRepo::upsert(&self.pool, job).await.map_err(backend)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(Job::try_from)
            .transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        JobRepo::upsert(&self.pool, job).await.map_err(backend)
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        JobRepo::list(&self.pool, query)
            .await
            .map_err(backend)?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn count(&self, query: &JobCountQuery) -> Result<i64, StoreError> {
        JobRepo::count(&self.pool, query).await.map_err(backend)
    }
}

#[async_trait]
impl WorkerStore for PgStore {
    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        WorkerRepo::list(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(Worker::try_from)
            .collect()
    }

    async fn list_enabled(&self) -> Result<Vec<Worker>, StoreError> {
        WorkerRepo::list_enabled(&self.pool)
            .await
            .map_err(backend)?
            .into_iter()
            .map(Worker::try_from)
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Worker>, StoreError> {
        WorkerRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend)?
            .map(Worker::try_from)
            .transpose()
    }

    async fn upsert(&self, worker: &Worker) -> Result<(), StoreError> {
        let limits = WorkerLimits {
            core_size: signed("core_size", worker.core_size)?,
            queue_size: signed("queue_size", worker.queue_size)?,
            max_queue_size: signed("max_queue_size", worker.max_queue_size)?,
            timeout_minutes: signed("timeout_minutes", worker.timeout_minutes)?,
        };
        WorkerRepo::upsert(&self.pool, worker, &limits)
            .await
            .map_err(backend)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        WorkerRepo::delete(&self.pool, id).await.map_err(backend)
    }

    async fn update_day_draw_count(&self, id: &str, count: i32) -> Result<(), StoreError> {
        WorkerRepo::update_day_draw_count(&self.pool, id, count)
            .await
            .map_err(backend)
    }

    async fn reset_day_draw_counts(&self) -> Result<u64, StoreError> {
        WorkerRepo::reset_day_draw_counts(&self.pool)
            .await
            .map_err(backend)
    }
}
