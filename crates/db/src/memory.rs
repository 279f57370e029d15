//! In-memory store.
//!
//! Records live in `RwLock<HashMap>`s; every write replaces the whole
//! record under the write lock, so readers never see a partial update.
//! Nothing survives a restart.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use drawproxy_core::job::Job;
use drawproxy_core::store::{JobCountQuery, JobQuery, JobStore, StoreError, WorkerStore};
use drawproxy_core::worker::Worker;

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    workers: RwLock<HashMap<String, Worker>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_workers<'a>(workers: impl Iterator<Item = &'a Worker>) -> Vec<Worker> {
    let mut out: Vec<Worker> = workers.cloned().collect();
    out.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.id.cmp(&b.id)));
    out
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn list(&self, query: &JobQuery) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| query.status.is_none_or(|s| j.status == s))
            .filter(|j| {
                query
                    .worker_id
                    .as_deref()
                    .is_none_or(|w| j.worker_id.as_deref() == Some(w))
            })
            .filter(|j| {
                query
                    .parent_id
                    .as_deref()
                    .is_none_or(|p| j.parent_id.as_deref() == Some(p))
            })
            .cloned()
            .collect();
        out.sort_by_key(|j| Reverse((j.submit_time, j.id.clone())));
        out.truncate(usize::try_from(query.effective_limit()).unwrap_or(usize::MAX));
        Ok(out)
    }

    async fn count(&self, query: &JobCountQuery) -> Result<i64, StoreError> {
        let jobs = self.jobs.read().await;
        let n = jobs.values().filter(|j| query.matches(j)).count();
        Ok(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn list(&self) -> Result<Vec<Worker>, StoreError> {
        Ok(sorted_workers(self.workers.read().await.values()))
    }

    async fn list_enabled(&self) -> Result<Vec<Worker>, StoreError> {
        Ok(sorted_workers(
            self.workers.read().await.values().filter(|w| w.enabled),
        ))
    }

    async fn get(&self, id: &str) -> Result<Option<Worker>, StoreError> {
        Ok(self.workers.read().await.get(id).cloned())
    }

    async fn upsert(&self, worker: &Worker) -> Result<(), StoreError> {
        let mut workers = self.workers.write().await;
        let mut record = worker.clone();
        if let Some(existing) = workers.get(&worker.id) {
            record.created_at = existing.created_at;
        }
        workers.insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.workers.write().await.remove(id).is_some())
    }

    async fn update_day_draw_count(&self, id: &str, count: i32) -> Result<(), StoreError> {
        if let Some(worker) = self.workers.write().await.get_mut(id) {
            worker.day_draw_count = count;
            worker.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn reset_day_draw_counts(&self) -> Result<u64, StoreError> {
        let mut workers = self.workers.write().await;
        let mut touched = 0u64;
        for worker in workers.values_mut().filter(|w| w.day_draw_count != 0) {
            worker.day_draw_count = 0;
            worker.updated_at = chrono::Utc::now();
            touched += 1;
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use drawproxy_core::job::{JobAction, JobStatus};

    use super::*;

    fn job(prompt: &str) -> Job {
        Job::new(JobAction::Imagine, prompt, format!("/imagine {prompt}"))
    }

    #[tokio::test]
    async fn update_replaces_whole_record() {
        let store = MemoryStore::new();
        let mut j = job("a cat");
        store.insert(&j).await.unwrap();

        j.mark_submitted("w1").unwrap();
        store.update(&j).await.unwrap();

        let stored = JobStore::get(&store, &j.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Submitted);
        assert_eq!(stored.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let mut older = job("one");
        older.submit_time -= chrono::Duration::seconds(10);
        older.mark_submitted("w1").unwrap();
        let mut newer = job("two");
        newer.mark_submitted("w1").unwrap();
        let other = job("three");
        for j in [&older, &newer, &other] {
            store.insert(j).await.unwrap();
        }

        let listed = JobStore::list(
            &store,
            &JobQuery {
                worker_id: Some("w1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let ids: Vec<_> = listed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str()]);

        let limited = JobStore::list(
            &store,
            &JobQuery {
                limit: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn count_by_status() {
        let store = MemoryStore::new();
        let mut failed = job("x");
        failed.fail("boom").unwrap();
        store.insert(&failed).await.unwrap();
        store.insert(&job("y")).await.unwrap();

        let n = store
            .count(&JobCountQuery {
                status: Some(JobStatus::Failure),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn worker_crud_and_counters() {
        let store = MemoryStore::new();
        let mut a = Worker::new("a", "t");
        a.sort = 2;
        let mut b = Worker::new("b", "t");
        b.sort = 1;
        b.enabled = false;
        store.upsert(&a).await.unwrap();
        store.upsert(&b).await.unwrap();

        let all: Vec<_> = WorkerStore::list(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(all, vec!["b", "a"]);
        assert_eq!(store.list_enabled().await.unwrap().len(), 1);

        store.update_day_draw_count("a", 7).await.unwrap();
        assert_eq!(WorkerStore::get(&store, "a").await.unwrap().unwrap().day_draw_count, 7);
        assert_eq!(store.reset_day_draw_counts().await.unwrap(), 1);
        assert_eq!(WorkerStore::get(&store, "a").await.unwrap().unwrap().day_draw_count, 0);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_keeps_created_at() {
        let store = MemoryStore::new();
        let mut w = Worker::new("a", "t");
        w.created_at -= chrono::Duration::days(1);
        let created = w.created_at;
        store.upsert(&w).await.unwrap();

        let mut replacement = Worker::new("a", "t2");
        replacement.core_size = 5;
        store.upsert(&replacement).await.unwrap();

        let stored = WorkerStore::get(&store, "a").await.unwrap().unwrap();
        assert_eq!(stored.created_at, created);
        assert_eq!(stored.core_size, 5);
    }
}
