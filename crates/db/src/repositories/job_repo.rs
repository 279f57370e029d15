//! Repository for the `jobs` table.

use sqlx::types::Json;
use sqlx::PgPool;

use drawproxy_core::job::Job;
use drawproxy_core::store::{JobCountQuery, JobQuery};

use crate::models::job::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, parent_id, user_id, action, status, bot_type, mode, \
    prompt, description, state, notify_hook, client_ip, \
    worker_id, filter, nonce, message_id, \
    submit_time, start_time, finish_time, \
    progress, fail_reason, image_url, thumbnail_url, \
    properties, updated_at";

/// Provides persistence for dispatched jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a job, or overwrite every column if the id already exists.
    ///
    /// A single statement, so concurrent writers never observe a partly
    /// written record.
    pub async fn upsert(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
                     $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25) \
             ON CONFLICT (id) DO UPDATE SET \
                 parent_id = EXCLUDED.parent_id, user_id = EXCLUDED.user_id, \
                 action = EXCLUDED.action, status = EXCLUDED.status, \
                 bot_type = EXCLUDED.bot_type, mode = EXCLUDED.mode, \
                 prompt = EXCLUDED.prompt, description = EXCLUDED.description, \
                 state = EXCLUDED.state, notify_hook = EXCLUDED.notify_hook, \
                 client_ip = EXCLUDED.client_ip, worker_id = EXCLUDED.worker_id, \
                 filter = EXCLUDED.filter, nonce = EXCLUDED.nonce, \
                 message_id = EXCLUDED.message_id, submit_time = EXCLUDED.submit_time, \
                 start_time = EXCLUDED.start_time, finish_time = EXCLUDED.finish_time, \
                 progress = EXCLUDED.progress, fail_reason = EXCLUDED.fail_reason, \
                 image_url = EXCLUDED.image_url, thumbnail_url = EXCLUDED.thumbnail_url, \
                 properties = EXCLUDED.properties, updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&query)
            .bind(&job.id)
            .bind(&job.parent_id)
            .bind(&job.user_id)
            .bind(job.action.as_str())
            .bind(job.status.as_str())
            .bind(job.bot_type.as_str())
            .bind(job.mode.map(|m| m.as_str()))
            .bind(&job.prompt)
            .bind(&job.description)
            .bind(&job.state)
            .bind(&job.notify_hook)
            .bind(&job.client_ip)
            .bind(&job.worker_id)
            .bind(job.filter.as_ref().map(Json))
            .bind(&job.nonce)
            .bind(&job.message_id)
            .bind(job.submit_time)
            .bind(job.start_time)
            .bind(job.finish_time)
            .bind(&job.progress)
            .bind(&job.fail_reason)
            .bind(&job.image_url)
            .bind(&job.thumbnail_url)
            .bind(Json(&job.properties))
            .bind(job.updated_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs with optional filters, newest first.
    pub async fn list(pool: &PgPool, params: &JobQuery) -> Result<Vec<JobRow>, sqlx::Error> {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.worker_id.is_some() {
            conditions.push(format!("worker_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.parent_id.is_some() {
            conditions.push(format!("parent_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = where_clause(&conditions);
        let query = format!(
            "SELECT {COLUMNS} FROM jobs {where_clause} \
             ORDER BY submit_time DESC, id DESC \
             LIMIT ${bind_idx}"
        );

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(status) = params.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref worker_id) = params.worker_id {
            q = q.bind(worker_id);
        }
        if let Some(ref parent_id) = params.parent_id {
            q = q.bind(parent_id);
        }
        q.bind(params.effective_limit()).fetch_all(pool).await
    }

    /// Count jobs matching the filters.
    pub async fn count(pool: &PgPool, params: &JobCountQuery) -> Result<i64, sqlx::Error> {
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.worker_id.is_some() {
            conditions.push(format!("worker_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.since.is_some() {
            conditions.push(format!("submit_time >= ${bind_idx}"));
        }

        let query = format!("SELECT COUNT(*) FROM jobs {}", where_clause(&conditions));
        let mut q = sqlx::query_scalar::<_, i64>(&query);
        if let Some(status) = params.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref worker_id) = params.worker_id {
            q = q.bind(worker_id);
        }
        if let Some(since) = params.since {
            q = q.bind(since);
        }
        q.fetch_one(pool).await
    }
}

fn where_clause(conditions: &[String]) -> String {
    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}
