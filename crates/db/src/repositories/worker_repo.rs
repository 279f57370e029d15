//! Repository for the `workers` table.

use sqlx::PgPool;

use drawproxy_core::worker::Worker;

use crate::models::worker::WorkerRow;

/// Column list for `workers` queries.
const COLUMNS: &str = "\
    id, credential, guild_id, channel_id, enabled, locked, disabled_reason, \
    core_size, queue_size, max_queue_size, interval_secs, timeout_minutes, \
    weight, sort, day_draw_limit, day_draw_count, allow_modes, \
    enable_mj, enable_niji, remix_enabled, is_blend, is_describe, is_shorten, \
    remark, created_at, updated_at";

/// Unsigned worker limits already narrowed to their column type.
pub struct WorkerLimits {
    pub core_size: i32,
    pub queue_size: i32,
    pub max_queue_size: i32,
    pub timeout_minutes: i32,
}

/// Provides CRUD operations for worker accounts.
pub struct WorkerRepo;

impl WorkerRepo {
    /// All workers ordered by `sort`, then id.
    pub async fn list(pool: &PgPool) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers ORDER BY sort ASC, id ASC");
        sqlx::query_as::<_, WorkerRow>(&query).fetch_all(pool).await
    }

    /// Enabled workers ordered by `sort`, then id.
    pub async fn list_enabled(pool: &PgPool) -> Result<Vec<WorkerRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workers WHERE enabled = TRUE ORDER BY sort ASC, id ASC"
        );
        sqlx::query_as::<_, WorkerRow>(&query).fetch_all(pool).await
    }

    pub async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<WorkerRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workers WHERE id = $1");
        sqlx::query_as::<_, WorkerRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Insert or fully replace a worker. `created_at` survives replacement.
    pub async fn upsert(
        pool: &PgPool,
        worker: &Worker,
        limits: &WorkerLimits,
    ) -> Result<(), sqlx::Error> {
        let modes: Vec<&str> = worker.allow_modes.iter().map(|m| m.as_str()).collect();
        let query = format!(
            "INSERT INTO workers ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
                     $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26) \
             ON CONFLICT (id) DO UPDATE SET \
                 credential = EXCLUDED.credential, guild_id = EXCLUDED.guild_id, \
                 channel_id = EXCLUDED.channel_id, enabled = EXCLUDED.enabled, \
                 locked = EXCLUDED.locked, disabled_reason = EXCLUDED.disabled_reason, \
                 core_size = EXCLUDED.core_size, queue_size = EXCLUDED.queue_size, \
                 max_queue_size = EXCLUDED.max_queue_size, \
                 interval_secs = EXCLUDED.interval_secs, \
                 timeout_minutes = EXCLUDED.timeout_minutes, \
                 weight = EXCLUDED.weight, sort = EXCLUDED.sort, \
                 day_draw_limit = EXCLUDED.day_draw_limit, \
                 day_draw_count = EXCLUDED.day_draw_count, \
                 allow_modes = EXCLUDED.allow_modes, enable_mj = EXCLUDED.enable_mj, \
                 enable_niji = EXCLUDED.enable_niji, remix_enabled = EXCLUDED.remix_enabled, \
                 is_blend = EXCLUDED.is_blend, is_describe = EXCLUDED.is_describe, \
                 is_shorten = EXCLUDED.is_shorten, remark = EXCLUDED.remark, \
                 updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&query)
            .bind(&worker.id)
            .bind(&worker.credential)
            .bind(&worker.guild_id)
            .bind(&worker.channel_id)
            .bind(worker.enabled)
            .bind(worker.lock)
            .bind(&worker.disabled_reason)
            .bind(limits.core_size)
            .bind(limits.queue_size)
            .bind(limits.max_queue_size)
            .bind(worker.interval_secs)
            .bind(limits.timeout_minutes)
            .bind(worker.weight)
            .bind(worker.sort)
            .bind(worker.day_draw_limit)
            .bind(worker.day_draw_count)
            .bind(modes)
            .bind(worker.enable_mj)
            .bind(worker.enable_niji)
            .bind(worker.remix_enabled)
            .bind(worker.is_blend)
            .bind(worker.is_describe)
            .bind(worker.is_shorten)
            .bind(&worker.remark)
            .bind(worker.created_at)
            .bind(worker.updated_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Delete a worker. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_day_draw_count(
        pool: &PgPool,
        id: &str,
        count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE workers SET day_draw_count = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Zero every non-zero daily counter. Returns the number of rows touched.
    pub async fn reset_day_draw_counts(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workers SET day_draw_count = 0, updated_at = NOW() WHERE day_draw_count <> 0",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
