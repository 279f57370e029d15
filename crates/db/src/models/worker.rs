//! Row mapping for the `workers` table.

use sqlx::FromRow;

use drawproxy_core::store::StoreError;
use drawproxy_core::types::Timestamp;
use drawproxy_core::worker::{GenerationMode, Worker};

/// A row from the `workers` table.
///
/// Unsigned limits are stored as `INTEGER` and checked on the way out.
#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: String,
    pub credential: String,
    pub guild_id: String,
    pub channel_id: String,
    pub enabled: bool,
    pub locked: bool,
    pub disabled_reason: Option<String>,
    pub core_size: i32,
    pub queue_size: i32,
    pub max_queue_size: i32,
    pub interval_secs: f64,
    pub timeout_minutes: i32,
    pub weight: i32,
    pub sort: i32,
    pub day_draw_limit: i32,
    pub day_draw_count: i32,
    pub allow_modes: Vec<String>,
    pub enable_mj: bool,
    pub enable_niji: bool,
    pub remix_enabled: bool,
    pub is_blend: bool,
    pub is_describe: bool,
    pub is_shorten: bool,
    pub remark: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

fn unsigned(id: &str, field: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("worker {id}: negative {field} ({value})")))
}

/// Signed column value for an unsigned limit.
pub(crate) fn signed(field: &str, value: u32) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Backend(format!("{field} out of range: {value}")))
}

impl TryFrom<WorkerRow> for Worker {
    type Error = StoreError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let allow_modes = row
            .allow_modes
            .iter()
            .map(|m| m.parse::<GenerationMode>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Corrupt(format!("worker {}: {e}", row.id)))?;

        Ok(Worker {
            core_size: unsigned(&row.id, "core_size", row.core_size)?,
            queue_size: unsigned(&row.id, "queue_size", row.queue_size)?,
            max_queue_size: unsigned(&row.id, "max_queue_size", row.max_queue_size)?,
            timeout_minutes: unsigned(&row.id, "timeout_minutes", row.timeout_minutes)?,
            id: row.id,
            credential: row.credential,
            guild_id: row.guild_id,
            channel_id: row.channel_id,
            enabled: row.enabled,
            lock: row.locked,
            disabled_reason: row.disabled_reason,
            interval_secs: row.interval_secs,
            weight: row.weight,
            sort: row.sort,
            day_draw_limit: row.day_draw_limit,
            day_draw_count: row.day_draw_count,
            allow_modes,
            enable_mj: row.enable_mj,
            enable_niji: row.enable_niji,
            remix_enabled: row.remix_enabled,
            is_blend: row.is_blend,
            is_describe: row.is_describe,
            is_shorten: row.is_shorten,
            remark: row.remark,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
