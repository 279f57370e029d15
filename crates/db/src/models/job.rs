//! Row mapping for the `jobs` table.

use sqlx::types::Json;
use sqlx::FromRow;

use drawproxy_core::filter::SelectionFilter;
use drawproxy_core::job::Job;
use drawproxy_core::store::StoreError;
use drawproxy_core::types::Timestamp;

/// A row from the `jobs` table. Enums are stored as their text literals.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub user_id: Option<String>,
    pub action: String,
    pub status: String,
    pub bot_type: String,
    pub mode: Option<String>,
    pub prompt: String,
    pub description: String,
    pub state: Option<String>,
    pub notify_hook: Option<String>,
    pub client_ip: Option<String>,
    pub worker_id: Option<String>,
    pub filter: Option<Json<SelectionFilter>>,
    pub nonce: String,
    pub message_id: Option<String>,
    pub submit_time: Timestamp,
    pub start_time: Option<Timestamp>,
    pub finish_time: Option<Timestamp>,
    pub progress: Option<String>,
    pub fail_reason: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub properties: Json<serde_json::Map<String, serde_json::Value>>,
    pub updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |e: drawproxy_core::error::CoreError| {
            StoreError::Corrupt(format!("job {}: {e}", row.id))
        };
        let action = row.action.parse().map_err(corrupt)?;
        let status = row.status.parse().map_err(corrupt)?;
        let bot_type = row.bot_type.parse().map_err(corrupt)?;
        let mode = row
            .mode
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(corrupt)?;

        Ok(Job {
            id: row.id,
            parent_id: row.parent_id,
            user_id: row.user_id,
            action,
            status,
            bot_type,
            mode,
            prompt: row.prompt,
            description: row.description,
            state: row.state,
            notify_hook: row.notify_hook,
            client_ip: row.client_ip,
            worker_id: row.worker_id,
            filter: row.filter.map(|Json(f)| f),
            nonce: row.nonce,
            message_id: row.message_id,
            submit_time: row.submit_time,
            start_time: row.start_time,
            finish_time: row.finish_time,
            progress: row.progress,
            fail_reason: row.fail_reason,
            image_url: row.image_url,
            thumbnail_url: row.thumbnail_url,
            properties: row.properties.0,
            updated_at: row.updated_at,
        })
    }
}
