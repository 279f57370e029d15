use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use drawproxy_core::job::JobStatus;
use drawproxy_core::store::JobCountQuery;
use drawproxy_dispatch::pool::WorkerView;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct Overview {
    /// Start of the counting window (midnight UTC).
    pub since: DateTime<Utc>,
    pub total: i64,
    pub by_status: BTreeMap<&'static str, i64>,
    /// Jobs currently bound to a worker and not yet finished.
    pub active_jobs: usize,
    pub workers: usize,
    pub ready_workers: usize,
}

/// GET /api/v1/stats/overview
///
/// Jobs submitted today, counted by status.
pub async fn overview(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let since = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or_else(Utc::now);

    let mut by_status = BTreeMap::new();
    for &status in JobStatus::ALL {
        let query = JobCountQuery {
            status: Some(status),
            since: Some(since),
            ..Default::default()
        };
        by_status.insert(status.as_str(), state.dispatcher.count(&query).await?);
    }

    let views: Vec<WorkerView> = state.pool().views().await;
    let overview = Overview {
        since,
        total: by_status.values().sum(),
        by_status,
        active_jobs: state.dispatcher.active_count(),
        workers: views.len(),
        ready_workers: views.iter().filter(|v| v.is_ready()).count(),
    };
    Ok(Json(DataResponse { data: overview }))
}
