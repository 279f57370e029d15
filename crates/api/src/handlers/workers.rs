//! Handlers for the `/workers` resource.
//!
//! Worker changes are hot-applied: the pool opens, restarts or closes the
//! worker's session before the handler returns.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use drawproxy_core::error::CoreError;
use drawproxy_core::worker::Worker;
use drawproxy_dispatch::SelectMode;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SelectModeInput {
    pub mode: SelectMode,
}

fn not_found(worker_id: String) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "worker",
        id: worker_id,
    })
}

/// GET /api/v1/workers
///
/// Every worker with its session state and admission counters.
pub async fn list_workers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let views = state.pool().views().await;
    Ok(Json(DataResponse { data: views }))
}

/// POST /api/v1/workers
///
/// Add a worker or replace its configuration.
pub async fn upsert_worker(
    State(state): State<AppState>,
    Json(mut worker): Json<Worker>,
) -> AppResult<impl IntoResponse> {
    let worker_id = worker.id.clone();
    // The pool keeps the live daily draw count of a known worker.
    let existing = state.pool().worker(&worker_id).await;
    if let Some(ref current) = existing {
        worker.created_at = current.created_at;
    }
    worker.updated_at = chrono::Utc::now();

    state.dispatcher.upsert_worker(worker).await?;
    tracing::info!(worker_id = %worker_id, created = existing.is_none(), "Worker saved");

    let view = state
        .pool()
        .view(&worker_id)
        .await
        .ok_or_else(|| not_found(worker_id))?;
    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(DataResponse { data: view })))
}

/// DELETE /api/v1/workers/{id}
pub async fn delete_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    if !state.dispatcher.remove_worker(&worker_id).await? {
        return Err(not_found(worker_id));
    }
    tracing::info!(worker_id = %worker_id, "Worker removed");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/workers/{id}/enable
pub async fn enable_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let worker = state.dispatcher.set_worker_enabled(&worker_id, true).await?;
    Ok(Json(DataResponse { data: worker }))
}

/// POST /api/v1/workers/{id}/disable
///
/// Closes the session and fails the jobs the worker still holds.
pub async fn disable_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let worker = state.dispatcher.set_worker_enabled(&worker_id, false).await?;
    Ok(Json(DataResponse { data: worker }))
}

/// GET /api/v1/workers/select-mode
pub async fn get_select_mode(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: state.pool().selector().stats(),
    }))
}

/// PUT /api/v1/workers/select-mode
pub async fn set_select_mode(
    State(state): State<AppState>,
    Json(input): Json<SelectModeInput>,
) -> AppResult<impl IntoResponse> {
    let selector = state.pool().selector();
    selector.set_mode(input.mode);
    Ok(Json(DataResponse {
        data: selector.stats(),
    }))
}
