//! Handlers for the `/tasks` resource.
//!
//! Submission handlers validate the body, build a [`SubmitRequest`] and
//! hand it to the dispatcher. A rejected submission still leaves a failed
//! job behind; its id is returned in the error body.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use drawproxy_core::filter::SelectionFilter;
use drawproxy_core::job::{JobAction, JobStatus};
use drawproxy_core::store::JobQuery;
use drawproxy_core::worker::{BotType, GenerationMode};
use drawproxy_dispatch::command::SubmitRequest;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct ImagineInput {
    #[validate(length(min = 1, max = 8192))]
    pub prompt: String,
    pub bot_type: Option<BotType>,
    pub mode: Option<GenerationMode>,
    #[validate(length(max = 1024))]
    pub state: Option<String>,
    #[validate(url)]
    pub notify_hook: Option<String>,
    pub filter: Option<SelectionFilter>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeInput {
    #[validate(length(min = 1))]
    pub task_id: String,
    pub action: JobAction,
    pub index: Option<u8>,
    pub custom_id: Option<String>,
    #[validate(length(max = 1024))]
    pub state: Option<String>,
    #[validate(url)]
    pub notify_hook: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DescribeInput {
    #[validate(url)]
    pub link: String,
    pub bot_type: Option<BotType>,
    #[validate(length(max = 1024))]
    pub state: Option<String>,
    #[validate(url)]
    pub notify_hook: Option<String>,
    pub filter: Option<SelectionFilter>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BlendInput {
    #[validate(length(min = 2, max = 5))]
    pub links: Vec<String>,
    pub bot_type: Option<BotType>,
    #[validate(length(max = 1024))]
    pub state: Option<String>,
    #[validate(url)]
    pub notify_hook: Option<String>,
    pub filter: Option<SelectionFilter>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShortenInput {
    #[validate(length(min = 1, max = 8192))]
    pub prompt: String,
    pub bot_type: Option<BotType>,
    #[validate(length(max = 1024))]
    pub state: Option<String>,
    #[validate(url)]
    pub notify_hook: Option<String>,
    pub filter: Option<SelectionFilter>,
}

/// Query parameters for `GET /tasks`.
#[derive(Debug, Deserialize)]
pub struct TaskListParams {
    pub status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub parent_id: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// First hop of `x-forwarded-for`, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next());
    forwarded
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

async fn submit(state: &AppState, req: SubmitRequest) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.submit(req).await?;
    tracing::info!(
        job_id = %job.id,
        action = %job.action,
        worker_id = job.worker_id.as_deref().unwrap_or_default(),
        "Task submitted",
    );
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/imagine
pub async fn imagine(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ImagineInput>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let mut req = SubmitRequest::imagine(input.prompt)?;
    req.bot_type = input.bot_type;
    req.mode = input.mode;
    req.state = input.state;
    req.notify_hook = input.notify_hook;
    req.filter = input.filter;
    req.client_ip = client_ip(&headers);
    submit(&state, req).await
}

/// POST /api/v1/tasks/change
///
/// Follow-up action (upscale, variation, reroll, button) on a finished
/// job. Runs on the worker that produced the parent.
pub async fn change(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ChangeInput>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let mut req = SubmitRequest::change(input.task_id, input.action, input.index, input.custom_id)?;
    req.state = input.state;
    req.notify_hook = input.notify_hook;
    req.client_ip = client_ip(&headers);
    submit(&state, req).await
}

/// POST /api/v1/tasks/describe
pub async fn describe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<DescribeInput>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let mut req = SubmitRequest::describe(input.link)?;
    req.bot_type = input.bot_type;
    req.state = input.state;
    req.notify_hook = input.notify_hook;
    req.filter = input.filter;
    req.client_ip = client_ip(&headers);
    submit(&state, req).await
}

/// POST /api/v1/tasks/blend
pub async fn blend(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<BlendInput>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let mut req = SubmitRequest::blend(input.links)?;
    req.bot_type = input.bot_type;
    req.state = input.state;
    req.notify_hook = input.notify_hook;
    req.filter = input.filter;
    req.client_ip = client_ip(&headers);
    submit(&state, req).await
}

/// POST /api/v1/tasks/shorten
pub async fn shorten(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<ShortenInput>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    let mut req = SubmitRequest::shorten(input.prompt)?;
    req.bot_type = input.bot_type;
    req.state = input.state;
    req.notify_hook = input.notify_hook;
    req.filter = input.filter;
    req.client_ip = client_ip(&headers);
    submit(&state, req).await
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks
///
/// Newest first. Supports `status`, `worker_id`, `parent_id` and `limit`.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListParams>,
) -> AppResult<impl IntoResponse> {
    let query = JobQuery {
        status: params.status,
        worker_id: params.worker_id,
        parent_id: params.parent_id,
        limit: params.limit,
    };
    let jobs = state.dispatcher.list(&query).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.get(&task_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// POST /api/v1/tasks/{id}/cancel
///
/// Returns the cancelled job, or 409 if it already finished.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.dispatcher.cancel(&task_id).await?;
    tracing::info!(job_id = %job.id, "Task cancelled");
    Ok(Json(DataResponse { data: job }))
}
