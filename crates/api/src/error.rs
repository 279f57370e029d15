use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use drawproxy_core::error::CoreError;
use drawproxy_core::store::StoreError;
use drawproxy_dispatch::DispatchError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain and dispatch errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the form `{"error", "code", "retryable"}`, plus `job_id` when the
/// rejected submission left a failed job behind.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

/// Status, machine-readable code, client message, and whether retrying
/// the same request later may succeed.
type Classified = (StatusCode, &'static str, String, bool);

fn internal() -> Classified {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
        false,
    )
}

fn classify_core(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
            false,
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), false),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone(), false),
        CoreError::InvalidTransition { .. } => {
            tracing::error!(error = %err, "Invalid job transition requested");
            (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string(), false)
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

fn classify_dispatch(err: &DispatchError) -> Classified {
    match err {
        DispatchError::NoEligibleWorker { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_ELIGIBLE_WORKER",
            err.to_string(),
            false,
        ),
        DispatchError::CapacityExhausted { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            "CAPACITY_EXHAUSTED",
            err.to_string(),
            true,
        ),
        DispatchError::ParentNotReady { .. } => {
            (StatusCode::CONFLICT, "PARENT_NOT_READY", err.to_string(), false)
        }
        DispatchError::WorkerNotFound { worker_id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("worker with id {worker_id} not found"),
            false,
        ),
        DispatchError::Session { .. } => {
            tracing::warn!(error = %err, "Gateway transport error");
            (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR", err.to_string(), true)
        }
        DispatchError::Stopped => (
            StatusCode::SERVICE_UNAVAILABLE,
            "STOPPED",
            err.to_string(),
            false,
        ),
        DispatchError::Core(core) => classify_core(core),
        DispatchError::Store(store) => {
            tracing::error!(error = %store, "Store error");
            internal()
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, retryable) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Dispatch(dispatch) => classify_dispatch(dispatch),
            AppError::Store(store) => {
                tracing::error!(error = %store, "Store error");
                internal()
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), false),
        };

        let mut body = json!({
            "error": message,
            "code": code,
            "retryable": retryable,
        });
        if let AppError::Dispatch(dispatch) = &self {
            if let Some(job_id) = dispatch.job_id() {
                body["job_id"] = json!(job_id);
            }
        }

        (status, axum::Json(body)).into_response()
    }
}
