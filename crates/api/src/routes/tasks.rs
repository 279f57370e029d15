use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks))
        .route("/imagine", post(tasks::imagine))
        .route("/change", post(tasks::change))
        .route("/describe", post(tasks::describe))
        .route("/blend", post(tasks::blend))
        .route("/shorten", post(tasks::shorten))
        .route("/{id}", get(tasks::get_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
}
