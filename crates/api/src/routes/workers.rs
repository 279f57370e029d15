use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::workers;
use crate::state::AppState;

/// Routes mounted at `/workers`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(workers::list_workers).post(workers::upsert_worker))
        .route(
            "/select-mode",
            get(workers::get_select_mode).put(workers::set_select_mode),
        )
        .route("/{id}", delete(workers::delete_worker))
        .route("/{id}/enable", post(workers::enable_worker))
        .route("/{id}/disable", post(workers::disable_worker))
}
