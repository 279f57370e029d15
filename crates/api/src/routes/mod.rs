pub mod health;
pub mod stats;
pub mod tasks;
pub mod workers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /tasks/imagine                 submit (POST)
/// /tasks/change                  follow-up action on a finished job (POST)
/// /tasks/describe                submit (POST)
/// /tasks/blend                   submit (POST)
/// /tasks/shorten                 submit (POST)
/// /tasks                         list
/// /tasks/{id}                    get
/// /tasks/{id}/cancel             cancel (POST)
///
/// /workers                       list, add/replace (POST)
/// /workers/{id}                  remove (DELETE)
/// /workers/{id}/enable           (POST)
/// /workers/{id}/disable          (POST)
/// /workers/select-mode           get, swap (PUT)
///
/// /stats/overview                today's jobs by status
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/tasks", tasks::router())
        .nest("/workers", workers::router())
        .nest("/stats", stats::router())
}
