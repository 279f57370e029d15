mod common;

use axum::http::StatusCode;
use drawproxy_gateway::SessionState;
use serde_json::json;

use common::{body_json, build_test_app, delete, get, post_json, put_json};

#[tokio::test]
async fn add_then_update_worker() {
    let app = build_test_app(SessionState::Ready);
    let body = json!({ "id": "w1", "credential": "token", "weight": 3 });

    let created = post_json(&app.router, "/api/v1/workers", body.clone()).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let json = body_json(created).await;
    assert_eq!(json["data"]["id"], "w1");
    assert_eq!(json["data"]["state"], "READY");
    assert!(json["data"].get("credential").is_none());

    let updated = post_json(&app.router, "/api/v1/workers", body).await;
    assert_eq!(updated.status(), StatusCode::OK);

    let list = body_json(get(&app.router, "/api/v1/workers").await).await;
    assert_eq!(list["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn oversized_interval_is_rejected() {
    let app = build_test_app(SessionState::Ready);
    let response = post_json(
        &app.router,
        "/api/v1/workers",
        json!({ "id": "w1", "credential": "token", "interval_secs": 1e30 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let list = body_json(get(&app.router, "/api/v1/workers").await).await;
    assert_eq!(list["data"].as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn config_update_keeps_todays_draw_count() {
    let app = build_test_app(SessionState::Ready);
    let body = json!({ "id": "w1", "credential": "token", "day_draw_limit": 5 });
    post_json(&app.router, "/api/v1/workers", body.clone()).await;
    for prompt in ["one", "two"] {
        let response =
            post_json(&app.router, "/api/v1/tasks/imagine", json!({ "prompt": prompt })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let updated = post_json(&app.router, "/api/v1/workers", body).await;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(body_json(updated).await["data"]["day_draw_count"], 2);
}

#[tokio::test]
async fn invalid_worker_is_rejected() {
    let app = build_test_app(SessionState::Ready);
    let response = post_json(
        &app.router,
        "/api/v1/workers",
        json!({ "id": "w1", "credential": "" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn disabling_a_worker_fails_its_jobs() {
    let app = build_test_app(SessionState::Ready);
    post_json(
        &app.router,
        "/api/v1/workers",
        json!({ "id": "w1", "credential": "token" }),
    )
    .await;
    let submitted = body_json(
        post_json(&app.router, "/api/v1/tasks/imagine", json!({ "prompt": "fox" })).await,
    )
    .await;
    let job_id = submitted["data"]["id"].as_str().unwrap().to_string();

    let response = post_json(&app.router, "/api/v1/workers/w1/disable", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["enabled"], false);

    let job = body_json(get(&app.router, &format!("/api/v1/tasks/{job_id}")).await).await;
    assert_eq!(job["data"]["status"], "FAILURE");
    assert_eq!(job["data"]["fail_reason"], "worker disabled");

    let missing = post_json(&app.router, "/api/v1/workers/nope/enable", json!({})).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_worker_then_delete_again() {
    let app = build_test_app(SessionState::Ready);
    post_json(
        &app.router,
        "/api/v1/workers",
        json!({ "id": "w1", "credential": "token" }),
    )
    .await;

    let first = delete(&app.router, "/api/v1/workers/w1").await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = delete(&app.router, "/api/v1/workers/w1").await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn select_mode_can_be_switched() {
    let app = build_test_app(SessionState::Ready);

    let current = body_json(get(&app.router, "/api/v1/workers/select-mode").await).await;
    assert_eq!(current["data"]["mode"], "BestWaitIdle");

    let response = put_json(
        &app.router,
        "/api/v1/workers/select-mode",
        json!({ "mode": "Polling" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["mode"], "Polling");

    let unknown = put_json(
        &app.router,
        "/api/v1/workers/select-mode",
        json!({ "mode": "Fastest" }),
    )
    .await;
    assert!(unknown.status().is_client_error());
}

#[tokio::test]
async fn stats_overview_counts_todays_jobs() {
    let app = build_test_app(SessionState::Ready);
    post_json(
        &app.router,
        "/api/v1/workers",
        json!({ "id": "w1", "credential": "token" }),
    )
    .await;
    post_json(&app.router, "/api/v1/tasks/imagine", json!({ "prompt": "fox" })).await;

    let json = body_json(get(&app.router, "/api/v1/stats/overview").await).await;
    let data = &json["data"];
    assert_eq!(data["total"], 1);
    assert_eq!(data["by_status"]["SUBMITTED"], 1);
    assert_eq!(data["active_jobs"], 1);
    assert_eq!(data["workers"], 1);
    assert_eq!(data["ready_workers"], 1);
}
