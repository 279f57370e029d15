#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use drawproxy_api::config::{LogFormat, ServerConfig};
use drawproxy_api::router::build_app_router;
use drawproxy_api::state::AppState;
use drawproxy_core::worker::Worker;
use drawproxy_db::MemoryStore;
use drawproxy_dispatch::connector::{SessionConnector, WorkerSession};
use drawproxy_dispatch::{Dispatcher, SelectMode, WorkerPool};
use drawproxy_events::EventBus;
use drawproxy_gateway::{SessionError, SessionState, SessionStatus};

/// Test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        database_url: None,
        log_format: LogFormat::Text,
    }
}

/// Session that reports a fixed state and accepts every frame.
struct StubSession {
    state: SessionState,
}

#[async_trait]
impl WorkerSession for StubSession {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            ..SessionStatus::default()
        }
    }

    async fn submit(&self, _payload: Value) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Every session it opens is immediately in `state`.
pub struct StubConnector {
    pub state: SessionState,
}

impl SessionConnector for StubConnector {
    fn connect(&self, _worker: &Worker, _parent: &CancellationToken) -> Arc<dyn WorkerSession> {
        Arc::new(StubSession { state: self.state })
    }
}

pub struct TestApp {
    pub router: Router,
    pub dispatcher: Arc<Dispatcher>,
}

/// Full application over the in-memory store, with sessions stuck in
/// `session_state`.
pub fn build_test_app(session_state: SessionState) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(WorkerPool::new(
        Arc::new(StubConnector {
            state: session_state,
        }),
        store.clone(),
        SelectMode::BestWaitIdle,
        std::time::Duration::from_secs(1),
    ));
    let event_bus = Arc::new(EventBus::default());
    let dispatcher = Arc::new(Dispatcher::new(pool, store, Arc::clone(&event_bus)));

    let config = test_config();
    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        config: Arc::new(config.clone()),
        event_bus,
    };
    TestApp {
        router: build_app_router(state, &config),
        dispatcher,
    }
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
