//! Seam between the pool and the per-worker gateway connection.
//!
//! The pool only needs a session's status, a way to send it a frame, and
//! a bounded close. [`GatewayConnector`] provides real gateway sessions.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use drawproxy_core::worker::Worker;
use drawproxy_gateway::{GatewayEventHandler, Session, SessionConfig, SessionError, SessionStatus};

/// A live connection owned by the pool on behalf of one worker.
#[async_trait]
pub trait WorkerSession: Send + Sync {
    fn status(&self) -> SessionStatus;

    async fn submit(&self, payload: serde_json::Value) -> Result<(), SessionError>;

    /// Tear the connection down; bounded by the session's close timeout.
    async fn close(&self) -> Result<(), SessionError>;
}

#[async_trait]
impl WorkerSession for Session {
    fn status(&self) -> SessionStatus {
        Session::status(self)
    }

    async fn submit(&self, payload: serde_json::Value) -> Result<(), SessionError> {
        Session::submit(self, payload).await
    }

    async fn close(&self) -> Result<(), SessionError> {
        Session::close(self).await
    }
}

/// Opens a session for a worker. Must return without waiting for the
/// connection to establish.
pub trait SessionConnector: Send + Sync {
    fn connect(&self, worker: &Worker, parent: &CancellationToken) -> Arc<dyn WorkerSession>;
}

/// Connector producing real gateway sessions that report to `handler`.
pub struct GatewayConnector {
    config: SessionConfig,
    handler: Arc<dyn GatewayEventHandler>,
}

impl GatewayConnector {
    pub fn new(config: SessionConfig, handler: Arc<dyn GatewayEventHandler>) -> Self {
        Self { config, handler }
    }
}

impl SessionConnector for GatewayConnector {
    fn connect(&self, worker: &Worker, parent: &CancellationToken) -> Arc<dyn WorkerSession> {
        Arc::new(Session::spawn(
            worker.id.clone(),
            worker.credential.clone(),
            self.config.clone(),
            Arc::clone(&self.handler),
            parent,
        ))
    }
}
