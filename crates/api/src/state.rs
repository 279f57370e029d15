use std::sync::Arc;

use drawproxy_dispatch::{Dispatcher, WorkerPool};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job submission, cancellation and worker administration.
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<ServerConfig>,
    /// Lifecycle events of every job.
    pub event_bus: Arc<drawproxy_events::EventBus>,
}

impl AppState {
    pub fn pool(&self) -> &Arc<WorkerPool> {
        self.dispatcher.pool()
    }
}
