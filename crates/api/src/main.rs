use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drawproxy_api::config::{LogFormat, ServerConfig};
use drawproxy_api::router::build_app_router;
use drawproxy_api::state::AppState;
use drawproxy_core::store::{JobStore, WorkerStore};
use drawproxy_db::{MemoryStore, PgStore};
use drawproxy_dispatch::background::{quota_reset, timeout_sweep};
use drawproxy_dispatch::connector::GatewayConnector;
use drawproxy_dispatch::tracker::{self, JobTracker};
use drawproxy_dispatch::{DispatchConfig, Dispatcher, WorkerPool};
use drawproxy_events::{EventBus, NotifyRouter, WebhookDelivery};

const DEFAULT_LOG_FILTER: &str =
    "drawproxy_api=debug,drawproxy_dispatch=debug,drawproxy_gateway=info,tower_http=debug";

/// How long background tasks get to wind down after cancellation.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let dispatch_config = DispatchConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        host = %config.host,
        port = config.port,
        select_mode = %dispatch_config.select_mode,
        "Loaded configuration"
    );

    // --- Persistence ---
    let (job_store, worker_store): (Arc<dyn JobStore>, Arc<dyn WorkerStore>) =
        match config.database_url.as_deref() {
            Some(database_url) => {
                let pool = drawproxy_db::create_pool(database_url)
                    .await
                    .expect("Failed to connect to database");
                drawproxy_db::health_check(&pool)
                    .await
                    .expect("Database health check failed");
                drawproxy_db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                tracing::info!("Database ready, migrations applied");
                let store = Arc::new(PgStore::new(pool));
                (store.clone() as Arc<dyn JobStore>, store as Arc<dyn WorkerStore>)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn JobStore>, store as Arc<dyn WorkerStore>)
            }
        };

    // --- Dispatch engine ---
    let (job_tracker, tracker_events) = JobTracker::channel();
    let connector = Arc::new(GatewayConnector::new(
        dispatch_config.session_config(),
        Arc::new(job_tracker),
    ));
    let pool = Arc::new(WorkerPool::new(
        connector,
        worker_store,
        dispatch_config.select_mode,
        dispatch_config.shutdown_timeout,
    ));
    let event_bus = Arc::new(EventBus::default());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        job_store,
        Arc::clone(&event_bus),
    ));

    let cancel = CancellationToken::new();
    let delivery = WebhookDelivery::new().expect("Failed to build webhook HTTP client");
    let handles = vec![
        tokio::spawn(tracker::run(
            Arc::clone(&dispatcher),
            tracker_events,
            cancel.clone(),
        )),
        tokio::spawn(Arc::clone(&dispatcher).run_launcher(cancel.clone())),
        tokio::spawn(NotifyRouter::new(delivery).run(event_bus.subscribe(), cancel.clone())),
        tokio::spawn(quota_reset::run(
            Arc::clone(&pool),
            dispatch_config.quota_reset_utc_offset_minutes,
            cancel.clone(),
        )),
        tokio::spawn(timeout_sweep::run(Arc::clone(&dispatcher), cancel.clone())),
    ];

    let started = pool.start().await.expect("Failed to load workers");
    tracing::info!(started, "Worker pool started");

    // --- Router ---
    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        config: Arc::new(config.clone()),
        event_bus: Arc::clone(&event_bus),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Sessions first; their disconnects fail whatever is still in flight.
    pool.stop().await;
    tracing::info!("Worker pool stopped");

    cancel.cancel();
    for handle in handles {
        let _ = tokio::time::timeout(TASK_DRAIN_TIMEOUT, handle).await;
    }
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
