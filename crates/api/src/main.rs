use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synth_api::background::job_log::JobLog;
use synth_api::background::{notification_channels, EventServices};
use synth_api::config::ServerConfig;
use synth_api::router::build_app_router;
use synth_api::state::AppState;
use synth_api::ws;
use synth_core::clock::SystemClock;
use synth_db::{InMemoryTaskStore, PgTaskStore, TaskStore};
use synth_events::{EventBus, JobObserver};
use synth_pipeline::{BlobConfig, Engine, EngineConfig, EngineDeps};
use synth_vendor::{HttpVendorClient, VendorConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "synth_api=debug,synth_pipeline=debug,synth_vendor=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let engine_config = EngineConfig::from_env();
    let vendor_config = VendorConfig::from_env();
    let blob_config = BlobConfig::from_env().expect("Invalid blob storage configuration");

    // --- Task store ---
    let store: Arc<dyn TaskStore> = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = synth_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            tracing::info!("Database connection pool created");

            synth_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            synth_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database migrations applied");

            Arc::new(PgTaskStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, tasks are kept in memory only");
            Arc::new(InMemoryTaskStore::new())
        }
    };

    // --- Vendor + blob storage ---
    let vendor = Arc::new(
        HttpVendorClient::new(&vendor_config).expect("Failed to build vendor HTTP client"),
    );
    tracing::info!(api_url = %vendor_config.api_url, "Vendor client ready");

    let blobs = blob_config.build().await;

    // --- WebSocket manager + heartbeat ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), cancel.clone());

    // --- Event bus + event services ---
    let event_bus = Arc::new(EventBus::default());
    let job_log = Arc::new(JobLog::new());
    let events = EventServices::spawn(
        &event_bus,
        notification_channels(Arc::clone(&ws_manager), config.notify_webhook_url.as_deref()),
        vec![Arc::clone(&job_log) as Arc<dyn JobObserver>],
    );
    tracing::info!("Event services started (notification dispatcher, job log)");

    // --- Engine ---
    let engine = Arc::new(Engine::new(
        EngineDeps {
            store,
            vendor,
            blobs,
            bus: Arc::clone(&event_bus),
            clock: Arc::new(SystemClock),
        },
        engine_config,
    ));

    match engine.recover().await {
        Ok(report) => tracing::info!(
            scanned = report.scanned,
            resolved = report.resolved,
            reattached = report.reattached,
            skipped = report.skipped,
            "Startup recovery finished",
        ),
        Err(e) => tracing::error!(error = %e, "Startup recovery failed"),
    }

    let sweep_handle = engine.spawn_background(cancel.clone());

    // --- App state + router ---
    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        job_log,
    };

    let mut app = build_app_router(state, &config);
    if let BlobConfig::Local { root, .. } = &blob_config {
        tracing::info!(root = %root.display(), "Serving local artifacts at /artifacts");
        app = app.nest_service("/artifacts", ServeDir::new(root));
    }

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
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    // Stop pollers first; tasks they leave behind are picked up by the next
    // startup recovery.
    engine.shutdown();
    cancel.cancel();
    let _ = tokio::time::timeout(drain, sweep_handle).await;
    tracing::info!(active = engine.scheduler().active_count(), "Pollers stopped");

    // Dropping the last bus handle closes both event feeds, which ends
    // both event loops.
    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(drain, events.dispatcher).await;
    let _ = tokio::time::timeout(drain, events.observers).await;
    tracing::info!("Event services shut down");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    let _ = tokio::time::timeout(drain, heartbeat_handle).await;
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
