//! Mandate desk HTTP server
//!
//! Configuration comes from the environment (see `AppConfig::from_env`).

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use mandate_desk::{
    api::{create_router, AppState},
    clock::SystemClock,
    config::AppConfig,
    controller::MandateSessionController,
    database::DatabaseManager,
    telemetry::init_tracing,
    watchdog::InactivityWatchdog,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    init_tracing();

    let db = DatabaseManager::new(config.database.clone()).await?;
    db.test_connection().await?;

    let store = db.session_store();
    store.initialize_schema().await?;

    let controller = Arc::new(MandateSessionController::new(
        Arc::new(store),
        Arc::new(SystemClock),
    ));
    let watchdog = Arc::new(InactivityWatchdog::new(
        controller.clone(),
        config.watchdog.idle_timeout,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog_task = tokio::spawn(
        watchdog
            .clone()
            .run(config.watchdog.sweep_interval, shutdown_rx),
    );

    let app = create_router(AppState::new(controller, watchdog));

    info!("Starting server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = watchdog_task.await {
        error!("Watchdog task failed: {}", e);
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
