use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taskpilot_server::config::Config;
use taskpilot_server::http::router;
use taskpilot_server::reconciliation::reconcile_external_status;
use taskpilot_server::scheduler::{pipeline_loop, Scheduler};
use taskpilot_server::workflow::SqliteRepository;
use taskpilot_server::{build_service, get_service_version, recording_logger, AppState};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting taskpilot {}", get_service_version());

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration: {:?}", config);

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let repository =
        SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?;

    let recording = recording_logger(&config);
    let service = Arc::new(build_service(
        &config,
        Arc::new(repository),
        recording.as_ref(),
    )?);

    // Push anything a previous instance committed but never mirrored before
    // taking new work.
    match reconcile_external_status(&service, config.drift_check).await {
        Ok(report) => info!(
            "Startup reconciliation: {} pushed, {} failed",
            report.pushed, report.failed
        ),
        Err(e) => error!("Startup reconciliation failed: {}", e),
    }

    let scheduler = Arc::new(Scheduler::new(service.clone(), config.drift_check));
    let app = router(Arc::new(AppState {
        scheduler: scheduler.clone(),
        status_auth_token: config.status_auth_token.clone(),
    }));

    let poll_interval = config.poll_interval;
    let pipeline = tokio::spawn(pipeline_loop(scheduler, poll_interval));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.abort();
    service.notifications().flush().await;
    info!("Stopped");

    Ok(())
}
