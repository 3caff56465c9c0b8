//! Coordinator + HTTP API process: the production deployment target for
//! task orchestration (§4.D, §4.G).
//!
//! ```bash
//! CONCLAVE_ENV=production cargo run --bin conclave-orchestrator
//! ```

use std::sync::Arc;
use std::time::Duration;

use conclave_api::AppState;
use conclave_broker::{BrokerProvider, EventTopic, StageQueue};
use conclave_coordinator::Coordinator;
use conclave_shared::errors::ConclaveError;
use conclave_shared::ConclaveConfig;
use conclave_store::{ProgressLog, TaskStore};
use conclave_templates::TemplateRegistry;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConclaveConfig::load()?;
    conclave_shared::logging::init(!cfg!(debug_assertions));

    info!(version = env!("CARGO_PKG_VERSION"), "starting conclave-orchestrator");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| ConclaveError::StoreUnavailable(e.to_string()))?;

    sqlx::migrate!("../../migrations").run(&pool).await?;

    let store = Arc::new(TaskStore::new(pool.clone(), config.coordinator.task_ttl_seconds));
    let progress = Arc::new(ProgressLog::new(pool.clone()));
    let templates = Arc::new(TemplateRegistry::hydrate(pool.clone(), config.coordinator.default_template.clone()).await?);

    let stage_queue = StageQueue::connect(&config.database.url).await?;
    let event_topic = EventTopic::new(pool.clone());
    let broker = Arc::new(BrokerProvider::postgres(stage_queue, event_topic));

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        progress,
        broker,
        templates.clone(),
        Duration::from_secs(config.coordinator.stage_timeout_seconds),
        config.coordinator.max_stage_retries,
    ));

    store.clone().spawn_retention_sweeper(Duration::from_secs(30));
    spawn_reload_on_sighup(templates.clone());

    let state = Arc::new(AppState {
        coordinator,
        store,
        templates,
    });
    let app = conclave_api::router(state, Duration::from_secs(30));

    let addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP API listening");

    let shutdown_timeout = Duration::from_millis(config.coordinator.shutdown_timeout_ms);
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(Ok(())) => info!("server shut down cleanly"),
        Ok(Err(err)) => tracing::error!(%err, "server exited with an error"),
        Err(_) => tracing::error!(timeout_ms = config.coordinator.shutdown_timeout_ms, "graceful shutdown timed out"),
    }

    Ok(())
}

/// Reload the template registry on `SIGHUP` without restarting the process
/// (§4.C, teacher's `bin/server.rs` signal handling convention).
fn spawn_reload_on_sighup(templates: Arc<TemplateRegistry>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        let Ok(mut hangup) = signal::unix::signal(signal::unix::SignalKind::hangup()) else {
            tracing::warn!("failed to install SIGHUP handler; template hot-reload disabled");
            return;
        };
        loop {
            hangup.recv().await;
            info!("SIGHUP received, reloading DAG templates");
            if let Err(err) = templates.reload().await {
                tracing::error!(%err, "template reload failed");
            }
        }
    });
    #[cfg(not(unix))]
    let _ = templates;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

