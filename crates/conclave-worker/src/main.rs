//! Specialist stage worker process: one `AgentRuntime` per stage, each
//! backed by a production `reqwest` collaborator (§4.E, §4.F).
//!
//! ```bash
//! CONCLAVE_ENV=production cargo run --bin conclave-worker
//! ```

use std::sync::Arc;
use std::time::Duration;

use conclave_agent::collaborators::http::{HttpEmbedder, HttpGenerator, HttpModerator, HttpVectorIndex, HttpWebFetcher};
use conclave_agent::stages::{IntentStage, ModerationStage, ReasoningStage, RetrievalStage, StageRegistry, WebAugmentationStage};
use conclave_agent::AgentRuntime;
use conclave_broker::{BrokerProvider, EventTopic, StageQueue};
use conclave_shared::errors::ConclaveError;
use conclave_shared::ConclaveConfig;
use conclave_store::TaskStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConclaveConfig::load()?;
    conclave_shared::logging::init(!cfg!(debug_assertions));

    info!(version = env!("CARGO_PKG_VERSION"), "starting conclave-worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| ConclaveError::StoreUnavailable(e.to_string()))?;

    let store = Arc::new(TaskStore::new(pool.clone(), config.coordinator.task_ttl_seconds));

    let stage_queue = StageQueue::connect(&config.database.url).await?;
    let event_topic = EventTopic::new(pool.clone());
    let broker = Arc::new(BrokerProvider::postgres(stage_queue, event_topic));

    let worker_config = config.worker.clone();
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(worker_config.http_timeout_seconds))
        .build()
        .map_err(|e| ConclaveError::Internal(format!("failed to build HTTP client: {e}")))?;

    let mut registry = StageRegistry::new();
    registry.register("intent", Arc::new(IntentStage::new()));
    registry.register(
        "retrieval",
        Arc::new(RetrievalStage::new(
            Arc::new(HttpEmbedder::new(http_client.clone(), worker_config.embedder_endpoint.clone())),
            Arc::new(HttpVectorIndex::new(http_client.clone(), worker_config.vector_index_endpoint.clone())),
            worker_config.retrieval_top_k,
        )),
    );
    registry.register(
        "reasoning",
        Arc::new(ReasoningStage::new(
            Arc::new(HttpGenerator::new(http_client.clone(), worker_config.generator_endpoint.clone())),
            worker_config.reasoning_max_output_chars,
        )),
    );
    registry.register(
        "moderation",
        Arc::new(ModerationStage::new(
            Arc::new(HttpModerator::new(http_client.clone(), worker_config.moderator_endpoint.clone())),
            worker_config.moderation_threshold,
        )),
    );
    registry.register(
        "web_augmentation",
        Arc::new(WebAugmentationStage::new(Arc::new(HttpWebFetcher::new(
            http_client.clone(),
            worker_config.web_fetcher_endpoint.clone(),
        )))),
    );

    let message_deadline = Duration::from_secs(worker_config.message_deadline_seconds);
    let mut handles = Vec::new();
    for stage in registry.stages().map(str::to_string).collect::<Vec<_>>() {
        let body = registry.get(&stage).expect("stage was just listed from the registry");
        let runtime = Arc::new(AgentRuntime::new(
            stage.clone(),
            format!("{stage}-agent"),
            store.clone(),
            broker.clone(),
            body,
            worker_config.consumer_prefetch,
            message_deadline,
        ));
        info!(stage = %stage, "launching agent runtime");
        handles.push(tokio::spawn(runtime.run()));
    }

    tokio::select! {
        _ = shutdown_signal() => info!("shutdown signal received, stopping worker"),
        result = futures::future::select_all(handles) => {
            let (outcome, _, _) = result;
            tracing::error!(?outcome, "an agent runtime exited unexpectedly");
        }
    }

    Ok(())
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
