use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conclave_broker::BrokerProvider;
use conclave_shared::domain::{health_topic, lifecycle_topic, StageOutcome, StageOutcomeEvent};
use conclave_store::TaskStore;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::heartbeat::HeartbeatPayload;
use crate::stages::{StageBody, StageInput};

/// Runs one stage's worker pool (§4.E): polls its queue with bounded
/// prefetch, enforces a per-message deadline, merges the stage body's
/// result into the task record, reports the outcome, and acks/nacks the
/// broker message. One `AgentRuntime` per `(stage, agent_kind)` pair; the
/// worker binary spawns one per configured stage.
pub struct AgentRuntime {
    stage: String,
    agent_kind: String,
    instance_id: Uuid,
    store: Arc<TaskStore>,
    broker: Arc<BrokerProvider>,
    body: Arc<dyn StageBody>,
    prefetch: i32,
    message_deadline: Duration,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    processed_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stage: impl Into<String>,
        agent_kind: impl Into<String>,
        store: Arc<TaskStore>,
        broker: Arc<BrokerProvider>,
        body: Arc<dyn StageBody>,
        prefetch: i32,
        message_deadline: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            agent_kind: agent_kind.into(),
            instance_id: Uuid::now_v7(),
            store,
            broker,
            body,
            prefetch,
            message_deadline,
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(30),
            processed_count: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Drives the stage queue forever; never returns under normal
    /// operation. The worker binary spawns this per configured stage
    /// alongside its own heartbeat loop.
    pub async fn run(self: Arc<Self>) {
        let heartbeat = self.clone();
        tokio::spawn(async move { heartbeat.heartbeat_loop().await });

        loop {
            match self.broker.consume_stage(&self.stage, self.prefetch).await {
                Ok(envelopes) if envelopes.is_empty() => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                Ok(envelopes) => {
                    for envelope in envelopes {
                        self.process(envelope).await;
                    }
                }
                Err(err) => {
                    tracing::error!(stage = %self.stage, %err, "failed to consume stage queue");
                    *self.last_error.lock().await = Some(err.to_string());
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn process(&self, envelope: conclave_broker::StageEnvelope) {
        let task_id = envelope.message.task_id;
        let input = StageInput {
            query: envelope.message.query.clone(),
            context: envelope.message.context_snapshot.clone(),
            retrieval_hits: envelope.message.retrieval_hits_snapshot.clone(),
            stage_args: envelope.message.stage_args.clone(),
        };

        let started = std::time::Instant::now();
        let outcome = tokio::time::timeout(self.message_deadline, self.body.run(input)).await;
        let duration_ms = started.elapsed().as_millis() as i64;
        let recorded_outcome = match &outcome {
            Ok(Ok(_)) => "complete",
            Ok(Err(_)) => "failed",
            Err(_) => "timed_out",
        };
        if let Err(err) = self
            .store
            .record_agent_performance(&self.agent_kind, &self.stage, task_id, recorded_outcome, duration_ms)
            .await
        {
            tracing::warn!(%task_id, stage = %self.stage, %err, "failed to record agent performance sample");
        }

        match outcome {
            Ok(Ok(output)) => {
                let stage = self.stage.clone();
                let merge_result = self
                    .store
                    .mutate(task_id, move |t| {
                        t.merge_context(output.context_delta);
                        t.append_retrieval_hits(output.retrieval_hits_delta);
                        t.advance_stage(&stage)?;
                        if let Some(remaining) = output.reselect_plan {
                            t.reselect_plan(remaining)?;
                        }
                        Ok(())
                    })
                    .await;

                match merge_result {
                    Ok(_) => {
                        self.processed_count.fetch_add(1, Ordering::Relaxed);
                        self.publish_outcome(task_id, StageOutcome::Complete, "ok").await;
                    }
                    Err(err) => {
                        tracing::error!(%task_id, stage = %self.stage, %err, "failed to merge stage result");
                        *self.last_error.lock().await = Some(err.to_string());
                        self.publish_outcome(task_id, StageOutcome::Failed, &err.to_string()).await;
                    }
                }
                self.ack(envelope.msg_id).await;
            }
            Ok(Err(err)) => {
                tracing::warn!(%task_id, stage = %self.stage, %err, "stage body reported failure");
                *self.last_error.lock().await = Some(err.to_string());
                self.publish_outcome(task_id, StageOutcome::Failed, &err.to_string()).await;
                self.ack(envelope.msg_id).await;
            }
            Err(_elapsed) => {
                tracing::warn!(%task_id, stage = %self.stage, "stage body exceeded its per-message deadline");
                *self.last_error.lock().await = Some("per-message deadline exceeded".to_string());
                self.publish_outcome(task_id, StageOutcome::Failed, "stage exceeded its per-message deadline")
                    .await;
                self.broker.nack_stage(&self.stage, envelope.msg_id);
            }
        }
    }

    async fn ack(&self, msg_id: i64) {
        if let Err(err) = self.broker.ack_stage(&self.stage, msg_id).await {
            tracing::warn!(stage = %self.stage, msg_id, %err, "failed to ack stage message");
        }
    }

    async fn publish_outcome(&self, task_id: Uuid, outcome: StageOutcome, message: &str) {
        let event = StageOutcomeEvent {
            stage: self.stage.clone(),
            outcome,
            message: message.to_string(),
        };
        let payload = match serde_json::to_value(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(%err, "failed to serialize stage outcome event");
                return;
            }
        };
        if let Err(err) = self.broker.publish_event(&lifecycle_topic(task_id), payload).await {
            tracing::warn!(%task_id, %err, "failed to publish stage outcome event");
        }
    }

    async fn heartbeat_loop(&self) {
        let mut interval = tokio::time::interval(self.heartbeat_interval);
        loop {
            interval.tick().await;
            let payload = HeartbeatPayload {
                agent_kind: self.agent_kind.clone(),
                instance_id: self.instance_id,
                processed_count: self.processed_count.load(Ordering::Relaxed),
                last_error: self.last_error.lock().await.clone(),
                timestamp: chrono::Utc::now(),
            };
            let value = match serde_json::to_value(&payload) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(%err, "failed to serialize heartbeat payload");
                    continue;
                }
            };
            if let Err(err) = self.broker.publish_event(&health_topic(&self.agent_kind), value).await {
                tracing::warn!(agent_kind = %self.agent_kind, %err, "failed to publish heartbeat");
            }
        }
    }
}
