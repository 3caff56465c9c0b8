use std::sync::Arc;

use conclave_shared::domain::StageMessage;
use conclave_shared::errors::ConclaveResult;

use crate::{EventTopic, StageEnvelope, StageQueue};

/// Enum-dispatch wrapper over the broker's transport. A single `Postgres`
/// variant today; new transports are added as variants rather than as
/// `dyn Trait` objects, matching the teacher's `MessagingProvider`
/// dispatch style so the hot path never pays a vtable indirection.
#[derive(Clone)]
pub enum BrokerProvider {
    Postgres {
        stage_queue: Arc<StageQueue>,
        event_topic: EventTopic,
    },
}

impl BrokerProvider {
    pub fn postgres(stage_queue: StageQueue, event_topic: EventTopic) -> Self {
        Self::Postgres {
            stage_queue: Arc::new(stage_queue),
            event_topic,
        }
    }

    pub async fn ensure_queue(&self, stage: &str) -> ConclaveResult<()> {
        match self {
            Self::Postgres { stage_queue, .. } => stage_queue.ensure_queue(stage).await,
        }
    }

    pub async fn publish_stage(&self, stage: &str, message: &StageMessage) -> ConclaveResult<i64> {
        match self {
            Self::Postgres { stage_queue, .. } => stage_queue.publish(stage, message).await,
        }
    }

    pub async fn consume_stage(&self, stage: &str, limit: i32) -> ConclaveResult<Vec<StageEnvelope>> {
        match self {
            Self::Postgres { stage_queue, .. } => stage_queue.consume(stage, limit).await,
        }
    }

    pub async fn ack_stage(&self, stage: &str, msg_id: i64) -> ConclaveResult<()> {
        match self {
            Self::Postgres { stage_queue, .. } => stage_queue.ack(stage, msg_id).await,
        }
    }

    pub fn nack_stage(&self, stage: &str, msg_id: i64) {
        match self {
            Self::Postgres { stage_queue, .. } => stage_queue.nack(stage, msg_id),
        }
    }

    pub async fn publish_event(&self, topic: &str, payload: serde_json::Value) -> ConclaveResult<()> {
        match self {
            Self::Postgres { event_topic, .. } => event_topic.publish(topic, payload).await,
        }
    }

    pub fn subscribe_event(&self, topic: &str) -> tokio::sync::broadcast::Receiver<crate::EventEnvelope> {
        match self {
            Self::Postgres { event_topic, .. } => event_topic.subscribe(topic),
        }
    }
}

impl std::fmt::Debug for BrokerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres { .. } => f.write_str("BrokerProvider::Postgres"),
        }
    }
}
