//! Narrow seams between the coordinator and its collaborators, so the
//! execute loop can be exercised against in-memory fakes instead of a live
//! Postgres-backed store and broker.

use async_trait::async_trait;
use conclave_broker::EventEnvelope;
use conclave_shared::domain::{DagTemplate, ProgressEvent, StageMessage, Task};
use conclave_shared::errors::ConclaveResult;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A boxed task transform, the trait-object-safe counterpart to
/// `TaskStore::mutate`'s generic `FnOnce` parameter.
pub type MutateFn = Box<dyn FnOnce(&mut Task) -> ConclaveResult<()> + Send>;

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn create(&self, task: &Task) -> ConclaveResult<()>;
    async fn get(&self, task_id: Uuid) -> ConclaveResult<Option<Task>>;
    async fn mutate(&self, task_id: Uuid, transform: MutateFn) -> ConclaveResult<Task>;
    async fn archive(&self, task_id: Uuid) -> ConclaveResult<()>;
}

#[async_trait]
pub trait ProgressBackend: Send + Sync {
    async fn append(&self, event: &ProgressEvent) -> ConclaveResult<()>;
    async fn for_task(&self, task_id: Uuid) -> ConclaveResult<Vec<ProgressEvent>>;
}

#[async_trait]
pub trait BrokerBackend: Send + Sync {
    async fn ensure_queue(&self, stage: &str) -> ConclaveResult<()>;
    async fn publish_stage(&self, stage: &str, message: &StageMessage) -> ConclaveResult<i64>;
    fn subscribe_event(&self, topic: &str) -> broadcast::Receiver<EventEnvelope>;
}

pub trait TemplateBackend: Send + Sync {
    fn get(&self, name: &str) -> Option<DagTemplate>;
    fn choose(&self, needs_web: bool, complexity: u8) -> DagTemplate;
}

#[async_trait]
impl StoreBackend for conclave_store::TaskStore {
    async fn create(&self, task: &Task) -> ConclaveResult<()> {
        self.create(task).await
    }

    async fn get(&self, task_id: Uuid) -> ConclaveResult<Option<Task>> {
        self.get(task_id).await
    }

    async fn mutate(&self, task_id: Uuid, transform: MutateFn) -> ConclaveResult<Task> {
        self.mutate(task_id, move |t| transform(t)).await
    }

    async fn archive(&self, task_id: Uuid) -> ConclaveResult<()> {
        self.archive(task_id).await
    }
}

#[async_trait]
impl ProgressBackend for conclave_store::ProgressLog {
    async fn append(&self, event: &ProgressEvent) -> ConclaveResult<()> {
        self.append(event).await
    }

    async fn for_task(&self, task_id: Uuid) -> ConclaveResult<Vec<ProgressEvent>> {
        self.for_task(task_id).await
    }
}

#[async_trait]
impl BrokerBackend for conclave_broker::BrokerProvider {
    async fn ensure_queue(&self, stage: &str) -> ConclaveResult<()> {
        self.ensure_queue(stage).await
    }

    async fn publish_stage(&self, stage: &str, message: &StageMessage) -> ConclaveResult<i64> {
        self.publish_stage(stage, message).await
    }

    fn subscribe_event(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        self.subscribe_event(topic)
    }
}

impl TemplateBackend for conclave_templates::TemplateRegistry {
    fn get(&self, name: &str) -> Option<DagTemplate> {
        self.get(name)
    }

    fn choose(&self, needs_web: bool, complexity: u8) -> DagTemplate {
        self.choose(needs_web, complexity)
    }
}
