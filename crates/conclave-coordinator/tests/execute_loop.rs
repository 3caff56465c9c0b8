//! Exercises the coordinator's create/dispatch/advance/complete path
//! against in-memory fakes for the store, broker, and template registry —
//! no live Postgres required.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conclave_broker::EventEnvelope;
use conclave_coordinator::{BrokerBackend, Coordinator, MutateFn, ProgressBackend, StoreBackend, TemplateBackend};
use conclave_shared::domain::{
    lifecycle_topic, DagTemplate, ProgressEvent, ProgressPhase, StageMessage, StageOutcome, StageOutcomeEvent, Task,
};
use conclave_shared::errors::{ConclaveError, ConclaveResult};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct FakeStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
    archived: Mutex<Vec<Uuid>>,
}

#[async_trait]
impl StoreBackend for FakeStore {
    async fn create(&self, task: &Task) -> ConclaveResult<()> {
        self.tasks.lock().await.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> ConclaveResult<Option<Task>> {
        Ok(self.tasks.lock().await.get(&task_id).cloned())
    }

    async fn mutate(&self, task_id: Uuid, transform: MutateFn) -> ConclaveResult<Task> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(&task_id)
            .ok_or_else(|| ConclaveError::NotFound(task_id.to_string()))?;
        transform(task)?;
        task.check_invariants()?;
        Ok(task.clone())
    }

    async fn archive(&self, task_id: Uuid) -> ConclaveResult<()> {
        self.archived.lock().await.push(task_id);
        Ok(())
    }
}

struct FakeBroker {
    published: Mutex<Vec<(String, StageMessage)>>,
    topics: Mutex<HashMap<String, broadcast::Sender<EventEnvelope>>>,
}

impl FakeBroker {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            topics: Mutex::new(HashMap::new()),
        }
    }

    async fn publish_outcome(&self, task_id: Uuid, stage: &str, outcome: StageOutcome, message: &str) {
        let topic = lifecycle_topic(task_id);
        let event = StageOutcomeEvent {
            stage: stage.to_string(),
            outcome,
            message: message.to_string(),
        };
        let envelope = EventEnvelope {
            topic: topic.clone(),
            payload: serde_json::to_value(event).unwrap(),
        };
        let topics = self.topics.lock().await;
        if let Some(sender) = topics.get(&topic) {
            let _ = sender.send(envelope);
        }
    }
}

#[async_trait]
impl BrokerBackend for FakeBroker {
    async fn ensure_queue(&self, _stage: &str) -> ConclaveResult<()> {
        Ok(())
    }

    async fn publish_stage(&self, stage: &str, message: &StageMessage) -> ConclaveResult<i64> {
        self.published.lock().await.push((stage.to_string(), message.clone()));
        Ok(1)
    }

    fn subscribe_event(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        // Using try_lock here: subscribe_event is synchronous in the trait
        // (matching the real broker's non-async subscribe), and in these
        // tests it is never called while the lock is held elsewhere.
        let mut topics = self.topics.try_lock().expect("topics lock contended in test");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(32).0)
            .subscribe()
    }
}

#[derive(Default)]
struct FakeProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

#[async_trait]
impl ProgressBackend for FakeProgress {
    async fn append(&self, event: &ProgressEvent) -> ConclaveResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn for_task(&self, task_id: Uuid) -> ConclaveResult<Vec<ProgressEvent>> {
        Ok(self.events.lock().await.iter().filter(|e| e.task_id == task_id).cloned().collect())
    }
}

struct FakeTemplates {
    template: DagTemplate,
}

impl TemplateBackend for FakeTemplates {
    fn get(&self, name: &str) -> Option<DagTemplate> {
        (name == self.template.name).then(|| self.template.clone())
    }

    fn choose(&self, _needs_web: bool, _complexity: u8) -> DagTemplate {
        self.template.clone()
    }
}

fn make_coordinator(
    store: Arc<FakeStore>,
    broker: Arc<FakeBroker>,
    template: DagTemplate,
) -> Coordinator {
    make_coordinator_with_progress(store, broker, Arc::new(FakeProgress::default()), template)
}

fn make_coordinator_with_progress(
    store: Arc<FakeStore>,
    broker: Arc<FakeBroker>,
    progress: Arc<FakeProgress>,
    template: DagTemplate,
) -> Coordinator {
    Coordinator::new(
        store,
        progress,
        broker,
        Arc::new(FakeTemplates { template }),
        Duration::from_millis(200),
        1,
    )
}

/// Drives a task through its whole plan by publishing "complete" outcomes
/// on behalf of fake agents, mimicking what `Store::mutate` + a lifecycle
/// event publish would look like from a real agent runtime.
async fn run_stage_agent(store: &FakeStore, broker: &FakeBroker, task_id: Uuid, stage: &str, is_last: bool) {
    // Give the coordinator's execute loop a chance to dispatch and subscribe.
    tokio::time::sleep(Duration::from_millis(20)).await;

    store
        .mutate(
            task_id,
            Box::new({
                let stage = stage.to_string();
                move |t: &mut Task| {
                    t.advance_stage(&stage)?;
                    if is_last {
                        t.complete(conclave_shared::domain::TaskResponse {
                            content: "final answer".to_string(),
                            sources: vec!["doc-1".to_string()],
                            confidence: 0.8,
                            step_log: vec![],
                        })?;
                    }
                    Ok(())
                }
            }),
        )
        .await
        .expect("fake agent mutate should succeed");

    broker
        .publish_outcome(task_id, stage, StageOutcome::Complete, "ok")
        .await;
}

#[tokio::test]
async fn task_completes_after_every_stage_reports_success() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = make_coordinator(store.clone(), broker.clone(), template);

    let task = coordinator
        .create_task("user-1".to_string(), "what is rust".to_string(), Some("standard".to_string()))
        .await
        .expect("create_task should succeed");

    run_stage_agent(&store, &broker, task.task_id, "retrieval", false).await;

    // response_packaging is handled in-process by the coordinator once
    // retrieval advances the task past it — no fake agent needed.
    tokio::time::sleep(Duration::from_millis(80)).await;

    let final_task = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(final_task.status, conclave_shared::domain::TaskStatus::Complete);
    assert!(final_task.response.is_some());
}

#[tokio::test]
async fn stage_timeout_with_no_retry_budget_fails_the_task() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = Coordinator::new(
        store.clone(),
        Arc::new(FakeProgress::default()),
        broker.clone(),
        Arc::new(FakeTemplates { template }),
        Duration::from_millis(30),
        0,
    );

    let task = coordinator
        .create_task("user-1".to_string(), "slow query".to_string(), Some("standard".to_string()))
        .await
        .expect("create_task should succeed");

    // Never publish a completion: the stage deadline should fire and, with
    // zero retry budget, fail the task outright.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let final_task = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(final_task.status, conclave_shared::domain::TaskStatus::TimedOut);
    assert_eq!(final_task.error.as_ref().unwrap().stage, "retrieval");
}

#[tokio::test]
async fn abort_marks_task_aborted_and_stops_dispatch() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = make_coordinator(store.clone(), broker.clone(), template);

    let task = coordinator
        .create_task("user-1".to_string(), "abort me".to_string(), Some("standard".to_string()))
        .await
        .expect("create_task should succeed");

    let aborted = coordinator.abort(task.task_id).await.expect("abort should succeed");
    assert_eq!(aborted.status, conclave_shared::domain::TaskStatus::Aborted);

    tokio::time::sleep(Duration::from_millis(50)).await;

    // A redelivered completion for the in-flight stage must be a no-op now.
    run_stage_agent(&store, &broker, task.task_id, "retrieval", false).await;
    let final_task = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(final_task.status, conclave_shared::domain::TaskStatus::Aborted);
}

#[tokio::test]
async fn no_template_starts_on_an_intent_only_plan_that_reselects_itself() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    // The registered template is irrelevant here: omitting `template` must
    // bypass it entirely and start on the adaptive placeholder plan.
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = make_coordinator(store.clone(), broker.clone(), template);

    let task = coordinator
        .create_task("user-1".to_string(), "what is rust".to_string(), None)
        .await
        .expect("create_task should succeed");

    assert_eq!(task.template_name, "adaptive");
    assert_eq!(task.plan, vec!["intent".to_string()]);

    // Give the coordinator's execute loop a chance to dispatch "intent".
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Simulate the intent agent: re-selects the rest of the plan, then
    // advances past itself.
    store
        .mutate(
            task.task_id,
            Box::new(|t: &mut Task| {
                t.reselect_plan(vec!["retrieval".to_string(), "response_packaging".to_string()])?;
                t.advance_stage("intent")?;
                Ok(())
            }),
        )
        .await
        .expect("intent mutate should succeed");
    broker.publish_outcome(task.task_id, "intent", StageOutcome::Complete, "ok").await;

    run_stage_agent(&store, &broker, task.task_id, "retrieval", true).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let final_task = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(final_task.status, conclave_shared::domain::TaskStatus::Complete);
    assert_eq!(final_task.plan, vec!["intent", "retrieval", "response_packaging"]);
}

#[tokio::test]
async fn unregistered_template_name_is_rejected() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = make_coordinator(store.clone(), broker.clone(), template);

    let err = coordinator
        .create_task("user-1".to_string(), "what is rust".to_string(), Some("nonexistent".to_string()))
        .await
        .expect_err("an unregistered template name must be rejected");
    assert!(matches!(err, ConclaveError::InvalidInput(_)));
}

/// Moderation rejects the first draft and asks for a reasoning redo; the
/// coordinator must bounce back to reasoning *and* re-run moderation on the
/// retried draft rather than dropping it from the plan.
#[tokio::test]
async fn moderation_rejection_bounces_back_to_reasoning_and_reruns_moderation() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let template = DagTemplate::new("standard", vec!["reasoning", "moderation", "response_packaging"]);
    let coordinator = make_coordinator(store.clone(), broker.clone(), template);

    let task = coordinator
        .create_task("user-1".to_string(), "write me something".to_string(), Some("standard".to_string()))
        .await
        .expect("create_task should succeed");

    // First reasoning pass.
    run_stage_agent(&store, &broker, task.task_id, "reasoning", false).await;
    // Moderation rejects the draft; the coordinator should reselect
    // [reasoning, moderation, response_packaging] and redispatch reasoning.
    tokio::time::sleep(Duration::from_millis(20)).await;
    broker
        .publish_outcome(task.task_id, "moderation", StageOutcome::Failed, "retry_reasoning")
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let bounced = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(bounced.plan, vec!["reasoning", "reasoning", "moderation", "response_packaging"]);
    assert_eq!(bounced.current_stage.as_deref(), Some("reasoning"));

    // Second reasoning pass, then moderation passes.
    run_stage_agent(&store, &broker, task.task_id, "reasoning", false).await;
    run_stage_agent(&store, &broker, task.task_id, "moderation", false).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let final_task = coordinator.get_status(task.task_id).await.expect("task should still exist");
    assert_eq!(final_task.status, conclave_shared::domain::TaskStatus::Complete);
    assert_eq!(
        final_task.completed_stages,
        vec!["reasoning", "reasoning", "moderation", "response_packaging"]
    );
}

#[tokio::test]
async fn progress_stream_carries_stage_started_complete_and_response_ready() {
    let store = Arc::new(FakeStore::default());
    let broker = Arc::new(FakeBroker::new());
    let progress = Arc::new(FakeProgress::default());
    let template = DagTemplate::new("standard", vec!["retrieval", "response_packaging"]);
    let coordinator = make_coordinator_with_progress(store.clone(), broker.clone(), progress.clone(), template);

    let task = coordinator
        .create_task("user-1".to_string(), "what is rust".to_string(), Some("standard".to_string()))
        .await
        .expect("create_task should succeed");

    run_stage_agent(&store, &broker, task.task_id, "retrieval", false).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    let events = progress.for_task(task.task_id).await.expect("progress read should succeed");
    let has = |stage: &str, phase: ProgressPhase| events.iter().any(|e| e.stage == stage && e.phase == phase);

    assert!(has("retrieval", ProgressPhase::Started), "missing retrieval:started in {events:?}");
    assert!(has("retrieval", ProgressPhase::Complete), "missing retrieval:complete in {events:?}");
    assert!(
        events.iter().any(|e| e.stage == "response_packaging" && e.message == "response_ready"),
        "missing response_ready in {events:?}"
    );
}
