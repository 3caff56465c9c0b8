use std::sync::Arc;
use std::time::Duration;

use conclave_shared::domain::{
    lifecycle_topic, ProgressEvent, ProgressPhase, StageMessage, StageOutcome, StageOutcomeEvent, Task, TaskResponse,
};
use conclave_shared::errors::{ConclaveError, ConclaveResult};

/// Stage executed in-process by the coordinator rather than dispatched to
/// an agent over the broker (§4.D "Special terminal stage").
const RESPONSE_PACKAGING_STAGE: &str = "response_packaging";
use dashmap::DashMap;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::execution::ExecutionState;
use crate::ports::{BrokerBackend, ProgressBackend, StoreBackend, TemplateBackend};

/// The master control program: creates tasks, runs each task's dispatch
/// loop, and serves the read paths the API layer calls through to (§4.D).
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn StoreBackend>,
    progress: Arc<dyn ProgressBackend>,
    broker: Arc<dyn BrokerBackend>,
    templates: Arc<dyn TemplateBackend>,
    stage_timeout: Duration,
    max_stage_retries: u32,
    execution: Arc<DashMap<Uuid, ExecutionState>>,
    wakeups: Arc<DashMap<Uuid, Arc<Notify>>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn StoreBackend>,
        progress: Arc<dyn ProgressBackend>,
        broker: Arc<dyn BrokerBackend>,
        templates: Arc<dyn TemplateBackend>,
        stage_timeout: Duration,
        max_stage_retries: u32,
    ) -> Self {
        Self {
            store,
            progress,
            broker,
            templates,
            stage_timeout,
            max_stage_retries,
            execution: Arc::new(DashMap::new()),
            wakeups: Arc::new(DashMap::new()),
        }
    }

    /// Select a template, persist the new task, and spawn its background
    /// execute loop. Returns as soon as the task is durably created —
    /// execution happens out of band (§4.D "create_task").
    ///
    /// `template`, if given, must already be registered. Otherwise the task
    /// starts on a placeholder single-stage plan: `intent` analyzes the
    /// query and re-selects the remaining plan before the second stage
    /// dispatches (§4.D "a placeholder plan whose first stage is intent
    /// analysis which can then re-select the plan").
    pub async fn create_task(
        &self,
        user_id: String,
        query: String,
        template: Option<String>,
    ) -> ConclaveResult<Task> {
        let template = match template {
            Some(name) => self
                .templates
                .get(&name)
                .ok_or_else(|| ConclaveError::InvalidInput(format!("unregistered template: {name}")))?,
            None => conclave_shared::domain::DagTemplate::new("adaptive", vec!["intent"]),
        };
        let task = Task::new(user_id, query, template.name.clone(), template.stages.clone());

        for stage in &task.plan {
            if stage != RESPONSE_PACKAGING_STAGE {
                self.broker.ensure_queue(stage).await?;
            }
        }
        self.store.create(&task).await?;
        self.execution.insert(task.task_id, ExecutionState::default());
        self.wakeups.insert(task.task_id, Arc::new(Notify::new()));
        self.emit_progress(task.task_id, "task", ProgressPhase::Started, "created").await;

        let coordinator = self.clone();
        let task_id = task.task_id;
        tokio::spawn(async move {
            coordinator.run_execute_loop(task_id).await;
        });

        Ok(task)
    }

    /// Best-effort append to the advisory progress stream (§3, §4.D): a
    /// failure here must never fail the stage it is reporting on.
    async fn emit_progress(&self, task_id: Uuid, stage: impl Into<String>, phase: ProgressPhase, message: impl Into<String>) {
        let event = ProgressEvent::new(task_id, stage, phase, message);
        if let Err(err) = self.progress.append(&event).await {
            tracing::warn!(%task_id, %err, "failed to append progress event");
        }
    }

    pub async fn get_status(&self, task_id: Uuid) -> ConclaveResult<Task> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(task_id.to_string()))
    }

    pub async fn get_progress(&self, task_id: Uuid) -> ConclaveResult<Vec<conclave_shared::domain::ProgressEvent>> {
        self.progress.for_task(task_id).await
    }

    /// Idempotent abort (§4.D `abort`): marks the task aborted in the
    /// durable tier and wakes its execute loop so it notices immediately
    /// rather than waiting out the current stage timeout.
    pub async fn abort(&self, task_id: Uuid) -> ConclaveResult<Task> {
        let task = self
            .store
            .mutate(task_id, Box::new(|t| {
                t.abort();
                Ok(())
            }))
            .await?;

        if let Some(notify) = self.wakeups.get(&task_id) {
            notify.notify_one();
        }
        let stage = task.current_stage.clone().unwrap_or_else(|| "task".to_string());
        self.emit_progress(task_id, stage, ProgressPhase::Failed, "aborted").await;
        Ok(task)
    }

    async fn dispatch_current_stage(&self, task: &Task) -> ConclaveResult<()> {
        let Some(stage) = task.current_stage.clone() else {
            return Ok(());
        };
        let message = StageMessage::first_attempt(
            task.task_id,
            stage.clone(),
            task.query.clone(),
            task.user_id.clone(),
            task.context.clone(),
            task.retrieval_hits.clone(),
        );
        self.broker.publish_stage(&stage, &message).await?;
        if let Some(mut state) = self.execution.get_mut(&task.task_id) {
            state.record_attempt(&stage);
        }
        self.emit_progress(task.task_id, stage, ProgressPhase::Started, "dispatched").await;
        Ok(())
    }

    async fn redispatch_current_stage(&self, task: &Task) -> ConclaveResult<()> {
        let Some(stage) = task.current_stage.clone() else {
            return Ok(());
        };
        let message = StageMessage::first_attempt(
            task.task_id,
            stage.clone(),
            task.query.clone(),
            task.user_id.clone(),
            task.context.clone(),
            task.retrieval_hits.clone(),
        )
        .redispatch();
        self.broker.publish_stage(&stage, &message).await?;
        if let Some(mut state) = self.execution.get_mut(&task.task_id) {
            state.record_attempt(&stage);
        }
        self.emit_progress(task.task_id, stage, ProgressPhase::Started, "redispatched").await;
        Ok(())
    }

    /// One task's supervision loop: wait for the agent-reported outcome of
    /// the current stage (or the stage deadline, whichever comes first),
    /// then decide whether to keep dispatching, retry, bounce moderation
    /// failures back to reasoning, or give up.
    async fn run_execute_loop(&self, task_id: Uuid) {
        let mut receiver = self.broker.subscribe_event(&lifecycle_topic(task_id));
        let wakeup = self
            .wakeups
            .get(&task_id)
            .map(|n| n.clone())
            .unwrap_or_else(|| Arc::new(Notify::new()));

        loop {
            let task = match self.store.get(task_id).await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::error!(%task_id, "execute loop running for a task missing from the store");
                    return;
                }
                Err(err) => {
                    tracing::error!(%task_id, %err, "failed to read task state in execute loop");
                    return;
                }
            };

            if task.is_terminal() {
                if let Err(err) = self.store.archive(task_id).await {
                    tracing::warn!(%task_id, %err, "failed to archive terminal task");
                }
                self.execution.remove(&task_id);
                self.wakeups.remove(&task_id);
                return;
            }

            if task.current_stage.is_none() {
                tracing::error!(%task_id, "non-terminal task has no current stage; failing it");
                let _ = self
                    .store
                    .mutate(task_id, Box::new(|t| {
                        t.fail(
                            conclave_shared::errors::ErrorKind::Internal,
                            "plan exhausted without a terminal outcome".to_string(),
                            t.plan.last().cloned().unwrap_or_default(),
                        );
                        Ok(())
                    }))
                    .await;
                continue;
            }

            let current_stage = task.current_stage.clone().expect("checked above");

            if current_stage == RESPONSE_PACKAGING_STAGE {
                if let Err(err) = self.package_response(&task).await {
                    tracing::error!(%task_id, %err, "failed to package final response");
                    let message = err.to_string();
                    let _ = self
                        .store
                        .mutate(task_id, Box::new(move |t| {
                            t.fail(
                                conclave_shared::errors::ErrorKind::Internal,
                                message,
                                RESPONSE_PACKAGING_STAGE.to_string(),
                            );
                            Ok(())
                        }))
                        .await;
                }
                continue;
            }

            // Dispatch exactly once per stage this task ever reaches; retries
            // and the moderation bounce-back redispatch explicitly instead
            // (they need the attempt counter bumped on the envelope).
            let never_dispatched = self
                .execution
                .get(&task_id)
                .map(|s| s.attempts_for(&current_stage) == 0)
                .unwrap_or(true);
            if never_dispatched {
                if let Err(err) = self.dispatch_current_stage(&task).await {
                    tracing::error!(%task_id, %err, stage = %current_stage, "failed to dispatch stage");
                }
            }

            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(envelope) if envelope.topic == lifecycle_topic(task_id) => {
                            match serde_json::from_value::<StageOutcomeEvent>(envelope.payload) {
                                Ok(outcome_event) => {
                                    self.handle_outcome(&task, outcome_event).await;
                                }
                                Err(err) => {
                                    tracing::warn!(%task_id, %err, "malformed lifecycle event payload");
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%task_id, skipped, "execute loop lagged behind lifecycle events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            tracing::error!(%task_id, "lifecycle event channel closed unexpectedly");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(self.stage_timeout) => {
                    self.handle_timeout(&task).await;
                }
                _ = wakeup.notified() => {
                    // Re-loop immediately (abort, or any other external nudge).
                }
            }
        }
    }

    /// Assemble the final response from `context`, `retrieval_hits`, and the
    /// progress log, then complete the task in one mutation (§4.D "Special
    /// terminal stage `response_packaging`").
    async fn package_response(&self, task: &Task) -> ConclaveResult<Task> {
        let progress = self.progress.for_task(task.task_id).await.unwrap_or_default();
        let step_log = Task::step_log_from_progress(&progress);

        let confidence = if task.retrieval_hits.is_empty() {
            0.5
        } else {
            let sum: f64 = task.retrieval_hits.iter().map(|hit| hit.score).sum();
            (sum / task.retrieval_hits.len() as f64).clamp(0.0, 1.0)
        };
        let content = task
            .context
            .get("draft_response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("no draft response produced for: {}", task.query));
        let sources = task.retrieval_hits.iter().map(|hit| hit.id.clone()).collect();

        let response = TaskResponse {
            content,
            sources,
            confidence,
            step_log,
        };
        let completed = self
            .store
            .mutate(
                task.task_id,
                Box::new(move |t| {
                    t.advance_stage(RESPONSE_PACKAGING_STAGE)?;
                    t.complete(response)
                }),
            )
            .await?;
        self.emit_progress(task.task_id, RESPONSE_PACKAGING_STAGE, ProgressPhase::Complete, "response_ready")
            .await;
        Ok(completed)
    }

    async fn handle_outcome(&self, task: &Task, event: StageOutcomeEvent) {
        let Some(current_stage) = &task.current_stage else {
            return;
        };
        if &event.stage != current_stage {
            // Late/duplicate completion for a stage we've already moved past.
            return;
        }

        match event.outcome {
            StageOutcome::Complete => {
                // The agent already advanced the task via Store::mutate;
                // nothing to do here but record the completion and let the
                // loop re-read and continue.
                self.emit_progress(task.task_id, current_stage.clone(), ProgressPhase::Complete, event.message.clone())
                    .await;
            }
            StageOutcome::Failed => {
                self.handle_stage_failure(task, current_stage, &event.message).await;
            }
        }
    }

    async fn handle_timeout(&self, task: &Task) {
        let Some(stage) = &task.current_stage else {
            return;
        };
        self.handle_stage_failure(task, stage, "stage exceeded its deadline").await;
    }

    async fn handle_stage_failure(&self, task: &Task, stage: &str, message: &str) {
        self.emit_progress(task.task_id, stage.to_string(), ProgressPhase::Failed, message.to_string())
            .await;

        if stage == "moderation" {
            let already_used = self
                .execution
                .get(&task.task_id)
                .map(|s| s.retry_reasoning_used)
                .unwrap_or(true);
            if !already_used {
                if let Some(mut state) = self.execution.get_mut(&task.task_id) {
                    state.retry_reasoning_used = true;
                }
                let remaining: Vec<String> = std::iter::once("reasoning".to_string())
                    .chain(task.plan.iter().skip(task.completed_stages.len()).cloned())
                    .collect();
                let result = self
                    .store
                    .mutate(task.task_id, Box::new(move |t| t.reselect_plan(remaining)))
                    .await;
                match result {
                    Ok(updated) => {
                        if let Err(err) = self.redispatch_current_stage(&updated).await {
                            tracing::error!(task_id = %task.task_id, %err, "failed to redispatch reasoning after moderation rejection");
                        }
                    }
                    Err(err) => tracing::error!(task_id = %task.task_id, %err, "failed to reselect plan for moderation bounce-back"),
                }
                return;
            }
        }

        let attempts = self.execution.get(&task.task_id).map(|s| s.attempts_for(stage)).unwrap_or(0);
        if attempts <= self.max_stage_retries {
            if let Err(err) = self.redispatch_current_stage(task).await {
                tracing::error!(task_id = %task.task_id, %err, "failed to redispatch stage");
            }
            return;
        }

        let kind = if message.contains("deadline") {
            conclave_shared::errors::ErrorKind::StageTimeout
        } else {
            conclave_shared::errors::ErrorKind::StageFailed
        };
        let message = message.to_string();
        let stage = stage.to_string();
        let _ = self
            .store
            .mutate(task.task_id, Box::new(move |t| {
                t.fail(kind, message, stage);
                Ok(())
            }))
            .await;
    }
}
