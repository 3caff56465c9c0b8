use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProgressEvent;
use crate::errors::{ConclaveError, ConclaveResult, TaskDiagnostic};

/// Recommended live retention for a task record in the fast tier (§3 `ttl_hint`).
pub const DEFAULT_TASK_TTL_SECONDS: u64 = 600;

/// Task lifecycle status (§4.D state machine).
///
/// `Complete`, `Failed`, `Aborted`, and `TimedOut` are terminal and absorbing:
/// once reached, [`Task::status`] never changes again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    Aborted,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Aborted | TaskStatus::TimedOut
        )
    }
}

/// A single retrieval hit returned by the retrieval stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub snippet: String,
}

/// One entry of the assembled response's step log (§4.D terminal packaging).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepLogEntry {
    pub stage: String,
    pub outcome: String,
    pub duration_ms: i64,
}

/// The final packaged answer, set only when `status == Complete` (§3 invariant 4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResponse {
    pub content: String,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub step_log: Vec<StepLogEntry>,
}

/// Authoritative task record (§3).
///
/// Invariants enforced by [`Task::check_invariants`] (checked on every
/// committed update by `Store::mutate`, never bypassed by callers):
/// 1. `completed_stages` is a strict prefix of `plan`.
/// 2. `current_stage == plan[completed_stages.len()]` iff status is
///    pending/in_progress; else `None`.
/// 3. Terminal statuses are absorbing.
/// 4. `response.is_some()` iff `status == Complete`.
/// 5. `error.stage`, when present, is a member of `plan`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: Uuid,
    pub user_id: String,
    pub query: String,
    pub template_name: String,
    pub plan: Vec<String>,
    pub completed_stages: Vec<String>,
    pub current_stage: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub retrieval_hits: Vec<RetrievalHit>,
    pub response: Option<TaskResponse>,
    pub error: Option<TaskDiagnostic>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ttl_hint_seconds: u64,
}

impl Task {
    /// Construct a new task in the `Pending` state (`Coordinator::create_task`).
    pub fn new(user_id: String, query: String, template_name: String, plan: Vec<String>) -> Self {
        let now = Utc::now();
        let current_stage = plan.first().cloned();
        Self {
            task_id: Uuid::now_v7(),
            user_id,
            query,
            template_name,
            plan,
            completed_stages: Vec::new(),
            current_stage,
            status: TaskStatus::Pending,
            context: serde_json::Value::Object(Default::default()),
            retrieval_hits: Vec::new(),
            response: None,
            error: None,
            started_at: now,
            updated_at: now,
            ttl_hint_seconds: DEFAULT_TASK_TTL_SECONDS,
        }
    }

    /// Validate the §3 invariants. Called by `Store::mutate` after every
    /// transformation; a violation means the caller's transform is buggy,
    /// not that the store itself misbehaved.
    pub fn check_invariants(&self) -> ConclaveResult<()> {
        if self.plan.len() < self.completed_stages.len()
            || self.plan[..self.completed_stages.len()] != self.completed_stages[..]
        {
            return Err(ConclaveError::Internal(format!(
                "completed_stages {:?} is not a prefix of plan {:?}",
                self.completed_stages, self.plan
            )));
        }

        let expected_current = if matches!(self.status, TaskStatus::Pending | TaskStatus::InProgress) {
            self.plan.get(self.completed_stages.len()).cloned()
        } else {
            None
        };
        if self.current_stage != expected_current {
            return Err(ConclaveError::Internal(format!(
                "current_stage {:?} does not match expected {:?} for status {:?}",
                self.current_stage, expected_current, self.status
            )));
        }

        if (self.response.is_some()) != matches!(self.status, TaskStatus::Complete) {
            return Err(ConclaveError::Internal(
                "response must be present iff status == complete".to_string(),
            ));
        }

        if let Some(diag) = &self.error {
            if !self.plan.iter().any(|s| s == &diag.stage) {
                return Err(ConclaveError::Internal(format!(
                    "error.stage {} is not a member of plan {:?}",
                    diag.stage, self.plan
                )));
            }
        }

        Ok(())
    }

    /// True once the task has reached an absorbing status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Append `stage` to `completed_stages` and advance `current_stage`,
    /// bumping `updated_at`. The one place stage advancement happens, so
    /// every caller goes through it rather than mutating the fields by hand.
    pub fn advance_stage(&mut self, stage: &str) -> ConclaveResult<()> {
        if self.is_terminal() {
            // Mutation is a no-op on terminal tasks (§5 cancellation semantics,
            // §8 redelivery idempotence).
            return Ok(());
        }
        if self.current_stage.as_deref() != Some(stage) {
            // Already advanced past this stage: redelivered completion, no-op.
            return Ok(());
        }
        self.completed_stages.push(stage.to_string());
        self.current_stage = self.plan.get(self.completed_stages.len()).cloned();
        if self.current_stage.is_none() {
            self.status = TaskStatus::InProgress;
        }
        self.updated_at = Utc::now();
        self.check_invariants()
    }

    /// Replace the remaining plan (stages not yet completed) — the one
    /// permitted mid-execution DAG mutation, performed by `intent` at most
    /// once before the second stage dispatch (§9 Open Questions).
    pub fn reselect_plan(&mut self, remaining: Vec<String>) -> ConclaveResult<()> {
        if self.is_terminal() {
            return Ok(());
        }
        let mut new_plan = self.completed_stages.clone();
        new_plan.extend(remaining);
        self.plan = new_plan;
        self.current_stage = self.plan.get(self.completed_stages.len()).cloned();
        self.updated_at = Utc::now();
        self.check_invariants()
    }

    /// Merge a stage's context delta into the accumulator (object union;
    /// last write per key wins, matching §3's "opaque accumulator that
    /// stages may append to").
    pub fn merge_context(&mut self, delta: serde_json::Value) {
        if let (serde_json::Value::Object(base), serde_json::Value::Object(added)) =
            (&mut self.context, delta)
        {
            for (k, v) in added {
                base.insert(k, v);
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn append_retrieval_hits(&mut self, mut hits: Vec<RetrievalHit>) {
        self.retrieval_hits.append(&mut hits);
        self.updated_at = Utc::now();
    }

    /// Transition to a terminal failure state with a diagnostic (§7 propagation).
    pub fn fail(&mut self, kind: crate::errors::ErrorKind, message: String, stage: String) {
        if self.is_terminal() {
            return;
        }
        self.status = match kind {
            crate::errors::ErrorKind::StageTimeout => TaskStatus::TimedOut,
            crate::errors::ErrorKind::Aborted => TaskStatus::Aborted,
            _ => TaskStatus::Failed,
        };
        self.error = Some(TaskDiagnostic {
            kind,
            message,
            stage,
        });
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    /// Idempotent abort (§4.D `abort`): a no-op if already terminal.
    pub fn abort(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = TaskStatus::Aborted;
        self.current_stage = None;
        self.updated_at = Utc::now();
    }

    /// Assemble the final response and mark the task complete
    /// (`response_packaging`, executed in-process by the coordinator).
    pub fn complete(&mut self, response: TaskResponse) -> ConclaveResult<()> {
        if self.is_terminal() {
            return Ok(());
        }
        self.status = TaskStatus::Complete;
        self.response = Some(response);
        self.current_stage = None;
        self.updated_at = Utc::now();
        self.check_invariants()
    }

    /// Build the step log portion of the final response from an ordered
    /// progress stream (§4.D "assembles final response ... and the progress log").
    pub fn step_log_from_progress(events: &[ProgressEvent]) -> Vec<StepLogEntry> {
        let mut log = Vec::new();
        let mut started_at: std::collections::HashMap<String, DateTime<Utc>> = Default::default();
        for event in events {
            match event.phase {
                ProgressPhaseAlias::Started => {
                    started_at.insert(event.stage.clone(), event.timestamp);
                }
                ProgressPhaseAlias::Complete | ProgressPhaseAlias::Failed => {
                    let duration_ms = started_at
                        .get(&event.stage)
                        .map(|start| (event.timestamp - *start).num_milliseconds())
                        .unwrap_or(0);
                    log.push(StepLogEntry {
                        stage: event.stage.clone(),
                        outcome: format!("{:?}", event.phase).to_lowercase(),
                        duration_ms,
                    });
                }
                ProgressPhaseAlias::Progress => {}
            }
        }
        log
    }
}

// Local alias so `step_log_from_progress` can match on the re-exported type
// without creating a cyclic module reference.
use super::ProgressPhase as ProgressPhaseAlias;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task::new(
            "u1".into(),
            "list templates".into(),
            "simple_lookup".into(),
            vec!["retrieval".into(), "response_packaging".into()],
        )
    }

    #[test]
    fn new_task_starts_pending_with_first_stage_current() {
        let task = sample_task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.current_stage.as_deref(), Some("retrieval"));
        assert!(task.completed_stages.is_empty());
        task.check_invariants().unwrap();
    }

    #[test]
    fn advance_stage_moves_prefix_and_current() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        task.advance_stage("retrieval").unwrap();
        assert_eq!(task.completed_stages, vec!["retrieval".to_string()]);
        assert_eq!(task.current_stage.as_deref(), Some("response_packaging"));
    }

    #[test]
    fn advance_stage_is_noop_on_terminal_task() {
        let mut task = sample_task();
        task.abort();
        let before = task.clone();
        task.advance_stage("retrieval").unwrap();
        assert_eq!(task, before);
    }

    #[test]
    fn advance_stage_is_noop_on_redelivery() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        task.advance_stage("retrieval").unwrap();
        let after_first = task.clone();
        // Redelivered completion for the same (already-passed) stage.
        task.advance_stage("retrieval").unwrap();
        assert_eq!(task, after_first);
    }

    #[test]
    fn abort_is_idempotent() {
        let mut task = sample_task();
        task.abort();
        let after_first = task.clone();
        task.abort();
        assert_eq!(task, after_first);
        assert_eq!(task.status, TaskStatus::Aborted);
    }

    #[test]
    fn complete_requires_response_and_sets_status() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        task.advance_stage("retrieval").unwrap();
        task.advance_stage("response_packaging").unwrap();
        task.complete(TaskResponse {
            content: "answer".into(),
            sources: vec!["d1".into()],
            confidence: 0.9,
            step_log: vec![],
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::Complete);
        assert!(task.response.is_some());
        assert!(task.current_stage.is_none());
    }

    #[test]
    fn fail_sets_timed_out_for_stage_timeout_kind() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        task.fail(
            crate::errors::ErrorKind::StageTimeout,
            "deadline exceeded".into(),
            "retrieval".into(),
        );
        assert_eq!(task.status, TaskStatus::TimedOut);
        assert_eq!(task.error.as_ref().unwrap().stage, "retrieval");
    }

    #[test]
    fn check_invariants_rejects_response_without_complete_status() {
        let mut task = sample_task();
        task.response = Some(TaskResponse {
            content: "x".into(),
            sources: vec![],
            confidence: 0.1,
            step_log: vec![],
        });
        assert!(task.check_invariants().is_err());
    }

    #[test]
    fn check_invariants_rejects_error_stage_outside_plan() {
        let mut task = sample_task();
        task.error = Some(TaskDiagnostic {
            kind: crate::errors::ErrorKind::StageFailed,
            message: "boom".into(),
            stage: "not_in_plan".into(),
        });
        assert!(task.check_invariants().is_err());
    }

    #[test]
    fn reselect_plan_preserves_completed_prefix() {
        let mut task = sample_task();
        task.status = TaskStatus::InProgress;
        task.advance_stage("retrieval").unwrap();
        task.reselect_plan(vec!["web_augmentation".into(), "response_packaging".into()])
            .unwrap();
        assert_eq!(task.plan[0], "retrieval");
        assert_eq!(task.completed_stages, vec!["retrieval".to_string()]);
        assert_eq!(task.current_stage.as_deref(), Some("web_augmentation"));
    }
}
