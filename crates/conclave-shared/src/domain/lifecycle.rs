use serde::{Deserialize, Serialize};

/// Outcome an agent reports on a task's lifecycle event topic after it
/// finishes processing a stage message (§4.B event topics, §4.D dispatch).
/// The coordinator's execute loop is the sole subscriber; the durable
/// state change itself already happened via `Store::mutate` before this
/// is published, so a dropped event only delays the next dispatch, it
/// never loses the underlying state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageOutcomeEvent {
    pub stage: String,
    pub outcome: StageOutcome,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Complete,
    Failed,
}

/// Name of the per-task lifecycle event topic both the agent runtime and
/// the coordinator's execute loop subscribe/publish to.
pub fn lifecycle_topic(task_id: uuid::Uuid) -> String {
    format!("task:{task_id}:lifecycle")
}

/// Name of the per-agent-kind health heartbeat topic (§4.E heartbeats).
pub fn health_topic(agent_kind: &str) -> String {
    format!("health:{agent_kind}")
}
