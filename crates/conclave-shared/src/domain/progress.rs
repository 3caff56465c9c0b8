use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress event phase (§3 Progress event).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Started,
    Progress,
    Complete,
    Failed,
}

/// An ordered, best-effort advisory record of task evolution (§3, §GLOSSARY).
///
/// Progress events are not guaranteed in order across producers; consumers
/// MUST use `timestamp` or the per-task progress stream (which the store
/// appends in order) for authoritative ordering (§5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub task_id: Uuid,
    pub stage: String,
    pub phase: ProgressPhase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ProgressEvent {
    pub fn new(task_id: Uuid, stage: impl Into<String>, phase: ProgressPhase, message: impl Into<String>) -> Self {
        Self {
            task_id,
            stage: stage.into(),
            phase,
            message: message.into(),
            timestamp: Utc::now(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_carries_current_timestamp_and_no_payload() {
        let event = ProgressEvent::new(Uuid::now_v7(), "retrieval", ProgressPhase::Started, "begin");
        assert_eq!(event.stage, "retrieval");
        assert!(event.payload.is_none());
    }

    #[test]
    fn with_payload_attaches_structured_data() {
        let event = ProgressEvent::new(Uuid::now_v7(), "retrieval", ProgressPhase::Complete, "done")
            .with_payload(serde_json::json!({"hits": 2}));
        assert_eq!(event.payload.unwrap()["hits"], 2);
    }
}
