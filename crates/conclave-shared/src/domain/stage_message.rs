use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage message broker payload (§3, §6 envelope).
///
/// Persisted on a durable stage queue; redelivery on consumer nack or crash
/// is expected and must be handled idempotently by the receiving agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageMessage {
    pub task_id: Uuid,
    pub stage: String,
    pub attempt: u32,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub query: String,
    pub user_id: String,
    pub context_snapshot: serde_json::Value,
    pub retrieval_hits_snapshot: Vec<crate::domain::RetrievalHit>,
    #[serde(default)]
    pub stage_args: serde_json::Value,
}

impl StageMessage {
    pub fn first_attempt(
        task_id: Uuid,
        stage: impl Into<String>,
        query: impl Into<String>,
        user_id: impl Into<String>,
        context_snapshot: serde_json::Value,
        retrieval_hits_snapshot: Vec<crate::domain::RetrievalHit>,
    ) -> Self {
        Self {
            task_id,
            stage: stage.into(),
            attempt: 1,
            issued_at: chrono::Utc::now(),
            query: query.into(),
            user_id: user_id.into(),
            context_snapshot,
            retrieval_hits_snapshot,
            stage_args: serde_json::Value::Null,
        }
    }

    /// Build a redispatch of this message with the attempt counter bumped
    /// (§4.D retry policy: "one in-stage retry by redispatch").
    pub fn redispatch(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next.issued_at = chrono::Utc::now();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redispatch_increments_attempt_and_refreshes_issued_at() {
        let first = StageMessage::first_attempt(
            Uuid::now_v7(),
            "reasoning",
            "q",
            "u1",
            serde_json::json!({}),
            vec![],
        );
        let second = first.redispatch();
        assert_eq!(first.attempt, 1);
        assert_eq!(second.attempt, 2);
        assert_eq!(first.task_id, second.task_id);
    }
}
