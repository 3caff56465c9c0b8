use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Periodic health signal an agent instance publishes to `health:{agent_kind}`
/// (§4.E "Periodically emit health heartbeats to a dedicated channel").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub agent_kind: String,
    pub instance_id: Uuid,
    pub processed_count: u64,
    pub last_error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
