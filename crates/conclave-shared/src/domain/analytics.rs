use serde::{Deserialize, Serialize};

/// Aggregate task outcomes over a reporting window, read from
/// `conclave.task_history` (§6 `GET /analytics/tasks`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAnalytics {
    pub window_seconds: i64,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub aborted: i64,
    pub timed_out: i64,
    pub avg_duration_ms: f64,
}

/// Per-agent-kind throughput and latency over a reporting window, read from
/// `conclave.agent_performance` (§6 `GET /analytics/agents`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentAnalytics {
    pub agent_kind: String,
    pub processed: i64,
    pub failed: i64,
    pub avg_duration_ms: f64,
}
