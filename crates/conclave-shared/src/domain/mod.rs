//! # Domain Model
//!
//! Core types shared by every crate in the workspace: the task record and
//! its invariants, the stage message envelope, progress events, and DAG
//! templates (§3).

mod analytics;
mod lifecycle;
mod progress;
mod stage_message;
mod task;
mod template;

pub use analytics::{AgentAnalytics, TaskAnalytics};
pub use lifecycle::{health_topic, lifecycle_topic, StageOutcome, StageOutcomeEvent};
pub use progress::{ProgressEvent, ProgressPhase};
pub use stage_message::StageMessage;
pub use task::{
    RetrievalHit, StepLogEntry, Task, TaskResponse, TaskStatus,
    DEFAULT_TASK_TTL_SECONDS,
};
pub use template::{DagTemplate, SelectionClause};
