//! Agent runtime: subscribes to one stage queue, runs the registered stage
//! body, merges the result into the task record, and reports the outcome
//! (§4.E, §4.F).

pub mod collaborators;
pub mod heartbeat;
pub mod runtime;
pub mod stages;

pub use heartbeat::HeartbeatPayload;
pub use runtime::AgentRuntime;
pub use stages::{StageBody, StageInput, StageOutput, StageRegistry};
