//! Message broker: durable per-stage dispatch queues plus transient
//! pub/sub event topics, both backed by PostgreSQL so the workspace
//! needs no second infrastructure dependency (§4.B).

mod event_topic;
mod provider;
mod stage_queue;

pub use event_topic::{EventEnvelope, EventTopic};
pub use provider::BrokerProvider;
pub use stage_queue::{StageEnvelope, StageQueue};
