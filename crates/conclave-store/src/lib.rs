//! Two-tier task state store.
//!
//! The fast tier is an in-process [`moka`] cache sized for the life of a
//! task (§6 `task_ttl_seconds`); the durable tier is a relational archive
//! that every mutation is written through to before the fast tier is
//! updated, so a coordinator restart never loses a task that already
//! acknowledged a caller.

mod progress_log;
mod store;

pub use progress_log::ProgressLog;
pub use store::TaskStore;
