//! Specialist stage bodies (§4.F), each registered under its stage name in
//! a `StageName -> StageBody` dispatch table (§9 redesign guidance) rather
//! than matched through a growing `match` arm per stage.

mod intent;
mod moderation;
mod reasoning;
mod registry;
mod retrieval;
mod web_augmentation;

pub use intent::IntentStage;
pub use moderation::ModerationStage;
pub use reasoning::ReasoningStage;
pub use registry::StageRegistry;
pub use retrieval::RetrievalStage;
pub use web_augmentation::WebAugmentationStage;

use async_trait::async_trait;
use conclave_shared::domain::RetrievalHit;
use conclave_shared::errors::ConclaveResult;

/// Input handed to a stage body: the unchanging capability signature from
/// §4.E, `(query, context, retrieval_hits, stage_args)`.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub query: String,
    pub context: serde_json::Value,
    pub retrieval_hits: Vec<RetrievalHit>,
    pub stage_args: serde_json::Value,
}

/// A stage body's result: `(context_delta, retrieval_hits_delta,
/// structured_result)` from §4.E, plus the one plan mutation `intent` is
/// allowed to request (§4.D "can then re-select the plan").
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub context_delta: serde_json::Value,
    pub retrieval_hits_delta: Vec<RetrievalHit>,
    pub structured_result: serde_json::Value,
    pub reselect_plan: Option<Vec<String>>,
}

#[async_trait]
pub trait StageBody: Send + Sync {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput>;
}

#[cfg(test)]
fn _assert_object_safe(_: &dyn StageBody) {}
