use std::sync::Arc;

use async_trait::async_trait;
use conclave_shared::errors::{ConclaveError, ConclaveResult};

use super::{StageBody, StageInput, StageOutput};
use crate::collaborators::Moderator;

/// Scores the reasoning draft on policy/quality (§4.F). Below threshold,
/// fails the stage so the coordinator's bounce-back policy can route a
/// single reasoning re-run (at most one per task).
pub struct ModerationStage {
    moderator: Arc<dyn Moderator>,
    threshold: f64,
}

impl ModerationStage {
    pub fn new(moderator: Arc<dyn Moderator>, threshold: f64) -> Self {
        Self { moderator, threshold }
    }
}

#[async_trait]
impl StageBody for ModerationStage {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput> {
        let draft = input.context.get("draft_response").and_then(|v| v.as_str()).unwrap_or_default();
        let score = self.moderator.score(draft).await?;

        if score < self.threshold {
            return Err(ConclaveError::StageFailed {
                stage: "moderation".to_string(),
                message: format!(
                    "draft scored {score:.2}, below threshold {:.2}; retry_reasoning requested",
                    self.threshold
                ),
            });
        }

        Ok(StageOutput {
            context_delta: serde_json::json!({ "moderation_score": score }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeModerator;

    fn input(draft: &str) -> StageInput {
        StageInput {
            query: "q".to_string(),
            context: serde_json::json!({ "draft_response": draft }),
            retrieval_hits: vec![],
            stage_args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn passes_drafts_at_or_above_threshold() {
        let stage = ModerationStage::new(Arc::new(FakeModerator { score: 0.8 }), 0.6);
        let output = stage.run(input("a fine answer")).await.unwrap();
        assert_eq!(output.context_delta["moderation_score"], 0.8);
    }

    #[tokio::test]
    async fn fails_drafts_below_threshold() {
        let stage = ModerationStage::new(Arc::new(FakeModerator { score: 0.2 }), 0.6);
        let err = stage.run(input("a weak answer")).await.unwrap_err();
        assert!(matches!(err, ConclaveError::StageFailed { .. }));
    }
}
