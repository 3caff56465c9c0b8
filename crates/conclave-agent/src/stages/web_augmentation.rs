use std::sync::Arc;

use async_trait::async_trait;
use conclave_shared::errors::ConclaveResult;

use super::{StageBody, StageInput, StageOutput};
use crate::collaborators::WebFetcher;

/// Fetches external evidence when intent's `needs_web_signal` routed the
/// plan through this stage (§4.F). Fetch failure is non-fatal: the task
/// proceeds with empty augmentation.
pub struct WebAugmentationStage {
    fetcher: Arc<dyn WebFetcher>,
}

impl WebAugmentationStage {
    pub fn new(fetcher: Arc<dyn WebFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl StageBody for WebAugmentationStage {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput> {
        match self.fetcher.fetch(&input.query).await {
            Ok(hits) => Ok(StageOutput {
                retrieval_hits_delta: hits,
                ..Default::default()
            }),
            Err(err) => {
                tracing::warn!(%err, "web augmentation failed, proceeding without extra evidence");
                Ok(StageOutput::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeWebFetcher;
    use conclave_shared::domain::RetrievalHit;

    fn input() -> StageInput {
        StageInput {
            query: "latest rust release".to_string(),
            context: serde_json::json!({}),
            retrieval_hits: vec![],
            stage_args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn returns_fetched_evidence() {
        let stage = WebAugmentationStage::new(Arc::new(FakeWebFetcher {
            hits: vec![RetrievalHit {
                id: "web-1".to_string(),
                score: 0.7,
                metadata: serde_json::json!({}),
                snippet: "rust 1.90 released".to_string(),
            }],
        }));
        let output = stage.run(input()).await.unwrap();
        assert_eq!(output.retrieval_hits_delta.len(), 1);
    }
}
