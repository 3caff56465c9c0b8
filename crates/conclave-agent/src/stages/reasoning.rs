use std::sync::Arc;

use async_trait::async_trait;
use conclave_shared::errors::ConclaveResult;

use super::{StageBody, StageInput, StageOutput};
use crate::collaborators::Generator;

/// Synthesizes a draft response grounded in `context` and `retrieval_hits`
/// (§4.F). Bounds the output token budget and propagates source
/// identifiers into the context delta for `response_packaging` to read.
pub struct ReasoningStage {
    generator: Arc<dyn Generator>,
    max_output_chars: usize,
}

impl ReasoningStage {
    pub fn new(generator: Arc<dyn Generator>, max_output_chars: usize) -> Self {
        Self {
            generator,
            max_output_chars,
        }
    }
}

#[async_trait]
impl StageBody for ReasoningStage {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput> {
        let sources: Vec<&str> = input.retrieval_hits.iter().map(|hit| hit.id.as_str()).collect();
        let prompt = format!(
            "query: {}\nsources: {}\ncontext: {}",
            input.query,
            sources.join(", "),
            input.context
        );

        let mut draft = self.generator.generate(&prompt, &input.context).await?;
        if draft.len() > self.max_output_chars {
            draft.truncate(self.max_output_chars);
        }

        Ok(StageOutput {
            context_delta: serde_json::json!({
                "draft_response": draft,
                "draft_sources": sources,
            }),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::FakeGenerator;
    use conclave_shared::domain::RetrievalHit;

    fn input_with_hit() -> StageInput {
        StageInput {
            query: "what is rust".to_string(),
            context: serde_json::json!({}),
            retrieval_hits: vec![RetrievalHit {
                id: "doc-1".to_string(),
                score: 0.8,
                metadata: serde_json::json!({}),
                snippet: "a systems language".to_string(),
            }],
            stage_args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn propagates_source_identifiers_into_context_delta() {
        let stage = ReasoningStage::new(
            Arc::new(FakeGenerator {
                response: "rust is memory safe".to_string(),
            }),
            1000,
        );
        let output = stage.run(input_with_hit()).await.unwrap();
        assert_eq!(output.context_delta["draft_sources"][0], "doc-1");
        assert_eq!(output.context_delta["draft_response"], "rust is memory safe");
    }

    #[tokio::test]
    async fn truncates_output_to_the_configured_budget() {
        let stage = ReasoningStage::new(
            Arc::new(FakeGenerator {
                response: "x".repeat(500),
            }),
            50,
        );
        let output = stage.run(input_with_hit()).await.unwrap();
        assert_eq!(output.context_delta["draft_response"].as_str().unwrap().len(), 50);
    }
}
