use std::sync::Arc;

use async_trait::async_trait;
use conclave_shared::errors::ConclaveResult;

use super::{StageBody, StageInput, StageOutput};
use crate::collaborators::{Embedder, VectorIndex};

/// Queries an external vector index for ranked hits (§4.F). Embedding or
/// search failure is non-fatal: the coordinator treats an empty result as
/// zero hits and proceeds.
pub struct RetrievalStage {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl RetrievalStage {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self { embedder, index, top_k }
    }
}

#[async_trait]
impl StageBody for RetrievalStage {
    async fn run(&self, input: StageInput) -> ConclaveResult<StageOutput> {
        let embedding = match self.embedder.embed(&input.query).await {
            Ok(embedding) => embedding,
            Err(err) => {
                tracing::warn!(%err, "retrieval embedding failed, proceeding with zero hits");
                return Ok(StageOutput::default());
            }
        };

        let hits = match self.index.search(&embedding, self.top_k).await {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(%err, "retrieval vector search failed, proceeding with zero hits");
                Vec::new()
            }
        };

        Ok(StageOutput {
            retrieval_hits_delta: hits,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes::{FailingEmbedder, FakeEmbedder, FakeVectorIndex};
    use conclave_shared::domain::RetrievalHit;

    fn hit(id: &str) -> RetrievalHit {
        RetrievalHit {
            id: id.to_string(),
            score: 0.9,
            metadata: serde_json::json!({}),
            snippet: "rust is a systems language".to_string(),
        }
    }

    fn input() -> StageInput {
        StageInput {
            query: "what is rust".to_string(),
            context: serde_json::json!({}),
            retrieval_hits: vec![],
            stage_args: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn returns_ranked_hits_from_the_index() {
        let stage = RetrievalStage::new(
            Arc::new(FakeEmbedder),
            Arc::new(FakeVectorIndex::with_hits(vec![hit("doc-1")])),
            5,
        );
        let output = stage.run(input()).await.unwrap();
        assert_eq!(output.retrieval_hits_delta.len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_is_non_fatal() {
        let stage = RetrievalStage::new(Arc::new(FailingEmbedder), Arc::new(FakeVectorIndex::with_hits(vec![])), 5);
        let output = stage.run(input()).await.unwrap();
        assert!(output.retrieval_hits_delta.is_empty());
    }

    #[tokio::test]
    async fn top_k_bounds_the_returned_hits() {
        let stage = RetrievalStage::new(
            Arc::new(FakeEmbedder),
            Arc::new(FakeVectorIndex::with_hits(vec![hit("a"), hit("b"), hit("c")])),
            2,
        );
        let output = stage.run(input()).await.unwrap();
        assert_eq!(output.retrieval_hits_delta.len(), 2);
    }
}
