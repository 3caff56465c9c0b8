//! Narrow traits for the external collaborators specialist stages call out
//! to (§9 "Global singletons" redesign note): an LM client, an embedding
//! client, a vector index, a moderation scorer, and a web evidence fetcher.
//! `http` holds the production, `reqwest`-backed implementations the
//! worker binary wires up; tests use the fakes below.

pub mod http;

use async_trait::async_trait;
use conclave_shared::domain::RetrievalHit;
use conclave_shared::errors::ConclaveResult;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> ConclaveResult<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> ConclaveResult<Vec<f32>>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], top_k: usize) -> ConclaveResult<Vec<RetrievalHit>>;
}

#[async_trait]
pub trait Moderator: Send + Sync {
    async fn score(&self, draft: &str) -> ConclaveResult<f64>;
}

#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch(&self, query: &str) -> ConclaveResult<Vec<RetrievalHit>>;
}

#[cfg(test)]
pub mod fakes {
    use super::*;

    pub struct FakeGenerator {
        pub response: String,
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, _prompt: &str, _context: &serde_json::Value) -> ConclaveResult<String> {
            Ok(self.response.clone())
        }
    }

    pub struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> ConclaveResult<Vec<f32>> {
            Ok(vec![text.len() as f32])
        }
    }

    pub struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> ConclaveResult<Vec<f32>> {
            Err(conclave_shared::errors::ConclaveError::Internal(
                "embedding backend unreachable".to_string(),
            ))
        }
    }

    pub struct FakeVectorIndex {
        hits: Vec<RetrievalHit>,
    }

    impl FakeVectorIndex {
        pub fn with_hits(hits: Vec<RetrievalHit>) -> Self {
            Self { hits }
        }
    }

    #[async_trait]
    impl VectorIndex for FakeVectorIndex {
        async fn search(&self, _embedding: &[f32], top_k: usize) -> ConclaveResult<Vec<RetrievalHit>> {
            Ok(self.hits.iter().take(top_k).cloned().collect())
        }
    }

    pub struct FakeModerator {
        pub score: f64,
    }

    #[async_trait]
    impl Moderator for FakeModerator {
        async fn score(&self, _draft: &str) -> ConclaveResult<f64> {
            Ok(self.score)
        }
    }

    pub struct FakeWebFetcher {
        pub hits: Vec<RetrievalHit>,
    }

    #[async_trait]
    impl WebFetcher for FakeWebFetcher {
        async fn fetch(&self, _query: &str) -> ConclaveResult<Vec<RetrievalHit>> {
            Ok(self.hits.clone())
        }
    }
}
