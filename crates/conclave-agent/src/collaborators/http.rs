//! `reqwest`-backed collaborator implementations, each a thin JSON client
//! over a configurable base URL (§6 Configuration `worker.*_endpoint`).
//! Wired up by the worker binary; no fakes or mocks live here, matching the
//! teacher's own HTTP client crates which are exercised against a live
//! backend rather than a stubbed one.

use async_trait::async_trait;
use conclave_shared::domain::RetrievalHit;
use conclave_shared::errors::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};

use super::{Embedder, Generator, Moderator, VectorIndex, WebFetcher};

fn request_failed(collaborator: &str, err: reqwest::Error) -> ConclaveError {
    ConclaveError::Internal(format!("{collaborator} request failed: {err}"))
}

async fn unwrap_json<T: for<'de> Deserialize<'de>>(collaborator: &str, response: reqwest::Response) -> ConclaveResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ConclaveError::Internal(format!(
            "{collaborator} returned {status}: {body}"
        )));
    }
    response.json::<T>().await.map_err(|err| request_failed(collaborator, err))
}

/// `POST {base_url}/generate`.
pub struct HttpGenerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    context: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str, context: &serde_json::Value) -> ConclaveResult<String> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&GenerateRequest { prompt, context })
            .send()
            .await
            .map_err(|err| request_failed("generator", err))?;
        unwrap_json::<GenerateResponse>("generator", response).await.map(|body| body.text)
    }
}

/// `POST {base_url}/embed`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> ConclaveResult<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|err| request_failed("embedder", err))?;
        unwrap_json::<EmbedResponse>("embedder", response).await.map(|body| body.embedding)
    }
}

/// `POST {base_url}/search`.
pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    embedding: &'a [f32],
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<RetrievalHit>,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn search(&self, embedding: &[f32], top_k: usize) -> ConclaveResult<Vec<RetrievalHit>> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&SearchRequest { embedding, top_k })
            .send()
            .await
            .map_err(|err| request_failed("vector index", err))?;
        unwrap_json::<SearchResponse>("vector index", response).await.map(|body| body.hits)
    }
}

/// `POST {base_url}/score`.
pub struct HttpModerator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModerator {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct ScoreRequest<'a> {
    draft: &'a str,
}

#[derive(Deserialize)]
struct ScoreResponse {
    score: f64,
}

#[async_trait]
impl Moderator for HttpModerator {
    async fn score(&self, draft: &str) -> ConclaveResult<f64> {
        let response = self
            .client
            .post(format!("{}/score", self.base_url))
            .json(&ScoreRequest { draft })
            .send()
            .await
            .map_err(|err| request_failed("moderator", err))?;
        unwrap_json::<ScoreResponse>("moderator", response).await.map(|body| body.score)
    }
}

/// `POST {base_url}/fetch`.
pub struct HttpWebFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWebFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[derive(Serialize)]
struct FetchRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct FetchResponse {
    hits: Vec<RetrievalHit>,
}

#[async_trait]
impl WebFetcher for HttpWebFetcher {
    async fn fetch(&self, query: &str) -> ConclaveResult<Vec<RetrievalHit>> {
        let response = self
            .client
            .post(format!("{}/fetch", self.base_url))
            .json(&FetchRequest { query })
            .send()
            .await
            .map_err(|err| request_failed("web fetcher", err))?;
        unwrap_json::<FetchResponse>("web fetcher", response).await.map(|body| body.hits)
    }
}
