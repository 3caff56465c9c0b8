//! Thin HTTP client over the coordinator API (§6), mirroring the shape of
//! the teacher's own client crates: one `reqwest::Client` plus typed
//! request/response structs, kept separate from the server crate so the
//! CLI doesn't pull in an HTTP framework.

use std::time::Duration;

use chrono::{DateTime, Utc};
use conclave_shared::domain::TaskStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub(crate) struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct CreateTaskRequest {
    user_id: String,
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskCreatedResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskSummary {
    pub task_id: Uuid,
    pub user_id: String,
    pub query: String,
    pub template_name: String,
    pub plan: Vec<String>,
    pub completed_stages: Vec<String>,
    pub current_stage: Option<String>,
    pub status: TaskStatus,
    pub context_excerpt: serde_json::Value,
    pub retrieval_hit_count: usize,
    pub response: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressEntry {
    pub stage: String,
    pub phase: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TemplateSummary {
    pub name: String,
    pub stages: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskAnalytics {
    pub window_seconds: i64,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub aborted: i64,
    pub timed_out: i64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AgentAnalytics {
    pub agent_kind: String,
    pub processed: i64,
    pub failed: i64,
    pub avg_duration_ms: f64,
}

impl ApiClient {
    pub(crate) fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    async fn check_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("request failed: {status}: {body}")
    }

    pub(crate) async fn submit_task(
        &self,
        user_id: String,
        query: String,
        template: Option<String>,
    ) -> anyhow::Result<TaskCreatedResponse> {
        let response = self
            .http
            .post(format!("{}/tasks", self.base_url))
            .json(&CreateTaskRequest { user_id, query, template })
            .send()
            .await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn get_task(&self, task_id: Uuid) -> anyhow::Result<TaskSummary> {
        let response = self.http.get(format!("{}/tasks/{task_id}", self.base_url)).send().await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn get_progress(&self, task_id: Uuid) -> anyhow::Result<Vec<ProgressEntry>> {
        let response = self
            .http
            .get(format!("{}/tasks/{task_id}/progress", self.base_url))
            .send()
            .await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn abort_task(&self, task_id: Uuid) -> anyhow::Result<TaskSummary> {
        let response = self
            .http
            .post(format!("{}/tasks/{task_id}/abort", self.base_url))
            .send()
            .await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn list_templates(&self) -> anyhow::Result<Vec<TemplateSummary>> {
        let response = self.http.get(format!("{}/templates", self.base_url)).send().await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn task_analytics(&self, window: Option<&str>) -> anyhow::Result<TaskAnalytics> {
        let mut request = self.http.get(format!("{}/analytics/tasks", self.base_url));
        if let Some(window) = window {
            request = request.query(&[("window", window)]);
        }
        let response = request.send().await?;
        Ok(Self::check_status(response).await?.json().await?)
    }

    pub(crate) async fn agent_analytics(&self, window: Option<&str>) -> anyhow::Result<Vec<AgentAnalytics>> {
        let mut request = self.http.get(format!("{}/analytics/agents", self.base_url));
        if let Some(window) = window {
            request = request.query(&[("window", window)]);
        }
        let response = request.send().await?;
        Ok(Self::check_status(response).await?.json().await?)
    }
}
