use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use conclave_shared::domain::{AgentAnalytics, TaskAnalytics};

use crate::dto::{parse_window, WindowQuery};
use crate::error::ApiError;
use crate::AppState;

/// `GET /analytics/tasks?window=24h` (§6): aggregate task outcomes and
/// latencies over the window, read from the archive.
#[utoipa::path(
    get,
    path = "/analytics/tasks",
    responses((status = 200, description = "Aggregate task outcomes over the window")),
)]
pub async fn task_analytics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<TaskAnalytics>, ApiError> {
    let window = parse_window(query.window.as_deref());
    let analytics = state.store.task_analytics(window).await?;
    Ok(Json(analytics))
}

/// `GET /analytics/agents?window=24h` (§6): per-agent-kind throughput and
/// latency over the window.
#[utoipa::path(
    get,
    path = "/analytics/agents",
    responses((status = 200, description = "Per-agent-kind throughput and latency over the window")),
)]
pub async fn agent_analytics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<AgentAnalytics>>, ApiError> {
    let window = parse_window(query.window.as_deref());
    let analytics = state.store.agent_analytics(window).await?;
    Ok(Json(analytics))
}
