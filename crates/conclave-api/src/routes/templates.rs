use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use crate::dto::TemplateSummary;
use crate::AppState;

/// `GET /templates` (§6): lists registered template names and stage lists.
#[utoipa::path(
    get,
    path = "/templates",
    responses((status = 200, description = "Registered DAG templates", body = [TemplateSummary])),
)]
pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<TemplateSummary>> {
    let templates = state.templates.list().into_iter().map(TemplateSummary::from).collect();
    Json(templates)
}
