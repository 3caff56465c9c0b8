use chrono::{DateTime, Utc};
use conclave_shared::domain::{DagTemplate, Task, TaskResponse, TaskStatus};
use conclave_shared::errors::TaskDiagnostic;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// `POST /tasks` body (§6).
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "query must not be empty"))]
    pub query: String,
    pub template: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskCreatedResponse {
    pub task_id: Uuid,
}

/// The record returned from `GET /tasks/{id}`: the full task minus its
/// large fields, which are summarized instead (§6 "without large fields —
/// context excerpt, hit count").
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskSummary {
    pub task_id: Uuid,
    pub user_id: String,
    pub query: String,
    pub template_name: String,
    pub plan: Vec<String>,
    pub completed_stages: Vec<String>,
    pub current_stage: Option<String>,
    #[schema(value_type = String)]
    pub status: TaskStatus,
    #[schema(value_type = Object)]
    pub context_excerpt: serde_json::Value,
    pub retrieval_hit_count: usize,
    #[schema(value_type = Object)]
    pub response: Option<TaskResponse>,
    #[schema(value_type = Object)]
    pub error: Option<TaskDiagnostic>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.task_id,
            user_id: task.user_id,
            query: task.query,
            template_name: task.template_name,
            plan: task.plan,
            completed_stages: task.completed_stages,
            current_stage: task.current_stage,
            status: task.status,
            retrieval_hit_count: task.retrieval_hits.len(),
            context_excerpt: excerpt(&task.context),
            response: task.response,
            error: task.error,
            started_at: task.started_at,
            updated_at: task.updated_at,
        }
    }
}

/// Keeps at most the first few top-level keys of a context object, so a
/// growing `context` never balloons the status payload. Not a security
/// boundary, just a size cap on an otherwise-unbounded JSON blob.
const CONTEXT_EXCERPT_KEYS: usize = 5;

fn excerpt(context: &serde_json::Value) -> serde_json::Value {
    match context {
        serde_json::Value::Object(map) => {
            serde_json::Value::Object(map.iter().take(CONTEXT_EXCERPT_KEYS).map(|(k, v)| (k.clone(), v.clone())).collect())
        }
        other => other.clone(),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateSummary {
    pub name: String,
    pub stages: Vec<String>,
}

impl From<DagTemplate> for TemplateSummary {
    fn from(template: DagTemplate) -> Self {
        Self {
            name: template.name,
            stages: template.stages,
        }
    }
}

/// `?window=24h`-style query parameter shared by the analytics endpoints.
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    #[serde(default)]
    pub window: Option<String>,
}

/// Parses `"24h"` / `"30m"` / `"45s"` into a duration, defaulting to 24
/// hours when absent or unparseable.
pub fn parse_window(raw: Option<&str>) -> std::time::Duration {
    let default = std::time::Duration::from_secs(24 * 3600);
    let Some(raw) = raw else { return default };
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else { return default };
    let Ok(amount) = raw[..raw.len() - 1].parse::<u64>() else {
        return default;
    };
    match unit {
        's' => std::time::Duration::from_secs(amount),
        'm' => std::time::Duration::from_secs(amount * 60),
        'h' => std::time::Duration::from_secs(amount * 3600),
        'd' => std::time::Duration::from_secs(amount * 86_400),
        _ => default,
    }
}

/// `GET /tasks/{id}/progress?since=` query parameter.
#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_window_suffixes() {
        assert_eq!(parse_window(Some("24h")), std::time::Duration::from_secs(86_400));
        assert_eq!(parse_window(Some("30m")), std::time::Duration::from_secs(1_800));
        assert_eq!(parse_window(Some("45s")), std::time::Duration::from_secs(45));
        assert_eq!(parse_window(Some("2d")), std::time::Duration::from_secs(172_800));
    }

    #[test]
    fn falls_back_to_24h_on_garbage_input() {
        assert_eq!(parse_window(Some("banana")), std::time::Duration::from_secs(86_400));
        assert_eq!(parse_window(None), std::time::Duration::from_secs(86_400));
    }

    #[test]
    fn excerpt_caps_at_five_keys() {
        let mut map = serde_json::Map::new();
        for i in 0..10 {
            map.insert(format!("k{i}"), serde_json::json!(i));
        }
        let value = serde_json::Value::Object(map);
        let excerpted = excerpt(&value);
        assert_eq!(excerpted.as_object().unwrap().len(), CONTEXT_EXCERPT_KEYS);
    }
}
