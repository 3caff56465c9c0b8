use chrono::{DateTime, Utc};
use conclave_shared::domain::{ProgressEvent, ProgressPhase};
use conclave_shared::errors::ConclaveResult;
use sqlx::PgPool;
use uuid::Uuid;

/// Durable, append-only log of stage transitions (§4.D progress stream,
/// §8 "progress stream completeness"). Separate from `TaskStore` because
/// it is write-mostly and never participates in the per-task mutation
/// lease — concurrent agents append to it freely.
#[derive(Clone)]
pub struct ProgressLog {
    pool: PgPool,
}

impl ProgressLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, event: &ProgressEvent) -> ConclaveResult<()> {
        sqlx::query(
            "INSERT INTO conclave.stage_transition_log
                (task_id, stage, phase, message, payload, occurred_at)
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(event.task_id)
        .bind(&event.stage)
        .bind(phase_str(event.phase))
        .bind(&event.message)
        .bind(&event.payload)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ordered events for a task, oldest first — the feed a status/progress
    /// API handler or `step_log_from_progress` consumes.
    pub async fn for_task(&self, task_id: Uuid) -> ConclaveResult<Vec<ProgressEvent>> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "SELECT task_id, stage, phase, message, payload, occurred_at
             FROM conclave.stage_transition_log
             WHERE task_id = $1
             ORDER BY occurred_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProgressRow::into_event).collect()
    }
}

fn phase_str(phase: ProgressPhase) -> &'static str {
    match phase {
        ProgressPhase::Started => "started",
        ProgressPhase::Progress => "progress",
        ProgressPhase::Complete => "complete",
        ProgressPhase::Failed => "failed",
    }
}

fn phase_from_str(value: &str) -> ConclaveResult<ProgressPhase> {
    Ok(match value {
        "started" => ProgressPhase::Started,
        "progress" => ProgressPhase::Progress,
        "complete" => ProgressPhase::Complete,
        "failed" => ProgressPhase::Failed,
        other => {
            return Err(conclave_shared::errors::ConclaveError::Internal(format!(
                "unrecognized progress phase '{other}' in durable tier"
            )))
        }
    })
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    task_id: Uuid,
    stage: String,
    phase: String,
    message: String,
    payload: Option<serde_json::Value>,
    occurred_at: DateTime<Utc>,
}

impl ProgressRow {
    fn into_event(self) -> ConclaveResult<ProgressEvent> {
        Ok(ProgressEvent {
            task_id: self.task_id,
            stage: self.stage,
            phase: phase_from_str(&self.phase)?,
            message: self.message,
            timestamp: self.occurred_at,
            payload: self.payload,
        })
    }
}
