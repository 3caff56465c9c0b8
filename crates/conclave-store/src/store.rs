use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conclave_shared::domain::{AgentAnalytics, RetrievalHit, Task, TaskAnalytics, TaskResponse, TaskStatus};
use conclave_shared::errors::{ConclaveError, ConclaveResult};
use dashmap::DashMap;
use moka::future::Cache;
use sqlx::PgPool;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Two-tier task state store (§4.D `Store`).
///
/// `create`, `mutate`, and `archive` always write the durable tier first;
/// the fast tier is a read-through cache populated on the way back out, so
/// a crash between the two writes never leaves the durable record behind.
#[derive(Clone)]
pub struct TaskStore {
    fast: Cache<Uuid, Task>,
    pool: PgPool,
    // Per-task lease standing in for optimistic CAS: a single coordinator
    // process owns all mutation for a task, so a keyed async mutex gives
    // the same linearizability guarantee without a version column.
    locks: Arc<DashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl TaskStore {
    pub fn new(pool: PgPool, ttl_seconds: u64) -> Self {
        let fast = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        Self {
            fast,
            pool,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, task_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Insert a brand-new task. Fails with [`ConclaveError::AlreadyExists`]
    /// if `task_id` collides (should never happen with `Uuid::now_v7`, but
    /// redelivered create requests must not silently overwrite history).
    pub async fn create(&self, task: &Task) -> ConclaveResult<()> {
        let result = sqlx::query(
            "INSERT INTO conclave.tasks
                (task_id, user_id, query, template_name, plan, completed_stages,
                 current_stage, status, context, retrieval_hits, response, error,
                 started_at, updated_at, ttl_hint_seconds)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(task.task_id)
        .bind(&task.user_id)
        .bind(&task.query)
        .bind(&task.template_name)
        .bind(serde_json::to_value(&task.plan)?)
        .bind(serde_json::to_value(&task.completed_stages)?)
        .bind(&task.current_stage)
        .bind(status_str(task.status))
        .bind(&task.context)
        .bind(serde_json::to_value(&task.retrieval_hits)?)
        .bind(task.response.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.started_at)
        .bind(task.updated_at)
        .bind(task.ttl_hint_seconds as i64)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db)) = &result {
            if db.is_unique_violation() {
                return Err(ConclaveError::AlreadyExists(task.task_id.to_string()));
            }
        }
        result?;

        self.fast.insert(task.task_id, task.clone()).await;
        Ok(())
    }

    /// Read-through lookup: fast tier first, falling back to the durable
    /// archive and repopulating the fast tier on a miss.
    pub async fn get(&self, task_id: Uuid) -> ConclaveResult<Option<Task>> {
        if let Some(task) = self.fast.get(&task_id).await {
            return Ok(Some(task));
        }

        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT task_id, user_id, query, template_name, plan, completed_stages,
                    current_stage, status, context, retrieval_hits, response, error,
                    started_at, updated_at, ttl_hint_seconds
             FROM conclave.tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let task = row.into_task()?;
                self.fast.insert(task_id, task.clone()).await;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Apply `transform` to the current task record under a per-task lease,
    /// persist the result to the durable tier, then refresh the fast tier.
    /// `transform` may run its invariant checks itself; `mutate` re-checks
    /// afterward regardless, so a careless caller cannot corrupt state.
    pub async fn mutate<F>(&self, task_id: Uuid, transform: F) -> ConclaveResult<Task>
    where
        F: FnOnce(&mut Task) -> ConclaveResult<()>,
    {
        let lease = self.lock_for(task_id);
        let _guard = lease.lock().await;

        let mut task = self
            .get(task_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(task_id.to_string()))?;

        transform(&mut task)?;
        task.check_invariants()?;

        self.persist(&task).await?;
        self.fast.insert(task_id, task.clone()).await;
        Ok(task)
    }

    async fn persist(&self, task: &Task) -> ConclaveResult<()> {
        sqlx::query(
            "UPDATE conclave.tasks
                SET plan = $2, completed_stages = $3, current_stage = $4, status = $5,
                    context = $6, retrieval_hits = $7, response = $8, error = $9,
                    updated_at = $10
              WHERE task_id = $1",
        )
        .bind(task.task_id)
        .bind(serde_json::to_value(&task.plan)?)
        .bind(serde_json::to_value(&task.completed_stages)?)
        .bind(&task.current_stage)
        .bind(status_str(task.status))
        .bind(&task.context)
        .bind(serde_json::to_value(&task.retrieval_hits)?)
        .bind(task.response.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.error.as_ref().map(serde_json::to_value).transpose()?)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Copy a denormalized snapshot of a terminal task into the analytics
    /// archive and evict it from the fast tier immediately, instead of
    /// waiting for its TTL to lapse. Idempotent: redelivered archive
    /// requests for the same task are a no-op.
    pub async fn archive(&self, task_id: Uuid) -> ConclaveResult<()> {
        let task = self
            .get(task_id)
            .await?
            .ok_or_else(|| ConclaveError::NotFound(task_id.to_string()))?;

        if !task.is_terminal() {
            return Err(ConclaveError::Conflict {
                task_id: task_id.to_string(),
            });
        }

        let duration_ms = (task.updated_at - task.started_at).num_milliseconds();
        sqlx::query(
            "INSERT INTO conclave.task_history
                (task_id, user_id, template_name, status, stage_count, duration_ms, archived_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7)
             ON CONFLICT (task_id) DO NOTHING",
        )
        .bind(task.task_id)
        .bind(&task.user_id)
        .bind(&task.template_name)
        .bind(status_str(task.status))
        .bind(task.completed_stages.len() as i32)
        .bind(duration_ms)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.fast.invalidate(&task_id).await;
        Ok(())
    }

    /// Record one stage attempt's outcome and latency for the analytics
    /// archive (§4.E agent instrumentation, §6 `GET /analytics/agents`).
    pub async fn record_agent_performance(
        &self,
        agent_kind: &str,
        stage: &str,
        task_id: Uuid,
        outcome: &str,
        duration_ms: i64,
    ) -> ConclaveResult<()> {
        sqlx::query(
            "INSERT INTO conclave.agent_performance
                (agent_kind, stage, task_id, outcome, duration_ms, recorded_at)
             VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(agent_kind)
        .bind(stage)
        .bind(task_id)
        .bind(outcome)
        .bind(duration_ms)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Aggregate task outcomes over the trailing `window` from the archive
    /// (§6 `GET /analytics/tasks?window=`).
    pub async fn task_analytics(&self, window: Duration) -> ConclaveResult<TaskAnalytics> {
        let since = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));
        let row = sqlx::query_as::<_, TaskAnalyticsRow>(
            "SELECT
                count(*) AS total,
                count(*) FILTER (WHERE status = 'complete') AS completed,
                count(*) FILTER (WHERE status = 'failed') AS failed,
                count(*) FILTER (WHERE status = 'aborted') AS aborted,
                count(*) FILTER (WHERE status = 'timed_out') AS timed_out,
                coalesce(avg(duration_ms), 0)::float8 AS avg_duration_ms
             FROM conclave.task_history
             WHERE archived_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskAnalytics {
            window_seconds: window.as_secs() as i64,
            total: row.total,
            completed: row.completed,
            failed: row.failed,
            aborted: row.aborted,
            timed_out: row.timed_out,
            avg_duration_ms: row.avg_duration_ms,
        })
    }

    /// Per-agent-kind throughput and latency over the trailing `window`
    /// (§6 `GET /analytics/agents?window=`).
    pub async fn agent_analytics(&self, window: Duration) -> ConclaveResult<Vec<AgentAnalytics>> {
        let since = Utc::now() - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));
        let rows = sqlx::query_as::<_, AgentAnalyticsRow>(
            "SELECT
                agent_kind,
                count(*) AS processed,
                count(*) FILTER (WHERE outcome <> 'complete') AS failed,
                coalesce(avg(duration_ms), 0)::float8 AS avg_duration_ms
             FROM conclave.agent_performance
             WHERE recorded_at >= $1
             GROUP BY agent_kind
             ORDER BY agent_kind",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AgentAnalytics {
                agent_kind: r.agent_kind,
                processed: r.processed,
                failed: r.failed,
                avg_duration_ms: r.avg_duration_ms,
            })
            .collect())
    }

    /// Spawn a background task that drains moka's pending eviction queue on
    /// an interval. Eviction itself is driven by the cache's own TTL; this
    /// just keeps `entry_count`/weighted size accounting current for
    /// anything polling it (health checks, analytics).
    pub fn spawn_retention_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.fast.run_pending_tasks().await;
                tracing::debug!(entries = self.fast.entry_count(), "retention sweep");
            }
        })
    }
}

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Complete => "complete",
        TaskStatus::Failed => "failed",
        TaskStatus::Aborted => "aborted",
        TaskStatus::TimedOut => "timed_out",
    }
}

fn status_from_str(value: &str) -> ConclaveResult<TaskStatus> {
    Ok(match value {
        "pending" => TaskStatus::Pending,
        "in_progress" => TaskStatus::InProgress,
        "complete" => TaskStatus::Complete,
        "failed" => TaskStatus::Failed,
        "aborted" => TaskStatus::Aborted,
        "timed_out" => TaskStatus::TimedOut,
        other => {
            return Err(ConclaveError::Internal(format!(
                "unrecognized task status '{other}' in durable tier"
            )))
        }
    })
}

#[derive(sqlx::FromRow)]
struct TaskAnalyticsRow {
    total: i64,
    completed: i64,
    failed: i64,
    aborted: i64,
    timed_out: i64,
    avg_duration_ms: f64,
}

#[derive(sqlx::FromRow)]
struct AgentAnalyticsRow {
    agent_kind: String,
    processed: i64,
    failed: i64,
    avg_duration_ms: f64,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: Uuid,
    user_id: String,
    query: String,
    template_name: String,
    plan: serde_json::Value,
    completed_stages: serde_json::Value,
    current_stage: Option<String>,
    status: String,
    context: serde_json::Value,
    retrieval_hits: serde_json::Value,
    response: Option<serde_json::Value>,
    error: Option<serde_json::Value>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    ttl_hint_seconds: i64,
}

impl TaskRow {
    fn into_task(self) -> ConclaveResult<Task> {
        let plan: Vec<String> = serde_json::from_value(self.plan)?;
        let completed_stages: Vec<String> = serde_json::from_value(self.completed_stages)?;
        let retrieval_hits: Vec<RetrievalHit> = serde_json::from_value(self.retrieval_hits)?;
        let response: Option<TaskResponse> = self.response.map(serde_json::from_value).transpose()?;
        let error = self.error.map(serde_json::from_value).transpose()?;

        Ok(Task {
            task_id: self.task_id,
            user_id: self.user_id,
            query: self.query,
            template_name: self.template_name,
            plan,
            completed_stages,
            current_stage: self.current_stage,
            status: status_from_str(&self.status)?,
            context: self.context,
            retrieval_hits,
            response,
            error,
            started_at: self.started_at,
            updated_at: self.updated_at,
            ttl_hint_seconds: self.ttl_hint_seconds as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_its_string_form() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Complete,
            TaskStatus::Failed,
            TaskStatus::Aborted,
            TaskStatus::TimedOut,
        ] {
            let s = status_str(status);
            assert_eq!(status_from_str(s).unwrap(), status);
        }
    }

    #[test]
    fn unrecognized_status_string_is_an_internal_error() {
        assert!(status_from_str("bogus").is_err());
    }
}
