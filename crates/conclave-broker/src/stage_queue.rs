use std::sync::Arc;
use std::time::Instant;

use conclave_shared::domain::StageMessage;
use conclave_shared::errors::{ConclaveError, ConclaveResult};
use conclave_shared::resilience::{CircuitBreaker, CircuitBreakerBehavior, CircuitBreakerConfig};
use pgmq::{Message, PGMQueue};

/// A message pulled off a stage queue, carrying the PGMQ handle needed to
/// ack (`delete`) or let it lapse back to visible (nack, by doing nothing).
#[derive(Debug, Clone)]
pub struct StageEnvelope {
    pub msg_id: i64,
    pub read_count: i32,
    pub message: StageMessage,
}

/// Durable per-stage dispatch queue (§4.B "stage queues"). One PGMQ queue
/// per plan stage name; queues are created lazily on first publish.
pub struct StageQueue {
    client: PGMQueue,
    breaker: Arc<CircuitBreaker>,
    visibility_timeout_seconds: i32,
}

impl StageQueue {
    pub async fn connect(database_url: &str) -> ConclaveResult<Self> {
        let client = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            breaker: Arc::new(CircuitBreaker::new("pgmq-stage-queue", CircuitBreakerConfig::default())),
            visibility_timeout_seconds: 30,
        })
    }

    fn queue_name(stage: &str) -> String {
        format!("conclave_stage_{stage}")
    }

    /// Create the underlying PGMQ queue if it doesn't exist. Idempotent;
    /// PGMQ's `create` is itself a no-op on an existing queue.
    pub async fn ensure_queue(&self, stage: &str) -> ConclaveResult<()> {
        self.guarded(|| async {
            self.client
                .create(&Self::queue_name(stage))
                .await
                .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))
        })
        .await
    }

    pub async fn publish(&self, stage: &str, message: &StageMessage) -> ConclaveResult<i64> {
        self.guarded(|| async {
            self.client
                .send(&Self::queue_name(stage), message)
                .await
                .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))
        })
        .await
    }

    /// Pull up to `limit` messages, each invisible to other consumers for
    /// the queue's visibility timeout. Redelivery on a missed ack is PGMQ's
    /// native retry mechanism — no separate dead-letter bookkeeping needed
    /// for the bounded retry count the coordinator enforces itself (§6
    /// `max_stage_retries`).
    pub async fn consume(&self, stage: &str, limit: i32) -> ConclaveResult<Vec<StageEnvelope>> {
        let messages: Option<Vec<Message<StageMessage>>> = self
            .guarded(|| async {
                self.client
                    .read_batch::<StageMessage>(
                        &Self::queue_name(stage),
                        Some(self.visibility_timeout_seconds),
                        limit,
                    )
                    .await
                    .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))
            })
            .await?;

        Ok(messages
            .unwrap_or_default()
            .into_iter()
            .map(|m| StageEnvelope {
                msg_id: m.msg_id,
                read_count: m.read_ct,
                message: m.message,
            })
            .collect())
    }

    /// Acknowledge successful stage completion: removes the message so it
    /// is never redelivered.
    pub async fn ack(&self, stage: &str, msg_id: i64) -> ConclaveResult<()> {
        self.guarded(|| async {
            self.client
                .delete(&Self::queue_name(stage), msg_id)
                .await
                .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))
        })
        .await
    }

    /// Explicit nack: let the visibility timeout lapse immediately by
    /// deleting and re-sending is wasteful, so a nack is simply "do
    /// nothing" — PGMQ makes the message visible again once its VT
    /// expires. Exposed as a named operation so call sites document intent.
    pub fn nack(&self, stage: &str, msg_id: i64) {
        tracing::debug!(stage, msg_id, "stage message left for redelivery");
    }

    async fn guarded<T, F, Fut>(&self, op: F) -> ConclaveResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ConclaveResult<T>>,
    {
        if !self.breaker.should_allow() {
            return Err(ConclaveError::BrokerUnavailable(format!(
                "circuit breaker '{}' is open",
                self.breaker.name()
            )));
        }
        let started = Instant::now();
        let result = op().await;
        match &result {
            Ok(_) => self.breaker.record_success(started.elapsed()),
            Err(_) => self.breaker.record_failure(started.elapsed()),
        }
        result
    }
}

impl std::fmt::Debug for StageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageQueue")
            .field("breaker_state", &self.breaker.state())
            .finish()
    }
}
