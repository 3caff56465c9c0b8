use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use conclave_shared::errors::{ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;

const NOTIFY_CHANNEL: &str = "conclave_events";
const TOPIC_BUFFER_SIZE: usize = 64;

/// Payload carried over `pg_notify`, wrapping the topic so one LISTEN
/// channel can multiplex every event topic in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub topic: String,
    pub payload: serde_json::Value,
}

struct SharedListenerState {
    pool: PgPool,
    topics: Mutex<HashMap<String, broadcast::Sender<EventEnvelope>>>,
    started: AtomicBool,
}

/// Transient pub/sub for health heartbeats and stage-complete signals
/// (§4.B "event topics"), built on a single shared `PgListener` connection
/// rather than one connection per subscriber, following the teacher's
/// shared-listener design for its PGMQ notification path.
#[derive(Clone)]
pub struct EventTopic {
    inner: Arc<SharedListenerState>,
}

impl EventTopic {
    pub fn new(pool: PgPool) -> Self {
        Self {
            inner: Arc::new(SharedListenerState {
                pool,
                topics: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_started(&self) {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let state = self.inner.clone();
            tokio::spawn(async move { listener_task(state).await });
        }
    }

    /// Subscribe before publishing to avoid the lost-wakeup where a signal
    /// fires between "decide to subscribe" and "actually start listening":
    /// this creates the topic's broadcast channel up front, so the shared
    /// listener task always has somewhere to deliver a matching notification
    /// once it arrives, however soon after this call that is.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        self.ensure_started();
        let mut topics = self.inner.topics.lock().expect("event topic mutex poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER_SIZE).0)
            .subscribe()
    }

    pub async fn publish(&self, topic: &str, payload: serde_json::Value) -> ConclaveResult<()> {
        let envelope = EventEnvelope {
            topic: topic.to_string(),
            payload,
        };
        let body = serde_json::to_string(&envelope)?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(body)
            .execute(&self.inner.pool)
            .await
            .map_err(|e| ConclaveError::BrokerUnavailable(e.to_string()))?;
        Ok(())
    }
}

async fn listener_task(state: Arc<SharedListenerState>) {
    let mut listener = match PgListener::connect_with(&state.pool).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%err, "failed to start shared event listener");
            return;
        }
    };

    if let Err(err) = listener.listen(NOTIFY_CHANNEL).await {
        tracing::error!(%err, "failed to LISTEN on event channel");
        return;
    }

    loop {
        match listener.recv().await {
            Ok(notification) => match serde_json::from_str::<EventEnvelope>(notification.payload()) {
                Ok(envelope) => {
                    let topics = state.topics.lock().expect("event topic mutex poisoned");
                    if let Some(sender) = topics.get(&envelope.topic) {
                        // No subscribers is a normal outcome (nobody cares about
                        // this heartbeat right now); SendError is silently dropped.
                        let _ = sender.send(envelope);
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to parse event notification payload");
                }
            },
            Err(err) => {
                tracing::error!(%err, "shared event listener connection error");
                return;
            }
        }
    }
}
