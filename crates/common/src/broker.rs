//! Broker abstraction — publish keyed payloads to a topic and consume them
//! through a consumer-group subscription.
//!
//! Two backends exist: [`crate::streams::RedisStreamBroker`] for production
//! (durable, at-least-once) and [`InMemoryBroker`] for tests and local runs.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by broker backends.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Broker closed: {0}")]
    Closed(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),
}

/// Publishing side of a broker.
///
/// Implementations must be safe to share between workers; the call is treated
/// as an atomic black box by the pipeline.
pub trait Broker: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

impl<B: Broker> Broker for Arc<B> {
    fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send {
        (**self).publish(topic, key, payload)
    }
}

/// A record handed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Backend-specific id used for acknowledgement
    pub id: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Consuming side of a broker, bound to one topic and consumer group.
pub trait Subscription: Send {
    /// Fetch the next batch of records. May return an empty batch after a
    /// backend-specific wait.
    fn next_batch(&mut self) -> impl Future<Output = Result<Vec<Delivery>, BrokerError>> + Send;

    /// Acknowledge a record so the broker stops redelivering it.
    fn ack(&mut self, delivery: &Delivery) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// A record stored by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

type GroupKey = (String, String);

#[derive(Debug, Default)]
struct InMemoryState {
    topics: HashMap<String, Vec<Record>>,
    /// Read offset per (topic, group)
    cursors: HashMap<GroupKey, usize>,
    /// Offsets delivered to a group but not acknowledged yet
    pending: HashMap<GroupKey, BTreeSet<usize>>,
}

/// In-memory broker for testing or local pipelines.
///
/// Records are kept per topic in publish order. Subscriptions in the same
/// group share a read cursor, so each record goes to one member of the group.
/// A new subscription first replays whatever its group received but never
/// acknowledged before it subscribed, mirroring a restarted consumer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records published to `topic`, oldest first.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state.topics.get(topic).cloned().unwrap_or_default()
    }

    /// Subscribe to `topic` as a member of `group`.
    pub async fn subscribe(&self, topic: &str, group: &str) -> InMemorySubscription {
        let group_key = (topic.to_string(), group.to_string());
        let replay: VecDeque<usize> = {
            let state = self.state.lock().await;
            state
                .pending
                .get(&group_key)
                .map(|offsets| offsets.iter().copied().collect())
                .unwrap_or_default()
        };

        InMemorySubscription {
            state: Arc::clone(&self.state),
            group_key,
            replay,
            batch_size: 16,
            idle_wait: Duration::from_millis(20),
        }
    }
}

impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.topics.entry(topic.to_string()).or_default().push(Record {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        });
        tracing::debug!(topic, key, "Record appended to in-memory topic");
        Ok(())
    }
}

/// Subscription handed out by [`InMemoryBroker::subscribe`].
#[derive(Debug)]
pub struct InMemorySubscription {
    state: Arc<Mutex<InMemoryState>>,
    group_key: GroupKey,
    /// Unacknowledged offsets to hand out before reading new records
    replay: VecDeque<usize>,
    batch_size: usize,
    idle_wait: Duration,
}

impl InMemorySubscription {
    /// Pause used when no record is available.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }
}

impl Subscription for InMemorySubscription {
    async fn next_batch(&mut self) -> Result<Vec<Delivery>, BrokerError> {
        let batch = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let records = state
                .topics
                .get(&self.group_key.0)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let pending = state.pending.entry(self.group_key.clone()).or_default();

            let offsets: Vec<usize> = if self.replay.is_empty() {
                let cursor = state.cursors.entry(self.group_key.clone()).or_default();
                let end = records.len().min(*cursor + self.batch_size);
                let fresh = (*cursor..end).collect();
                *cursor = end;
                fresh
            } else {
                let take = self.replay.len().min(self.batch_size);
                self.replay
                    .drain(..take)
                    // Acknowledged by another member in the meantime
                    .filter(|offset| pending.contains(offset))
                    .collect()
            };

            offsets
                .into_iter()
                .map(|offset| {
                    pending.insert(offset);
                    let record = &records[offset];
                    Delivery {
                        id: offset.to_string(),
                        key: Some(record.key.clone()),
                        payload: record.payload.clone(),
                    }
                })
                .collect::<Vec<_>>()
        };

        if batch.is_empty() {
            tokio::time::sleep(self.idle_wait).await;
        }
        Ok(batch)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let offset: usize = delivery.id.parse().map_err(|_| {
            BrokerError::Rejected(format!("unknown delivery id {}", delivery.id))
        })?;
        let mut state = self.state.lock().await;
        if let Some(pending) = state.pending.get_mut(&self.group_key) {
            pending.remove(&offset);
        }
        Ok(())
    }
}
