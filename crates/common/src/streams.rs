//! Redis Streams broker backend (durable, at-least-once delivery).
//!
//! - Publish: `XADD <topic> * key <key> payload <bytes>`
//! - Consume: `XREADGROUP` within a consumer group, one named consumer per worker
//! - Acknowledge: `XACK` once the pipeline reached a terminal state
//!
//! On startup a subscription first replays its own pending entries (delivered
//! but never acknowledged before a crash) in a single pass, then switches to
//! new entries.
//!
//! Publishing shares one connection manager. Every subscription opens its own,
//! so a blocking `XREADGROUP` never queues other workers' commands behind it.

use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};

use crate::broker::{Broker, BrokerError, Delivery, Subscription};
use crate::redis_pool::{create_redis_pool, redacted};

/// Stream entry field holding the partition key.
const FIELD_KEY: &str = "key";

/// Stream entry field holding the raw payload.
const FIELD_PAYLOAD: &str = "payload";

/// Number of entries fetched per `XREADGROUP`.
const BATCH_SIZE: usize = 10;

/// Default blocking timeout for `XREADGROUP` in milliseconds.
const DEFAULT_BLOCK_MS: usize = 1000;

/// Redis Streams-backed broker.
#[derive(Clone)]
pub struct RedisStreamBroker {
    client: Client,
    conn: ConnectionManager,
}

impl RedisStreamBroker {
    /// Connect to `redis_url` and open the shared publishing connection.
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = Client::open(redis_url)?;
        let conn = create_redis_pool(&client).await?;
        tracing::info!(endpoint = %redacted(redis_url), "Connected to Redis");
        Ok(Self { client, conn })
    }

    /// Join `group` on `topic` as `consumer`, creating the group (and the
    /// stream) if needed. The subscription reads on a dedicated connection.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<RedisStreamSubscription, BrokerError> {
        let mut conn = self.conn.clone();

        // "0" so a freshly created group also sees entries published before it existed
        let created: redis::RedisResult<()> = conn.xgroup_create_mkstream(topic, group, "0").await;
        match created {
            Ok(()) => tracing::info!(topic, group, "Consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                tracing::debug!(topic, group, "Consumer group already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(RedisStreamSubscription {
            conn: create_redis_pool(&self.client).await?,
            stream: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            block_ms: DEFAULT_BLOCK_MS,
            pending_from: Some("0".to_string()),
        })
    }
}

impl Broker for RedisStreamBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();

        let entry_id: String = redis::cmd("XADD")
            .arg(topic)
            .arg("*")
            .arg(FIELD_KEY)
            .arg(key)
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        tracing::debug!(topic, key, entry_id = %entry_id, "Stream entry added");
        Ok(())
    }
}

/// One consumer within a Redis Streams consumer group.
pub struct RedisStreamSubscription {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    block_ms: usize,
    /// Replay this consumer's pending list after this id; `None` once the
    /// single replay pass is done
    pending_from: Option<String>,
}

impl RedisStreamSubscription {
    pub fn with_block_ms(mut self, block_ms: usize) -> Self {
        self.block_ms = block_ms;
        self
    }

    fn to_delivery(entry: StreamId) -> Delivery {
        let key: Option<String> = entry.get(FIELD_KEY);
        let payload: Vec<u8> = entry.get(FIELD_PAYLOAD).unwrap_or_else(|| {
            tracing::warn!(entry_id = %entry.id, "Stream entry has no payload field");
            Vec::new()
        });
        Delivery {
            id: entry.id,
            key,
            payload,
        }
    }
}

/// Where the pending replay continues after `batch`: past its last entry, or
/// nowhere once a read comes back empty.
fn next_pending_cursor(batch: &[Delivery]) -> Option<String> {
    batch.last().map(|delivery| delivery.id.clone())
}

impl Subscription for RedisStreamSubscription {
    async fn next_batch(&mut self) -> Result<Vec<Delivery>, BrokerError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(BATCH_SIZE);
        // An explicit id replays this consumer's pending list, ">" asks for new entries
        let start = match &self.pending_from {
            Some(id) => id.clone(),
            None => {
                opts = opts.block(self.block_ms);
                ">".to_string()
            }
        };

        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.stream], &[&start], &opts)
            .await?;

        let deliveries: Vec<Delivery> = reply
            .map(|r| r.keys)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|stream| stream.ids)
            .map(Self::to_delivery)
            .collect();

        // Each pending entry is replayed once, even if its ack keeps failing
        if self.pending_from.is_some() {
            self.pending_from = next_pending_cursor(&deliveries);
            if self.pending_from.is_none() {
                tracing::debug!(
                    stream = %self.stream,
                    consumer = %self.consumer,
                    "Pending entries drained, switching to new entries"
                );
            }
        }

        Ok(deliveries)
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let _: u64 = self
            .conn
            .xack(&self.stream, &self.group, &[&delivery.id])
            .await?;
        Ok(())
    }
}
