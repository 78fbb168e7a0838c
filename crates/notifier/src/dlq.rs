//! Dead-letter queue — best-effort forwarding of permanently failed
//! notifications.
//!
//! Every call builds exactly one [`DeadLetterEnvelope`] and makes exactly one
//! publish attempt. Retrying already happened upstream, and there is no tier
//! below this one, so failures here are logged and dropped.

use thiserror::Error;

use courier_common::broker::{Broker, BrokerError};
use courier_common::types::{DeadLetterEnvelope, NotificationMessage};

/// Failure while dead-lettering. Never escapes [`DeadLetterQueue::send`].
#[derive(Debug, Error)]
pub enum DlqError {
    #[error("Failed to serialize dead-letter envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to publish dead-letter envelope: {0}")]
    Publish(#[from] BrokerError),
}

/// Publishes failed notifications to the dead-letter topic.
pub struct DeadLetterQueue<B> {
    broker: B,
    topic: String,
}

impl<B: Broker> DeadLetterQueue<B> {
    pub fn new(broker: B, topic: impl Into<String>) -> Self {
        Self {
            broker,
            topic: topic.into(),
        }
    }

    /// Dead-letter `message` with `reason`. Never fails.
    pub async fn send(&self, message: NotificationMessage, reason: &str) {
        if let Err(e) = self.try_send(message, reason).await {
            tracing::error!(
                topic = %self.topic,
                reason,
                error = %e,
                "Dead-lettering failed, message dropped"
            );
        }
    }

    /// Fallible form of [`send`](Self::send). Returns the publish key.
    pub async fn try_send(
        &self,
        message: NotificationMessage,
        reason: &str,
    ) -> Result<String, DlqError> {
        let envelope = DeadLetterEnvelope::new(message, reason);
        let key = envelope.key().to_string();
        let payload = serde_json::to_vec(&envelope)?;

        self.broker.publish(&self.topic, &key, payload).await?;

        tracing::error!(
            topic = %self.topic,
            key = %key,
            dlq_id = %envelope.id,
            reason,
            "Sent message to DLQ"
        );
        Ok(key)
    }
}
