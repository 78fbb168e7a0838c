//! Channel-backed notification publisher.
//!
//! [`NotificationPublisher`] is a cheap, cloneable handle in front of a single
//! background task that owns the broker. Enqueueing never waits on the
//! broker: callers get a [`PublishHandle`] straight away and may await its
//! completion when they care about the outcome.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use courier_common::broker::{Broker, BrokerError};
use courier_common::error::AppError;
use courier_common::types::NotificationMessage;

use crate::email::EmailNotificationRequest;

/// Default queue depth between request handlers and the publish task.
pub const DEFAULT_CAPACITY: usize = 1024;

struct PublishRequest {
    key: String,
    payload: Vec<u8>,
    done: oneshot::Sender<Result<(), BrokerError>>,
}

/// Receipt for an enqueued notification.
#[derive(Debug)]
pub struct PublishHandle {
    pub id: String,
    pub accepted_at: DateTime<Utc>,
    completion: oneshot::Receiver<Result<(), BrokerError>>,
}

impl PublishHandle {
    /// Wait for the broker to confirm (or refuse) the publish.
    pub async fn completed(self) -> Result<(), BrokerError> {
        match self.completion.await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Closed(
                "publish task stopped before completing the request".to_string(),
            )),
        }
    }
}

/// Handle used by request handlers to publish notifications.
#[derive(Clone)]
pub struct NotificationPublisher {
    tx: mpsc::Sender<PublishRequest>,
    topic: String,
}

impl NotificationPublisher {
    /// Start the publish task for `topic` on `broker`.
    ///
    /// The task runs until every clone of the returned publisher is dropped.
    pub fn spawn<B>(broker: B, topic: impl Into<String>, capacity: usize) -> (Self, JoinHandle<()>)
    where
        B: Broker + 'static,
    {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_publish_task(broker, topic.clone(), rx));
        (Self { tx, topic }, task)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Validate and enqueue an e-mail notification.
    pub fn publish_email(&self, request: &EmailNotificationRequest) -> Result<PublishHandle, AppError> {
        request.validate()?;
        self.publish(request.to_message())
    }

    /// Enqueue `message`, keyed by its id.
    ///
    /// Fails fast when the queue is full or the publish task is gone.
    pub fn publish(&self, message: NotificationMessage) -> Result<PublishHandle, AppError> {
        let id = message
            .key()
            .ok_or_else(|| AppError::Validation("notification id is required".to_string()))?
            .to_string();
        let payload = serde_json::to_vec(&message)?;
        let (done, completion) = oneshot::channel();

        let request = PublishRequest {
            key: id.clone(),
            payload,
            done,
        };

        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::Broker(BrokerError::Rejected("publish queue is full".to_string()))
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::Broker(BrokerError::Closed("publish task is not running".to_string()))
            }
        })?;

        tracing::debug!(message_id = %id, topic = %self.topic, "Notification enqueued");

        Ok(PublishHandle {
            id,
            accepted_at: message.created_at.unwrap_or_else(Utc::now),
            completion,
        })
    }
}

async fn run_publish_task<B: Broker>(
    broker: B,
    topic: String,
    mut rx: mpsc::Receiver<PublishRequest>,
) {
    tracing::info!(topic = %topic, "Publish task started");

    while let Some(request) = rx.recv().await {
        let result = broker.publish(&topic, &request.key, request.payload).await;

        match &result {
            Ok(()) => tracing::info!(
                message_id = %request.key,
                topic = %topic,
                "Published notification"
            ),
            Err(e) => tracing::error!(
                message_id = %request.key,
                topic = %topic,
                error = %e,
                "Failed to publish notification"
            ),
        }

        // Caller may have stopped listening
        let _ = request.done.send(result);
    }

    tracing::info!(topic = %topic, "Publish task stopped");
}
