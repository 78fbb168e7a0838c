//! Processing capabilities — the business step that actually delivers a
//! notification.
//!
//! The pipeline only sees [`NotificationProcessor::process`] and the error
//! kind it returns. Two implementations ship with the notifier:
//! - [`LoggingProcessor`]: logs the notification (and simulates a failure
//!   for subjects containing "fail", to exercise retry and dead-lettering)
//! - [`WebhookProcessor`]: POSTs the notification as JSON to an HTTP endpoint

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use courier_common::types::NotificationMessage;

use crate::retry::Retryable;

/// Failure reported by a processor.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Temporary failure; the message may succeed on a later attempt.
    #[error("{0}")]
    Transient(String),

    /// The message can never be delivered as-is.
    #[error("{0}")]
    Rejected(String),

    #[error("Delivery request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProcessingError {
    /// Stable name of the error kind, used when the message is empty.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::Transient(_) => "TransientProcessingError",
            ProcessingError::Rejected(_) => "RejectedProcessingError",
            ProcessingError::Http(_) => "HttpDeliveryError",
        }
    }

    /// The error message, or the kind name if the message is blank.
    pub fn detail(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            self.kind().to_string()
        } else {
            message
        }
    }
}

impl Retryable for ProcessingError {
    fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::Transient(_) => true,
            ProcessingError::Rejected(_) => false,
            // Connection errors and timeouts carry no status
            ProcessingError::Http(e) => e
                .status()
                .is_none_or(|s| s.is_server_error() || s.as_u16() == 429),
        }
    }
}

/// Business processing step invoked once per attempt.
pub trait NotificationProcessor: Send + Sync {
    fn process(
        &self,
        message: &NotificationMessage,
    ) -> impl Future<Output = Result<(), ProcessingError>> + Send;
}

/// Processor that only logs notifications.
#[derive(Debug, Clone, Default)]
pub struct LoggingProcessor;

impl LoggingProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationProcessor for LoggingProcessor {
    async fn process(&self, message: &NotificationMessage) -> Result<(), ProcessingError> {
        let should_fail = message
            .subject
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains("fail"));
        if should_fail {
            return Err(ProcessingError::Transient(
                "Simulated processing failure".to_string(),
            ));
        }

        tracing::info!(
            message_id = message.display_id(),
            kind = message.kind.as_deref().unwrap_or("null"),
            to = message.to.as_deref().unwrap_or("null"),
            "Notification processed"
        );
        Ok(())
    }
}

/// Processor that delivers notifications to an HTTP webhook.
///
/// Transport errors, 5xx and 429 responses are retryable; any other non-2xx
/// status rejects the message.
#[derive(Debug, Clone)]
pub struct WebhookProcessor {
    client: reqwest::Client,
    url: String,
}

impl WebhookProcessor {
    /// Default per-request timeout.
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl NotificationProcessor for WebhookProcessor {
    async fn process(&self, message: &NotificationMessage) -> Result<(), ProcessingError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();

        if status.is_success() {
            tracing::info!(
                message_id = message.display_id(),
                status = status.as_u16(),
                "Notification delivered to webhook"
            );
            return Ok(());
        }

        // error_for_status keeps the status so retryability can be decided
        Err(response
            .error_for_status()
            .err()
            .map(ProcessingError::Http)
            .unwrap_or_else(|| {
                ProcessingError::Rejected(format!("Webhook answered with status {status}"))
            }))
    }
}
