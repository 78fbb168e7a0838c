//! Per-message consumption pipeline.
//!
//! `Received → Deserialized → Processing → {Succeeded | DeadLettered}`
//!
//! 1. Parse the raw payload. An unparseable payload goes straight to the DLQ
//!    as an `UNKNOWN` placeholder carrying the raw bytes in `body`.
//! 2. Run the processor under the retry policy.
//! 3. On success, done. On any terminal retry failure, dead-letter the parsed
//!    message with a reason describing the failure.
//!
//! Exactly one terminal state is reached per message and nothing is ever
//! raised to the caller, so one bad message cannot stop the consumer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use courier_common::broker::Broker;
use courier_common::types::NotificationMessage;

use crate::dlq::DeadLetterQueue;
use crate::processor::{NotificationProcessor, ProcessingError};
use crate::retry::{RetryError, RetryExecutor, RetryPolicy};

/// Terminal state of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Processing succeeded on the given attempt.
    Succeeded { attempts: u32 },
    /// The message was handed to the dead-letter queue.
    DeadLettered { reason: String },
}

impl MessageOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, MessageOutcome::Succeeded { .. })
    }
}

/// Consumption pipeline for the notification topic.
pub struct NotificationListener<P, B> {
    processor: Arc<P>,
    dlq: DeadLetterQueue<B>,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl<P, B> NotificationListener<P, B>
where
    P: NotificationProcessor,
    B: Broker,
{
    pub fn new(processor: Arc<P>, dlq: DeadLetterQueue<B>, policy: RetryPolicy) -> Self {
        Self {
            processor,
            dlq,
            policy,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort pending retries when `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Handle one raw payload end-to-end.
    pub async fn on_message(&self, payload: &[u8]) -> MessageOutcome {
        let message: NotificationMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                let reason = format!("Invalid payload: {e}");
                tracing::error!(error = %e, "Invalid payload received");
                self.dlq
                    .send(NotificationMessage::unparseable(payload), &reason)
                    .await;
                return MessageOutcome::DeadLettered { reason };
            }
        };

        tracing::info!(
            message_id = message.display_id(),
            kind = message.kind.as_deref().unwrap_or("null"),
            to = message.to.as_deref().unwrap_or("null"),
            "Received message"
        );

        let operation = format!("process-notification id={}", message.display_id());
        let result = RetryExecutor::run(&operation, &self.policy, &self.shutdown, || {
            self.processor.process(&message)
        })
        .await;

        match result {
            Ok(attempts) => {
                tracing::info!(
                    message_id = message.display_id(),
                    attempts,
                    "Successfully processed message"
                );
                MessageOutcome::Succeeded { attempts }
            }
            Err(err) => {
                let reason = self.failure_reason(&err);
                tracing::error!(
                    message_id = message.display_id(),
                    attempts = err.attempts(),
                    reason = %reason,
                    "Processing failed permanently"
                );
                self.dlq.send(message, &reason).await;
                MessageOutcome::DeadLettered { reason }
            }
        }
    }

    fn failure_reason(&self, err: &RetryError<ProcessingError>) -> String {
        let detail = err.last().detail();
        match err {
            RetryError::Exhausted { .. } => format!(
                "Permanent failure after {} attempts: {}",
                self.policy.max_attempts(),
                detail
            ),
            RetryError::NonRetryable { attempt, .. } => {
                format!("Non-retryable failure on attempt {attempt}: {detail}")
            }
            RetryError::Cancelled { attempts, .. } => {
                format!("Processing cancelled after {attempts} attempts: {detail}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use courier_common::broker::InMemoryBroker;
    use courier_common::types::DeadLetterEnvelope;

    use super::*;

    const DLQ_TOPIC: &str = "notifications.email.dlq";

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyProcessor {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> ProcessingError,
    }

    impl FlakyProcessor {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error: || ProcessingError::Transient("processing failed".to_string()),
            }
        }

        fn always_failing() -> Self {
            Self::new(u32::MAX)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl NotificationProcessor for FlakyProcessor {
        async fn process(&self, _message: &NotificationMessage) -> Result<(), ProcessingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(())
            }
        }
    }

    fn listener(
        processor: Arc<FlakyProcessor>,
        broker: &InMemoryBroker,
        max_attempts: u32,
    ) -> NotificationListener<FlakyProcessor, InMemoryBroker> {
        NotificationListener::new(
            processor,
            DeadLetterQueue::new(broker.clone(), DLQ_TOPIC),
            RetryPolicy::new(max_attempts, Duration::ZERO).unwrap(),
        )
    }

    fn payload(message: &NotificationMessage) -> Vec<u8> {
        serde_json::to_vec(message).unwrap()
    }

    async fn dead_letters(broker: &InMemoryBroker) -> Vec<(String, DeadLetterEnvelope)> {
        broker
            .records(DLQ_TOPIC)
            .await
            .into_iter()
            .map(|r| (r.key, serde_json::from_slice(&r.payload).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_valid_message_is_processed() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::new(0));
        let listener = listener(processor.clone(), &broker, 3);
        let message = NotificationMessage::email("test@mail.com", "Hello", "Body content");

        let outcome = listener.on_message(&payload(&message)).await;

        assert_eq!(outcome, MessageOutcome::Succeeded { attempts: 1 });
        assert_eq!(processor.calls(), 1);
        assert!(dead_letters(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_payload_is_dead_lettered_without_processing() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::new(0));
        let listener = listener(processor.clone(), &broker, 3);
        let invalid = "{ invalid-json }";

        let outcome = listener.on_message(invalid.as_bytes()).await;

        assert_eq!(processor.calls(), 0);
        let MessageOutcome::DeadLettered { reason } = outcome else {
            panic!("expected dead-lettering, got {outcome:?}");
        };
        assert!(reason.starts_with("Invalid payload:"));

        let letters = dead_letters(&broker).await;
        assert_eq!(letters.len(), 1);
        let (key, envelope) = &letters[0];
        assert_eq!(envelope.message.kind.as_deref(), Some("UNKNOWN"));
        assert_eq!(envelope.message.body.as_deref(), Some(invalid));
        assert!(envelope.reason.starts_with("Invalid payload:"));
        assert!(!key.trim().is_empty());
    }

    #[tokio::test]
    async fn test_non_object_payload_is_dead_lettered() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::new(0));
        let listener = listener(processor.clone(), &broker, 3);

        let outcome = listener.on_message(b"42").await;

        assert!(!outcome.is_succeeded());
        assert_eq!(processor.calls(), 0);
        assert_eq!(dead_letters(&broker).await[0].1.message.body.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_with_context() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::always_failing());
        let listener = listener(processor.clone(), &broker, 3);
        let message = NotificationMessage::email("test@mail.com", "Hello", "Body content");

        let outcome = listener.on_message(&payload(&message)).await;

        assert_eq!(processor.calls(), 3);
        let letters = dead_letters(&broker).await;
        assert_eq!(letters.len(), 1);
        let (key, envelope) = &letters[0];
        assert!(envelope.reason.contains("Permanent failure after 3 attempts"));
        assert!(envelope.reason.contains("processing failed"));
        assert_eq!(envelope.message.id, message.id);
        assert_eq!(Some(key.as_str()), message.id.as_deref());
        assert_eq!(
            outcome,
            MessageOutcome::DeadLettered {
                reason: envelope.reason.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_recovery_within_budget_skips_dlq() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::new(2));
        let listener = listener(processor.clone(), &broker, 3);
        let message = NotificationMessage::email("test@mail.com", "Hello", "Body content");

        let outcome = listener.on_message(&payload(&message)).await;

        assert_eq!(outcome, MessageOutcome::Succeeded { attempts: 3 });
        assert_eq!(processor.calls(), 3);
        assert!(dead_letters(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn test_null_id_uses_fallback_key() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::always_failing());
        let listener = listener(processor, &broker, 2);
        let message = NotificationMessage {
            id: None,
            ..NotificationMessage::email("test@mail.com", "Hello", "Body")
        };

        listener.on_message(&payload(&message)).await;

        let letters = dead_letters(&broker).await;
        let (key, envelope) = &letters[0];
        assert!(!key.trim().is_empty());
        assert_eq!(key, &envelope.id);
        assert!(envelope.message.id.is_none());
    }

    #[tokio::test]
    async fn test_empty_error_message_reports_kind() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor {
            error: || ProcessingError::Transient(String::new()),
            ..FlakyProcessor::always_failing()
        });
        let listener = listener(processor, &broker, 1);
        let message = NotificationMessage::email("test@mail.com", "Hello", "Body");

        listener.on_message(&payload(&message)).await;

        let letters = dead_letters(&broker).await;
        assert_eq!(
            letters[0].1.reason,
            "Permanent failure after 1 attempts: TransientProcessingError"
        );
    }

    #[tokio::test]
    async fn test_rejected_message_is_dead_lettered_after_one_attempt() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor {
            error: || ProcessingError::Rejected("mailbox does not exist".to_string()),
            ..FlakyProcessor::always_failing()
        });
        let listener = listener(processor.clone(), &broker, 5);
        let message = NotificationMessage::email("test@mail.com", "Hello", "Body");

        listener.on_message(&payload(&message)).await;

        assert_eq!(processor.calls(), 1);
        let letters = dead_letters(&broker).await;
        assert_eq!(
            letters[0].1.reason,
            "Non-retryable failure on attempt 1: mailbox does not exist"
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_dead_letters_with_cancellation_reason() {
        let broker = InMemoryBroker::new();
        let processor = Arc::new(FlakyProcessor::always_failing());
        let shutdown = CancellationToken::new();
        let listener = NotificationListener::new(
            processor.clone(),
            DeadLetterQueue::new(broker.clone(), DLQ_TOPIC),
            RetryPolicy::new(3, Duration::from_secs(60)).unwrap(),
        )
        .with_shutdown(shutdown.clone());
        shutdown.cancel();

        let message = NotificationMessage::email("test@mail.com", "Hello", "Body");
        let outcome = listener.on_message(&payload(&message)).await;

        assert_eq!(processor.calls(), 1);
        let MessageOutcome::DeadLettered { reason } = outcome else {
            panic!("expected dead-lettering");
        };
        assert!(reason.starts_with("Processing cancelled after 1 attempts"));
        assert_eq!(dead_letters(&broker).await.len(), 1);
    }
}
