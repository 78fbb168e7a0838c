//! Notification workers.
//!
//! Consumes the notification stream and delivers each message through a
//! [`processor::NotificationProcessor`]:
//! - Bounded retry with fixed backoff ([`retry`])
//! - Dead-letter queue for permanently failed notifications ([`dlq`])
//! - Per-message pipeline that never fails its caller ([`listener`])
//! - Worker loop bound to a broker subscription ([`consumer`])

pub mod consumer;
pub mod dlq;
pub mod listener;
pub mod processor;
pub mod retry;
