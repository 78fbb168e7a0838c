//! Consumer worker loop.
//!
//! Binds a broker [`Subscription`] to a [`NotificationListener`]. Records in a
//! batch are handled one after the other; each is acknowledged once the
//! listener reached a terminal state. Broker read errors are logged and the
//! loop keeps going.
//!
//! Cancellation is checked before every record. Records of the current batch
//! not yet started are left unacknowledged so the broker redelivers them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use courier_common::broker::{Broker, Subscription};

use crate::listener::{MessageOutcome, NotificationListener};
use crate::processor::NotificationProcessor;

/// Pause after a failed broker read before polling again.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub succeeded: u64,
    pub dead_lettered: u64,
    pub ack_failures: u64,
}

impl ConsumerStats {
    pub fn handled(&self) -> u64 {
        self.succeeded + self.dead_lettered
    }
}

/// Consume `subscription` until `cancel` fires.
pub async fn run_consumer<S, P, B>(
    worker: &str,
    mut subscription: S,
    listener: Arc<NotificationListener<P, B>>,
    cancel: CancellationToken,
) -> ConsumerStats
where
    S: Subscription,
    P: NotificationProcessor,
    B: Broker,
{
    let mut stats = ConsumerStats::default();
    tracing::info!(worker, "Consumer worker started");

    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = subscription.next_batch() => batch,
        };

        let deliveries = match batch {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::error!(worker, error = %e, "Failed to read from broker");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(READ_ERROR_BACKOFF) => continue,
                }
            }
        };

        let batch_len = deliveries.len();
        for (handled, delivery) in deliveries.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(
                    worker,
                    left_unacked = batch_len - handled,
                    "Shutdown requested, leaving rest of batch for redelivery"
                );
                break;
            }

            match listener.on_message(&delivery.payload).await {
                MessageOutcome::Succeeded { .. } => stats.succeeded += 1,
                MessageOutcome::DeadLettered { .. } => stats.dead_lettered += 1,
            }

            if let Err(e) = subscription.ack(&delivery).await {
                stats.ack_failures += 1;
                tracing::error!(
                    worker,
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to acknowledge delivery"
                );
            }
        }
    }

    tracing::info!(
        worker,
        succeeded = stats.succeeded,
        dead_lettered = stats.dead_lettered,
        "Consumer worker stopped"
    );
    stats
}
