//! Courier notifier binary entrypoint.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use courier_common::config::AppConfig;
use courier_common::streams::RedisStreamBroker;
use courier_notifier::consumer::run_consumer;
use courier_notifier::dlq::DeadLetterQueue;
use courier_notifier::listener::NotificationListener;
use courier_notifier::processor::{LoggingProcessor, NotificationProcessor, WebhookProcessor};
use courier_notifier::retry::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_notifier=info,courier_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier notifier starting...");

    let config = AppConfig::from_env()?;

    let broker = RedisStreamBroker::connect(&config.redis_url).await?;

    match config.webhook_url.clone() {
        Some(url) => {
            tracing::info!(url = %url, "Delivering notifications to webhook");
            run(config, broker, WebhookProcessor::new(url)?).await
        }
        None => {
            tracing::info!("No WEBHOOK_URL configured, notifications will only be logged");
            run(config, broker, LoggingProcessor::new()).await
        }
    }
}

async fn run<P>(config: AppConfig, broker: RedisStreamBroker, processor: P) -> anyhow::Result<()>
where
    P: NotificationProcessor + 'static,
{
    let policy = RetryPolicy::from_config(&config)?;
    let shutdown = CancellationToken::new();

    let listener = Arc::new(
        NotificationListener::new(
            Arc::new(processor),
            DeadLetterQueue::new(broker.clone(), config.dlq_topic.clone()),
            policy,
        )
        .with_shutdown(shutdown.clone()),
    );

    tracing::info!(
        topic = %config.notification_topic,
        dlq_topic = %config.dlq_topic,
        group = %config.consumer_group,
        workers = config.consumer_workers,
        max_attempts = policy.max_attempts(),
        backoff_ms = config.retry_backoff_ms,
        "Starting consumer workers"
    );

    let mut workers = JoinSet::new();
    for i in 0..config.consumer_workers {
        let name = format!("{}-{}", config.consumer_name, i);
        let subscription = broker
            .subscribe(&config.notification_topic, &config.consumer_group, &name)
            .await?;
        let listener = Arc::clone(&listener);
        let cancel = shutdown.clone();
        workers.spawn(async move { run_consumer(&name, subscription, listener, cancel).await });
    }

    // Run with graceful shutdown on Ctrl+C
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");
    shutdown.cancel();

    let mut handled = 0;
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(stats) => handled += stats.handled(),
            Err(e) => tracing::error!(error = %e, "Consumer worker panicked"),
        }
    }

    tracing::info!(handled, "Courier notifier stopped.");
    Ok(())
}
