//! Integration tests for the Redis Streams broker.
//!
//! Requires a running Redis server.
//!
//! ```bash
//! REDIS_URL="redis://localhost:6379" \
//!   cargo test -p courier-common --test redis_streams -- --ignored --nocapture
//! ```

use courier_common::broker::{Broker, Subscription};
use courier_common::streams::RedisStreamBroker;
use uuid::Uuid;

async fn broker() -> RedisStreamBroker {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisStreamBroker::connect(&url).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn test_publish_then_consume_round_trip() {
    let broker = broker().await;
    let topic = format!("test.stream.{}", Uuid::new_v4());

    broker
        .publish(&topic, "key-1", br#"{"id":"key-1"}"#.to_vec())
        .await
        .unwrap();

    let mut sub = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap()
        .with_block_ms(100);

    // First call drains the (empty) pending list
    let mut deliveries = sub.next_batch().await.unwrap();
    if deliveries.is_empty() {
        deliveries = sub.next_batch().await.unwrap();
    }

    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].key.as_deref(), Some("key-1"));
    assert_eq!(deliveries[0].payload, br#"{"id":"key-1"}"#);

    sub.ack(&deliveries[0]).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_unacked_entry_is_redelivered_to_same_consumer() {
    let broker = broker().await;
    let topic = format!("test.stream.{}", Uuid::new_v4());

    broker.publish(&topic, "k", b"payload".to_vec()).await.unwrap();

    let mut sub = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap()
        .with_block_ms(100);
    let _ = sub.next_batch().await.unwrap();
    let first = sub.next_batch().await.unwrap();
    assert_eq!(first.len(), 1);

    // Simulate a restart without acknowledgement
    let mut restarted = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap();
    let replayed = restarted.next_batch().await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].id, first[0].id);
}

#[tokio::test]
#[ignore]
async fn test_pending_entries_replayed_once_without_ack() {
    let broker = broker().await;
    let topic = format!("test.stream.{}", Uuid::new_v4());

    broker.publish(&topic, "a", b"one".to_vec()).await.unwrap();
    broker.publish(&topic, "b", b"two".to_vec()).await.unwrap();

    let mut sub = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap()
        .with_block_ms(100);
    let _ = sub.next_batch().await.unwrap();
    assert_eq!(sub.next_batch().await.unwrap().len(), 2);

    // Restart; acks never happen, so both entries stay pending
    let mut restarted = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap()
        .with_block_ms(100);
    assert_eq!(restarted.next_batch().await.unwrap().len(), 2);
    assert!(restarted.next_batch().await.unwrap().is_empty());
    assert!(restarted.next_batch().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_blocking_read_does_not_delay_publish() {
    let broker = broker().await;
    let topic = format!("test.stream.{}", Uuid::new_v4());

    let mut idle = broker
        .subscribe(&topic, "test-group", "worker-0")
        .await
        .unwrap()
        .with_block_ms(3000);
    let _ = idle.next_batch().await.unwrap();
    let reader = tokio::spawn(async move { idle.next_batch().await });

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let started = std::time::Instant::now();
    broker.publish(&topic, "k", b"x".to_vec()).await.unwrap();
    assert!(started.elapsed() < std::time::Duration::from_millis(1000));

    let delivered = reader.await.unwrap().unwrap();
    assert_eq!(delivered.len(), 1);
}
