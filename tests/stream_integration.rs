//! Stream adapter integration tests
//!
//! These tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if the server is not available. Each test
//! provisions its own memory-backed stream so runs do not interfere.

use flowmq::{
    handler_fn, ConnectionConfig, ConsumerDefaults, QueueAdapter, QueueError, QueueEventKind,
    StorageKind, StreamAdapter, StreamConfig, SubscribeOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_stream_config(suffix: &str) -> StreamConfig {
    StreamConfig {
        name: format!("FLOWMQ_TEST_{}", suffix.to_uppercase()),
        subjects: vec![format!("itest.{}.>", suffix)],
        storage: StorageKind::Memory,
        max_age_secs: 120,
        ..Default::default()
    }
}

/// Try to connect. Returns None if the server is unavailable.
async fn try_stream(suffix: &str) -> Option<StreamAdapter> {
    let adapter = StreamAdapter::new(ConnectionConfig::default(), test_stream_config(suffix));
    match adapter.connect().await {
        Ok(()) => Some(adapter),
        Err(_) => {
            eprintln!("NATS/JetStream not available, skipping integration test");
            None
        }
    }
}

macro_rules! stream {
    ($suffix:expr) => {
        match try_stream($suffix).await {
            Some(a) => a,
            None => return,
        }
    };
}

fn counting_handler(count: Arc<AtomicUsize>) -> flowmq::MessageHandler {
    handler_fn(move |_| {
        let count = count.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

async fn wait_for(count: &AtomicUsize, target: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while count.load(Ordering::SeqCst) < target && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_durable_publish_and_dispatch() {
    let adapter = stream!("pubsub");
    let count = Arc::new(AtomicUsize::new(0));

    adapter
        .subscribe(
            "itest.pubsub.orders.*",
            counting_handler(count.clone()),
            Some(SubscribeOptions {
                group: Some("pubsub-workers".to_string()),
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let id = adapter
        .publish(
            "itest.pubsub.orders.created",
            serde_json::json!({"orderId": 42}),
            None,
        )
        .await
        .unwrap();
    assert!(id.starts_with("msg-"));

    wait_for(&count, 1, Duration::from_secs(3)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_group_members_split_load() {
    let adapter = stream!("group");
    let count_a = Arc::new(AtomicUsize::new(0));
    let count_b = Arc::new(AtomicUsize::new(0));

    let options = || {
        Some(SubscribeOptions {
            group: Some("group-workers".to_string()),
        })
    };
    adapter
        .subscribe("itest.group.jobs", counting_handler(count_a.clone()), options())
        .await
        .unwrap();
    adapter
        .subscribe("itest.group.jobs", counting_handler(count_b.clone()), options())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..10 {
        adapter
            .publish("itest.group.jobs", serde_json::json!({"seq": i}), None)
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(1)).await;
    let total = count_a.load(Ordering::SeqCst) + count_b.load(Ordering::SeqCst);
    assert_eq!(total, 10, "each message goes to exactly one group member");

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_failing_handler_redelivered_up_to_max_deliver() {
    let adapter = StreamAdapter::builder(ConnectionConfig::default(), test_stream_config("retry"))
        .consumer_defaults(ConsumerDefaults {
            ack_wait_secs: 1,
            max_deliver: 3,
            max_ack_pending: 100,
        })
        .build();
    if adapter.connect().await.is_err() {
        eprintln!("NATS/JetStream not available, skipping integration test");
        return;
    }

    let failed_events = Arc::new(AtomicUsize::new(0));
    let failed_sink = failed_events.clone();
    adapter.on(
        QueueEventKind::MessageFailed,
        Arc::new(move |_| {
            failed_sink.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let attempts = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let attempts_sink = attempts.clone();
    let max_sink = max_seen.clone();
    adapter
        .subscribe(
            "itest.retry.jobs",
            handler_fn(move |msg| {
                let attempts = attempts_sink.clone();
                let max_seen = max_sink.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    max_seen.fetch_max(msg.num_delivered as usize, Ordering::SeqCst);
                    Err(QueueError::Handler("always fails".to_string()))
                }
            }),
            Some(SubscribeOptions {
                group: Some("retry-workers".to_string()),
            }),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    adapter
        .publish("itest.retry.jobs", serde_json::json!({"doomed": true}), None)
        .await
        .unwrap();

    // ack_wait is 1s, so three attempts fit well inside this window
    wait_for(&attempts, 3, Duration::from_secs(8)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Delivery stops at the max-deliver bound
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(max_seen.load(Ordering::SeqCst), 3);
    // Every failed attempt is surfaced as a message-failed event
    assert_eq!(failed_events.load(Ordering::SeqCst), 3);

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let adapter = stream!("unsub");
    let count = Arc::new(AtomicUsize::new(0));

    let sub = adapter
        .subscribe("itest.unsub.events", counting_handler(count.clone()), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(adapter.active_subscriptions(), 1);

    sub.unsubscribe().await.unwrap();
    assert_eq!(adapter.active_subscriptions(), 0);

    adapter
        .publish("itest.unsub.events", serde_json::json!({}), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_typed_payload_decode() {
    #[derive(serde::Deserialize)]
    struct Order {
        order_id: u64,
    }

    let adapter = stream!("typed");
    let seen = Arc::new(AtomicUsize::new(0));
    let sink = seen.clone();

    adapter
        .subscribe(
            "itest.typed.orders",
            handler_fn(move |msg| {
                let seen = sink.clone();
                async move {
                    let order: Order = msg.payload()?;
                    seen.store(order.order_id as usize, Ordering::SeqCst);
                    Ok(())
                }
            }),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    adapter
        .publish("itest.typed.orders", serde_json::json!({"order_id": 77}), None)
        .await
        .unwrap();

    wait_for(&seen, 77, Duration::from_secs(3)).await;
    assert_eq!(seen.load(Ordering::SeqCst), 77);

    adapter.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_rejects_publish() {
    let adapter = stream!("closed");
    adapter.disconnect().await.unwrap();
    assert!(!adapter.is_connected());

    let err = adapter
        .publish("itest.closed.x", serde_json::json!({}), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not connected"));
    assert!(err.to_string().contains("stream"));
}
