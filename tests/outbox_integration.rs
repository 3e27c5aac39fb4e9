//! Integration tests for the outbox relay.
//!
//! These tests verify the end-to-end flow:
//! 1. Business code inserts an event into the outbox
//! 2. OutboxProcessor routes and publishes it on the transport
//! 3. The event bus dispatches it to the hub bridge
//! 4. Subscribed clients find the event frame in their queue
//!
//! Uses in-memory implementations, so no database or Redis is needed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use chat_realtime::adapters::events::{
    InMemoryOutboxStore, InMemoryTransport, OutboxProcessor, OutboxProcessorConfig, TransportEventBus,
};
use chat_realtime::adapters::websocket::{ClientHandle, ConnectionConfig, Hub, HubBroadcaster};
use chat_realtime::domain::foundation::{AuthenticatedUser, DeviceId, SessionId, UserId};
use chat_realtime::domain::outbox::{DeliveryOutcome, OutboxEvent};
use chat_realtime::domain::routing::Topic;

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Relay {
    store: Arc<InMemoryOutboxStore>,
    transport: Arc<InMemoryTransport>,
    processor: OutboxProcessor,
}

fn relay(config: OutboxProcessorConfig) -> Relay {
    let store = Arc::new(InMemoryOutboxStore::new());
    let transport = Arc::new(InMemoryTransport::new());
    let processor = OutboxProcessor::with_config(store.clone(), transport.clone(), config);
    Relay {
        store,
        transport,
        processor,
    }
}

fn message_in(conversation: &str) -> OutboxEvent {
    OutboxEvent::new(
        "message.updated",
        "message",
        "m-1",
        json!({ "message_id": "m-1", "conversation_id": conversation, "body": "edited" }),
    )
}

fn user(id: &str) -> AuthenticatedUser {
    AuthenticatedUser::new(
        UserId::new(id).unwrap(),
        SessionId::new(format!("s-{}", id)).unwrap(),
        DeviceId::new(format!("d-{}", id)).unwrap(),
    )
}

// =============================================================================
// Outbox → Transport
// =============================================================================

#[tokio::test]
async fn processed_message_event_is_delivered_to_conversation_topic() {
    let relay = relay(OutboxProcessorConfig::default());
    let id = relay.store.insert(message_in("c1"));

    let report = relay.processor.poll_once().await.unwrap();

    assert_eq!(report.delivered, 1);
    let deliveries = relay.store.deliveries_for(id);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].outcome, DeliveryOutcome::Delivered);
    assert_eq!(relay.transport.published_to("channel:conversation:c1").len(), 1);
    assert_eq!(relay.transport.publish_count(), 1);
    assert!(relay.store.get(id).unwrap().processed_at.is_some());
}

#[tokio::test]
async fn delivery_records_match_attempts_across_mixed_batch() {
    let relay = relay(OutboxProcessorConfig::default());
    relay.transport.fail_topic("channel:conversation:broken");
    relay.store.insert(message_in("c1"));
    relay.store.insert(message_in("broken"));
    relay.store.insert(message_in("c2"));

    let report = relay.processor.poll_once().await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(relay.store.deliveries().len(), report.attempted);
}

#[tokio::test]
async fn failing_event_is_dead_lettered_after_max_retries() {
    let relay = relay(
        OutboxProcessorConfig::default()
            .with_max_retries(2)
            .with_retry_backoff(Duration::ZERO),
    );
    relay.transport.set_fail_all(true);
    let id = relay.store.insert(message_in("c1"));

    relay.processor.poll_once().await.unwrap();
    relay.processor.poll_once().await.unwrap();
    let report = relay.processor.poll_once().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.attempted, 0);
    let event = relay.store.get(id).unwrap();
    assert!(event.failed);
    assert_eq!(relay.store.deliveries_for(id).len(), 2);

    let after = relay.processor.poll_once().await.unwrap();
    assert_eq!(after, Default::default());
}

// =============================================================================
// Outbox → Transport → Bus → Hub
// =============================================================================

#[tokio::test]
async fn outbox_event_reaches_subscribed_client() {
    let relay = relay(OutboxProcessorConfig::default().with_poll_interval(Duration::from_millis(10)));
    let bus = Arc::new(TransportEventBus::new(relay.transport.clone()));
    let hub = Arc::new(Hub::new());
    HubBroadcaster::new(hub.clone()).register(bus.as_ref());
    bus.start().await.unwrap();

    let alice = Arc::new(ClientHandle::new(user("alice"), &ConnectionConfig::default()));
    let bob = Arc::new(ClientHandle::new(user("bob"), &ConnectionConfig::default()));
    hub.register(alice.clone()).await;
    hub.register(bob.clone()).await;
    hub.subscribe(alice.id(), Topic::conversation("c1")).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = Arc::new(relay.processor);
    let worker = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run(shutdown_rx).await })
    };
    relay.store.insert(message_in("c1"));

    let batch = tokio::time::timeout(Duration::from_secs(2), alice.queue().recv_batch(1))
        .await
        .expect("event should reach the subscriber")
        .unwrap();
    let frame: serde_json::Value = serde_json::from_str(&batch[0]).unwrap();
    assert_eq!(frame["type"], "message.updated");
    assert_eq!(frame["topic"], "channel:conversation:c1");
    assert_eq!(frame["payload"]["body"], "edited");
    assert!(bob.queue().is_empty());

    shutdown_tx.send(true).unwrap();
    worker.await.unwrap();
    bus.stop().await;
}
