//! TransportEventBus - routed publishing and typed local dispatch over a
//! pub/sub transport.
//!
//! ## Lifecycle
//!
//! `start` opens one pattern subscription (default `channel:*`) and spawns the
//! listen loop; `stop` cancels it and drops the subscription. Both are
//! idempotent. `publish` before `start` fails with `NotStarted`.
//!
//! ## Dispatch
//!
//! The listen loop reads only the envelope header to find the handlers for
//! the event type. Types nobody handles are dropped before the payload is
//! decoded. Each handler invocation runs on its own task, but only after a
//! semaphore permit is acquired, so a burst of events backs up the listen
//! loop instead of spawning without limit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::domain::foundation::{DomainError, Envelope, EnvelopeHeader, ErrorCode};
use crate::domain::realtime_event::RealtimeEvent;
use crate::domain::routing::{ChannelRouter, Topic, ALL_TOPICS_PATTERN};
use crate::ports::{
    Delivery, EventHandler, EventPublisher, EventSubscriber, MessageStream, PubSubTransport,
    TransportError, TransportMessage,
};

type HandlerTable = Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event bus not started")]
    NotStarted,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("publish failed on all {attempted} topics")]
    AllTopicsFailed { attempted: usize },
}

impl From<EventBusError> for DomainError {
    fn from(err: EventBusError) -> Self {
        let code = match &err {
            EventBusError::NotStarted => ErrorCode::NotStarted,
            EventBusError::Transport(_) | EventBusError::AllTopicsFailed { .. } => {
                ErrorCode::TransportError
            }
            EventBusError::Encode(_) => ErrorCode::InternalError,
        };
        DomainError::new(code, err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Pattern subscribed to at start.
    pub pattern: String,
    /// Upper bound on handler invocations in flight.
    pub max_concurrent_handlers: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            pattern: ALL_TOPICS_PATTERN.to_string(),
            max_concurrent_handlers: 64,
        }
    }
}

impl EventBusConfig {
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max.max(1);
        self
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Event bus over any [`PubSubTransport`].
pub struct TransportEventBus {
    transport: Arc<dyn PubSubTransport>,
    router: ChannelRouter,
    config: EventBusConfig,
    handlers: HandlerTable,
    permits: Arc<Semaphore>,
    running: AtomicBool,
    state: Mutex<Option<Running>>,
}

impl TransportEventBus {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self::with_config(transport, EventBusConfig::default())
    }

    pub fn with_config(transport: Arc<dyn PubSubTransport>, config: EventBusConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));
        Self {
            transport,
            router: ChannelRouter::new(),
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            permits,
            running: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribes to the configured pattern and starts the listen loop.
    ///
    /// A subscription failure is returned to the caller; at startup it is
    /// fatal. Calling `start` on a running bus does nothing.
    pub async fn start(&self) -> Result<(), EventBusError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let stream = self.transport.psubscribe(&self.config.pattern).await?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher {
            handlers: self.handlers.clone(),
            permits: self.permits.clone(),
        };
        let task = tokio::spawn(listen(stream, shutdown_rx, dispatcher));

        *state = Some(Running { shutdown, task });
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(pattern = %self.config.pattern, "event bus started");
        Ok(())
    }

    /// Cancels the listen loop and releases the subscription.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            tracing::warn!(error = %e, "event bus listen task ended abnormally");
        }
        tracing::info!("event bus stopped");
    }

    /// Routes and publishes an envelope, isolating per-topic failures.
    ///
    /// Returns the number of topics the envelope reached.
    pub async fn publish_routed(&self, envelope: &Envelope) -> Result<usize, EventBusError> {
        if !self.is_running() {
            return Err(EventBusError::NotStarted);
        }

        let topics = self.router.resolve(envelope);
        if topics.is_empty() {
            return Ok(0);
        }

        let bytes = envelope.to_bytes()?;
        let mut delivered = 0;
        for topic in &topics {
            match self.transport.publish(topic.as_str(), bytes.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    topic = %topic,
                    event_type = %envelope.event_type,
                    error = %e,
                    "publish to topic failed"
                ),
            }
        }

        if delivered == 0 {
            return Err(EventBusError::AllTopicsFailed {
                attempted: topics.len(),
            });
        }
        Ok(delivered)
    }

    /// Number of handlers registered for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventPublisher for TransportEventBus {
    async fn publish(&self, event: Envelope) -> Result<(), DomainError> {
        self.publish_routed(&event).await?;
        Ok(())
    }
}

impl EventSubscriber for TransportEventBus {
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }
}

#[derive(Clone)]
struct Dispatcher {
    handlers: HandlerTable,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    async fn dispatch(&self, message: TransportMessage) {
        let header = match EnvelopeHeader::from_bytes(&message.payload) {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(channel = %message.channel, error = %e, "dropping undecodable message");
                return;
            }
        };

        let handlers = {
            let table = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match table.get(&header.event_type) {
                Some(handlers) if !handlers.is_empty() => handlers.clone(),
                _ => return,
            }
        };

        let topic = match Topic::parse(&message.channel) {
            Ok(topic) => topic,
            Err(e) => {
                tracing::debug!(channel = %message.channel, error = %e, "dropping message on foreign channel");
                return;
            }
        };

        let event = match Envelope::from_bytes(&message.payload)
            .and_then(|envelope| RealtimeEvent::decode(&header.event_type, &envelope.payload))
        {
            Ok(event) if event.is_unknown() => return,
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    event_type = %header.event_type,
                    topic = %topic,
                    error = %e,
                    "payload does not match event type"
                );
                return;
            }
        };

        let delivery = Delivery {
            topic,
            header,
            event,
        };

        for handler in handlers {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                return;
            };
            let delivery = delivery.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.handle(delivery).await {
                    tracing::warn!(handler = handler.name(), error = %e, "event handler failed");
                }
                drop(permit);
            });
        }
    }
}

async fn listen(mut stream: MessageStream, mut shutdown: watch::Receiver<bool>, dispatcher: Dispatcher) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = stream.next() => match message {
                Some(message) => dispatcher.dispatch(message).await,
                None => {
                    tracing::warn!("event bus subscription closed by transport");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryTransport;
    use crate::domain::realtime_event::event_types;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forwarding {
        tx: mpsc::UnboundedSender<Delivery>,
    }

    #[async_trait]
    impl EventHandler for Forwarding {
        async fn handle(&self, delivery: Delivery) -> Result<(), DomainError> {
            let _ = self.tx.send(delivery);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Forwarding"
        }
    }

    struct Failing(AtomicUsize);

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _: Delivery) -> Result<(), DomainError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(DomainError::new(ErrorCode::InternalError, "boom"))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    fn typing_envelope() -> Envelope {
        Envelope::new(
            event_types::TYPING_STARTED,
            "typing",
            "c1",
            json!({"conversation_id": "c1", "user_id": "u1"}),
        )
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn publish_before_start_fails_fast() {
        let bus = TransportEventBus::new(Arc::new(InMemoryTransport::new()));

        let err = bus.publish(typing_envelope()).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::NotStarted);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = TransportEventBus::new(transport.clone());

        bus.start().await.unwrap();
        bus.start().await.unwrap();
        assert_eq!(transport.subscriber_count(), 1);

        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_running());
        assert_eq!(transport.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn publish_routes_and_dispatches_typed_event() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = TransportEventBus::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(event_types::TYPING_STARTED, Arc::new(Forwarding { tx }));
        bus.start().await.unwrap();

        bus.publish(typing_envelope()).await.unwrap();

        let delivery = recv(&mut rx).await.expect("delivery");
        assert_eq!(delivery.topic, Topic::conversation("c1"));
        assert!(matches!(delivery.event, RealtimeEvent::Typing(_)));
        assert_eq!(transport.published_to("channel:conversation:c1").len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn unknown_event_types_are_dropped() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = TransportEventBus::new(transport.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("widget.spun", Arc::new(Forwarding { tx }));
        bus.start().await.unwrap();

        bus.publish(Envelope::new("widget.spun", "widget", "w1", json!({})))
            .await
            .unwrap();

        assert!(recv(&mut rx).await.is_none());
        assert_eq!(transport.published_to("channel:system:outbox").len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn one_failing_topic_does_not_abort_the_others() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.fail_topic("channel:user:u2");
        let bus = TransportEventBus::new(transport.clone());
        bus.start().await.unwrap();

        let envelope = Envelope::new(
            event_types::MESSAGE_CREATED,
            "message",
            "m1",
            json!({"conversation_id": "c1", "recipient_ids": ["u1", "u2", "u3"]}),
        );
        let delivered = bus.publish_routed(&envelope).await.unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(transport.published_to("channel:user:u1").len(), 1);
        assert_eq!(transport.published_to("channel:user:u3").len(), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn publish_fails_when_every_topic_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.set_fail_all(true);
        let bus = TransportEventBus::new(transport);
        bus.start().await.unwrap();

        let err = bus.publish_routed(&typing_envelope()).await.unwrap_err();

        assert!(matches!(err, EventBusError::AllTopicsFailed { attempted: 1 }));
        bus.stop().await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_sibling_handlers() {
        let transport = Arc::new(InMemoryTransport::new());
        let bus = TransportEventBus::new(transport);
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(event_types::TYPING_STARTED, failing.clone());
        bus.subscribe(event_types::TYPING_STARTED, Arc::new(Forwarding { tx }));
        bus.start().await.unwrap();

        bus.publish(typing_envelope()).await.unwrap();

        assert!(recv(&mut rx).await.is_some());
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
        bus.stop().await;
    }

    #[tokio::test]
    async fn subscribe_all_registers_every_type() {
        let bus = TransportEventBus::new(Arc::new(InMemoryTransport::new()));
        let (tx, _rx) = mpsc::unbounded_channel();

        bus.subscribe_all(
            &[event_types::TYPING_STARTED, event_types::TYPING_STOPPED],
            Arc::new(Forwarding { tx }),
        );

        assert_eq!(bus.handler_count(event_types::TYPING_STARTED), 1);
        assert_eq!(bus.handler_count(event_types::TYPING_STOPPED), 1);
        assert_eq!(bus.handler_count(event_types::PRESENCE_CHANGED), 0);
    }
}
