//! Local dispatch of events received from the transport.
//!
//! The bus decodes each message once into a [`RealtimeEvent`] and hands a
//! [`Delivery`] to every handler registered for its type.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::foundation::{DomainError, EnvelopeHeader};
use crate::domain::realtime_event::RealtimeEvent;
use crate::domain::routing::Topic;

/// An event plus the topic it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: Topic,
    pub header: EnvelopeHeader,
    pub event: RealtimeEvent,
}

/// Receives dispatched events.
///
/// Delivery is at-least-once. Each invocation runs on its own task, so a
/// slow or failing handler never holds up the listen loop or its siblings.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), DomainError>;

    fn name(&self) -> &'static str;
}

/// Handler registration by event type. May be called while dispatch runs.
pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>);

    fn subscribe_all(&self, event_types: &[&str], handler: Arc<dyn EventHandler>) {
        for event_type in event_types {
            self.subscribe(event_type, handler.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventSubscriber for Recorder {
        fn subscribe(&self, event_type: &str, _handler: Arc<dyn EventHandler>) {
            self.0.lock().unwrap().push(event_type.to_string());
        }
    }

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _delivery: Delivery) -> Result<(), DomainError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Noop"
        }
    }

    #[test]
    fn subscribe_all_registers_each_type() {
        let recorder = Recorder::default();

        recorder.subscribe_all(&["message.created", "call.ended"], Arc::new(Noop));

        assert_eq!(*recorder.0.lock().unwrap(), vec!["message.created", "call.ended"]);
    }
}
