//! Bridge from the event bus to connected clients.
//!
//! Every dispatched event is re-encoded as an event frame and fanned out
//! to the hub subscribers of the topic it arrived on. Events of a type no
//! one registered for never reach here.

use std::sync::Arc;

use async_trait::async_trait;

use super::hub::Hub;
use super::messages::OutboundFrame;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::realtime_event::event_types;
use crate::ports::{Delivery, EventHandler, EventSubscriber};

pub struct HubBroadcaster {
    hub: Arc<Hub>,
}

impl HubBroadcaster {
    pub fn new(hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }

    /// Registers for every event type with a decode path.
    pub fn register(self: &Arc<Self>, subscriber: &dyn EventSubscriber) {
        subscriber.subscribe_all(event_types::ALL, self.clone());
    }
}

#[async_trait]
impl EventHandler for HubBroadcaster {
    async fn handle(&self, delivery: Delivery) -> Result<(), DomainError> {
        let payload = delivery.event.to_payload().map_err(encode_error)?;
        let frame = OutboundFrame::event(&delivery.header.event_type, delivery.topic.as_str(), payload)
            .to_json()
            .map_err(encode_error)?;

        let delivered = self.hub.broadcast(&delivery.topic, &frame).await;
        tracing::trace!(
            topic = %delivery.topic,
            event_type = %delivery.header.event_type,
            delivered,
            "event forwarded to clients"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "HubBroadcaster"
    }
}

fn encode_error(e: serde_json::Error) -> DomainError {
    DomainError::new(ErrorCode::InternalError, format!("Failed to encode event frame: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::client::{ClientHandle, ConnectionConfig};
    use crate::domain::foundation::{AuthenticatedUser, DeviceId, EnvelopeHeader, SessionId, UserId};
    use crate::domain::realtime_event::RealtimeEvent;
    use crate::domain::routing::Topic;
    use serde_json::json;

    #[tokio::test]
    async fn delivery_is_forwarded_as_event_frame() {
        let hub = Arc::new(Hub::new());
        let client = Arc::new(ClientHandle::new(
            AuthenticatedUser::new(
                UserId::new("alice").unwrap(),
                SessionId::new("s1").unwrap(),
                DeviceId::new("d1").unwrap(),
            ),
            &ConnectionConfig::default(),
        ));
        hub.register(client.clone()).await;
        let topic = Topic::conversation("c1");
        hub.subscribe(client.id(), topic.clone()).await;

        let payload = json!({ "conversation_id": "c1", "title": "Weekend" });
        let delivery = Delivery {
            topic: topic.clone(),
            header: EnvelopeHeader {
                event_type: "conversation.updated".to_string(),
                aggregate_type: "conversation".to_string(),
                aggregate_id: "c1".to_string(),
                occurred_at: None,
            },
            event: RealtimeEvent::decode("conversation.updated", &payload).unwrap(),
        };

        HubBroadcaster::new(hub).handle(delivery).await.unwrap();

        let batch = client.queue().recv_batch(1).await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&batch[0]).unwrap();
        assert_eq!(frame["type"], "conversation.updated");
        assert_eq!(frame["topic"], "channel:conversation:c1");
        assert_eq!(frame["payload"]["title"], "Weekend");
    }
}
