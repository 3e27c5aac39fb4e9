//! Connection hub: the registry of live clients and their topic subscriptions.
//!
//! # Architecture
//!
//! ```text
//! channel:conversation:c1    channel:user:alice    channel:presence:bob
//! ├── conn-a                 ├── conn-a            ├── conn-a
//! ├── conn-b                 └── conn-c            └── conn-d
//! └── conn-d
//! ```
//!
//! Both directions of the mapping sit behind one lock so subscribe,
//! unsubscribe and broadcast always see a consistent pair. Broadcast holds
//! only the read lock and never awaits while enqueueing; a client whose
//! queue overflows under the disconnect policy is unregistered after the
//! lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::client::ClientHandle;
use super::queue::PushOutcome;
use crate::domain::foundation::{ConnectionId, UserId};
use crate::domain::routing::Topic;

#[derive(Default)]
struct HubState {
    clients: HashMap<ConnectionId, Arc<ClientHandle>>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
    subscriptions: HashMap<ConnectionId, HashSet<Topic>>,
}

#[derive(Default)]
pub struct Hub {
    state: RwLock<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, client: Arc<ClientHandle>) {
        let id = client.id();
        let mut state = self.state.write().await;
        state.subscriptions.entry(id).or_default();
        state.clients.insert(id, client);
        tracing::debug!(connection_id = %id, clients = state.clients.len(), "client registered");
    }

    /// Removes a client and every subscription it held, then closes it.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Arc<ClientHandle>> {
        let client = {
            let mut state = self.state.write().await;
            let client = state.clients.remove(&id)?;
            let topics = state.subscriptions.remove(&id).unwrap_or_default();
            for topic in topics {
                remove_member(&mut state.topics, &topic, &id);
            }
            client
        };
        client.close();
        tracing::debug!(connection_id = %id, "client unregistered");
        Some(client)
    }

    /// Returns false when the client is not registered.
    pub async fn subscribe(&self, id: ConnectionId, topic: Topic) -> bool {
        let mut state = self.state.write().await;
        let Some(topics) = state.subscriptions.get_mut(&id) else {
            return false;
        };
        topics.insert(topic.clone());
        state.topics.entry(topic).or_default().insert(id);
        true
    }

    /// Returns true when the client was subscribed.
    pub async fn unsubscribe(&self, id: ConnectionId, topic: &Topic) -> bool {
        let mut state = self.state.write().await;
        let removed = state
            .subscriptions
            .get_mut(&id)
            .map_or(false, |topics| topics.remove(topic));
        if removed {
            remove_member(&mut state.topics, topic, &id);
        }
        removed
    }

    /// Enqueues `frame` for every subscriber of `topic`.
    ///
    /// Returns how many clients accepted the frame.
    pub async fn broadcast(&self, topic: &Topic, frame: &str) -> usize {
        let mut delivered = 0;
        let mut overflowed = Vec::new();
        {
            let state = self.state.read().await;
            let Some(members) = state.topics.get(topic) else {
                return 0;
            };
            for id in members {
                let Some(client) = state.clients.get(id) else {
                    continue;
                };
                match client.send(frame.to_string()) {
                    PushOutcome::Queued | PushOutcome::DroppedOldest => delivered += 1,
                    PushOutcome::Overflow => overflowed.push(*id),
                    PushOutcome::Closed => {}
                }
            }
        }

        for id in overflowed {
            tracing::warn!(connection_id = %id, topic = %topic, "outbound queue full, disconnecting slow client");
            self.unregister(id).await;
        }
        delivered
    }

    /// Enqueues a frame for a single connection.
    pub async fn send_to(&self, id: ConnectionId, frame: String) -> bool {
        let state = self.state.read().await;
        state
            .clients
            .get(&id)
            .map_or(false, |client| matches!(client.send(frame), PushOutcome::Queued | PushOutcome::DroppedOldest))
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }

    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.state.read().await.topics.get(topic).map_or(0, HashSet::len)
    }

    pub async fn subscriptions_of(&self, id: ConnectionId) -> Vec<Topic> {
        let state = self.state.read().await;
        let mut topics: Vec<Topic> = state
            .subscriptions
            .get(&id)
            .map(|topics| topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Live connections belonging to `user`.
    pub async fn connections_of(&self, user: &UserId) -> Vec<ConnectionId> {
        self.state
            .read()
            .await
            .clients
            .values()
            .filter(|client| client.user().id == *user)
            .map(|client| client.id())
            .collect()
    }
}

fn remove_member(topics: &mut HashMap<Topic, HashSet<ConnectionId>>, topic: &Topic, id: &ConnectionId) {
    if let Some(members) = topics.get_mut(topic) {
        members.remove(id);
        if members.is_empty() {
            topics.remove(topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::client::ConnectionConfig;
    use crate::adapters::websocket::queue::OverflowPolicy;
    use crate::domain::foundation::{AuthenticatedUser, DeviceId, SessionId};

    fn client(user: &str) -> Arc<ClientHandle> {
        client_with(user, ConnectionConfig::default())
    }

    fn client_with(user: &str, config: ConnectionConfig) -> Arc<ClientHandle> {
        Arc::new(ClientHandle::new(
            AuthenticatedUser::new(
                UserId::new(user).unwrap(),
                SessionId::new("s1").unwrap(),
                DeviceId::new("d1").unwrap(),
            ),
            &config,
        ))
    }

    async fn registered(hub: &Hub, user: &str) -> Arc<ClientHandle> {
        let c = client(user);
        hub.register(c.clone()).await;
        c
    }

    #[tokio::test]
    async fn broadcast_reaches_only_subscribers() {
        let hub = Hub::new();
        let a = registered(&hub, "alice").await;
        let b = registered(&hub, "bob").await;
        let c = registered(&hub, "carol").await;
        let topic = Topic::conversation("c1");
        hub.subscribe(a.id(), topic.clone()).await;
        hub.subscribe(b.id(), topic.clone()).await;

        let delivered = hub.broadcast(&topic, "hello").await;

        assert_eq!(delivered, 2);
        assert_eq!(a.queue().len(), 1);
        assert_eq!(b.queue().len(), 1);
        assert!(c.queue().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_then_broadcast_reaches_nobody() {
        let hub = Hub::new();
        let a = registered(&hub, "alice").await;
        let topic = Topic::conversation("c1");
        hub.subscribe(a.id(), topic.clone()).await;

        assert!(hub.unsubscribe(a.id(), &topic).await);
        assert_eq!(hub.broadcast(&topic, "hello").await, 0);
        assert!(a.queue().is_empty());
        assert_eq!(hub.subscriber_count(&topic).await, 0);
    }

    #[tokio::test]
    async fn unregister_releases_every_subscription() {
        let hub = Hub::new();
        let a = registered(&hub, "alice").await;
        hub.subscribe(a.id(), Topic::user("alice")).await;
        hub.subscribe(a.id(), Topic::conversation("c1")).await;

        hub.unregister(a.id()).await;

        assert!(a.is_closed());
        assert_eq!(hub.client_count().await, 0);
        assert_eq!(hub.subscriber_count(&Topic::user("alice")).await, 0);
        assert_eq!(hub.subscriber_count(&Topic::conversation("c1")).await, 0);
    }

    #[tokio::test]
    async fn subscribe_for_unknown_client_is_refused() {
        let hub = Hub::new();
        assert!(!hub.subscribe(ConnectionId::new(), Topic::user("x")).await);
    }

    #[tokio::test]
    async fn slow_client_is_disconnected_under_disconnect_policy() {
        let hub = Hub::new();
        let slow = client_with(
            "slow",
            ConnectionConfig {
                outbound_capacity: 1,
                overflow_policy: OverflowPolicy::Disconnect,
                ..ConnectionConfig::default()
            },
        );
        let fast = registered(&hub, "fast").await;
        hub.register(slow.clone()).await;
        let topic = Topic::broadcast("all");
        hub.subscribe(slow.id(), topic.clone()).await;
        hub.subscribe(fast.id(), topic.clone()).await;

        hub.broadcast(&topic, "1").await;
        let delivered = hub.broadcast(&topic, "2").await;

        assert_eq!(delivered, 1);
        assert!(slow.is_closed());
        assert_eq!(fast.queue().len(), 2);
        assert_eq!(hub.subscriber_count(&topic).await, 1);
    }

    #[tokio::test]
    async fn connections_of_lists_all_devices() {
        let hub = Hub::new();
        registered(&hub, "alice").await;
        registered(&hub, "alice").await;
        registered(&hub, "bob").await;

        assert_eq!(hub.connections_of(&UserId::new("alice").unwrap()).await.len(), 2);
    }
}
