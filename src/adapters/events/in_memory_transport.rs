//! In-memory pub/sub transport for tests and single-process development.
//!
//! Publishes are recorded so tests can assert on exactly what went out,
//! and fanned out to every live pattern subscription. Failures can be
//! injected per topic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::ports::{MessageStream, PubSubTransport, TransportError, TransportMessage};

/// In-process transport with publish recording and failure injection.
#[derive(Default)]
pub struct InMemoryTransport {
    published: RwLock<Vec<TransportMessage>>,
    subscribers: RwLock<Vec<(String, mpsc::UnboundedSender<TransportMessage>)>>,
    failing_topics: RwLock<HashSet<String>>,
    fail_all: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every publish to `topic` fail until cleared.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics
            .write()
            .expect("InMemoryTransport failing_topics lock poisoned")
            .insert(topic.to_string());
    }

    /// Makes every publish fail (or succeed again).
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Clears injected failures.
    pub fn heal(&self) {
        self.set_fail_all(false);
        self.failing_topics
            .write()
            .expect("InMemoryTransport failing_topics lock poisoned")
            .clear();
    }

    // === Test Helpers ===

    /// Every successful publish, in order.
    pub fn published(&self) -> Vec<TransportMessage> {
        self.published
            .read()
            .expect("InMemoryTransport published lock poisoned")
            .clone()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .expect("InMemoryTransport published lock poisoned")
            .len()
    }

    /// Payloads published to one topic, in order.
    pub fn published_to(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .read()
            .expect("InMemoryTransport published lock poisoned")
            .iter()
            .filter(|m| m.channel == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Number of subscriptions whose stream is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("InMemoryTransport subscribers lock poisoned")
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    pub fn clear(&self) {
        self.published
            .write()
            .expect("InMemoryTransport published lock poisoned")
            .clear();
    }

    fn should_fail(&self, topic: &str) -> bool {
        self.fail_all.load(Ordering::SeqCst)
            || self
                .failing_topics
                .read()
                .expect("InMemoryTransport failing_topics lock poisoned")
                .contains(topic)
    }
}

#[async_trait]
impl PubSubTransport for InMemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.should_fail(topic) {
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let message = TransportMessage {
            channel: topic.to_string(),
            payload,
        };
        self.published
            .write()
            .expect("InMemoryTransport published lock poisoned")
            .push(message.clone());

        let mut subscribers = self
            .subscribers
            .write()
            .expect("InMemoryTransport subscribers lock poisoned");
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (pattern, tx) in subscribers.iter() {
            if glob_match(pattern, topic) {
                let _ = tx.send(message.clone());
            }
        }
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<MessageStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .expect("InMemoryTransport subscribers lock poisoned")
            .push((pattern.to_string(), tx));

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        Ok(stream.boxed())
    }
}

/// Glob matching with `*` as the only wildcard, as used by PSUBSCRIBE patterns here.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) || text.len() < first.len() + last.len() || !text.ends_with(last) {
        return false;
    }

    let mut rest = &text[first.len()..text.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn glob_matches_prefix_pattern() {
        assert!(glob_match("channel:*", "channel:user:u1"));
        assert!(!glob_match("channel:*", "other:user:u1"));
        assert!(glob_match("channel:*:u1", "channel:user:u1"));
        assert!(!glob_match("channel:*:u1", "channel:user:u2"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn publish_records_and_fans_out() {
        let transport = InMemoryTransport::new();
        let mut stream = transport.psubscribe("channel:*").await.unwrap();

        transport.publish("channel:user:u1", b"hello".to_vec()).await.unwrap();
        transport.publish("elsewhere", b"skip".to_vec()).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.channel, "channel:user:u1");
        assert_eq!(message.payload, b"hello");
        assert_eq!(transport.publish_count(), 2);
        assert_eq!(transport.published_to("channel:user:u1"), vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn injected_failure_is_reported_and_not_recorded() {
        let transport = InMemoryTransport::new();
        transport.fail_topic("channel:user:u1");

        assert!(transport.publish("channel:user:u1", vec![]).await.is_err());
        assert!(transport.publish("channel:user:u2", vec![]).await.is_ok());
        assert_eq!(transport.publish_count(), 1);

        transport.heal();
        assert!(transport.publish("channel:user:u1", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_stream_releases_subscription() {
        let transport = InMemoryTransport::new();
        let stream = transport.psubscribe("channel:*").await.unwrap();
        assert_eq!(transport.subscriber_count(), 1);

        drop(stream);
        assert_eq!(transport.subscriber_count(), 0);
    }
}
