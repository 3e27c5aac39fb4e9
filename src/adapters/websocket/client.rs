//! One live connection: its handle in the hub and its write pump.
//!
//! A connection runs exactly two loops, a read pump (see `session`) and the
//! write pump here. They share nothing but the outbound queue, the
//! liveness timestamp and a close signal; either loop ending closes the
//! handle, which ends the other.

use std::fmt::Display;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::watch;
use tokio::time::{self, Instant};

use super::local_limiter::LocalQuotas;
use super::messages::OutboundFrame;
use super::queue::{OutboundQueue, OverflowPolicy, PushOutcome};
use crate::domain::foundation::{AuthenticatedUser, ConnectionId};

/// Per-connection tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub outbound_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Protocol ping cadence.
    pub ping_interval: Duration,
    /// Silence after which the peer is considered dead.
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub max_message_bytes: usize,
    /// Most queued frames coalesced into one write.
    pub max_batch: usize,
    pub local_quotas: LocalQuotas,
    pub local_window: Duration,
    /// Least time between presence heartbeats driven by inbound traffic.
    pub presence_refresh: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            overflow_policy: OverflowPolicy::DropOldest,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_bytes: 64 * 1024,
            max_batch: 32,
            local_quotas: LocalQuotas::default(),
            local_window: Duration::from_secs(60),
            presence_refresh: Duration::from_secs(30),
        }
    }
}

/// Hub-side handle for one connection.
pub struct ClientHandle {
    id: ConnectionId,
    user: AuthenticatedUser,
    queue: OutboundQueue,
    last_activity: Mutex<Instant>,
    closed: watch::Sender<bool>,
}

impl ClientHandle {
    pub fn new(user: AuthenticatedUser, config: &ConnectionConfig) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            user,
            queue: OutboundQueue::new(config.outbound_capacity, config.overflow_policy),
            last_activity: Mutex::new(Instant::now()),
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Enqueues an already encoded frame without blocking.
    pub fn send(&self, frame: String) -> PushOutcome {
        self.queue.push(frame)
    }

    pub fn send_frame(&self, frame: &OutboundFrame) -> Result<PushOutcome, serde_json::Error> {
        Ok(self.send(frame.to_json()?))
    }

    /// Records inbound traffic from the peer.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    /// Stops both pumps. Frames already queued are still flushed.
    pub fn close(&self) {
        self.queue.close();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` when the connection closes.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Drains the outbound queue into the socket and keeps the peer alive.
///
/// Queued frames are coalesced into one text frame, newline separated.
/// A ping goes out every `ping_interval`; if the peer has been silent for
/// longer than `pong_wait` the connection is dropped instead.
pub async fn write_pump<S>(mut sink: S, client: std::sync::Arc<ClientHandle>, config: ConnectionConfig)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            batch = client.queue().recv_batch(config.max_batch) => {
                let Some(batch) = batch else { break };
                if !write(&mut sink, Message::Text(batch.join("\n")), &client, config.write_wait).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if client.idle_for() > config.pong_wait {
                    tracing::info!(connection_id = %client.id(), user_id = %client.user().id, "peer unresponsive, closing");
                    break;
                }
                if !write(&mut sink, Message::Ping(Vec::new()), &client, config.write_wait).await {
                    break;
                }
            }
        }
    }

    let _ = time::timeout(config.write_wait, sink.send(Message::Close(None))).await;
    client.close();
    tracing::debug!(connection_id = %client.id(), "write pump stopped");
}

async fn write<S>(sink: &mut S, message: Message, client: &ClientHandle, deadline: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %client.id(), error = %e, "socket write failed");
            false
        }
        Err(_) => {
            tracing::info!(connection_id = %client.id(), "socket write timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{DeviceId, SessionId, UserId};
    use futures::channel::mpsc;
    use futures::StreamExt;
    use std::sync::Arc;

    fn alice() -> AuthenticatedUser {
        AuthenticatedUser::new(
            UserId::new("alice").unwrap(),
            SessionId::new("s1").unwrap(),
            DeviceId::new("d1").unwrap(),
        )
    }

    fn text(message: Message) -> String {
        match message {
            Message::Text(text) => text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn queued_frames_are_coalesced_into_one_write() {
        let client = Arc::new(ClientHandle::new(alice(), &ConnectionConfig::default()));
        client.send("one".into());
        client.send("two".into());
        let (tx, mut rx) = mpsc::unbounded();

        let pump = tokio::spawn(write_pump(tx, client.clone(), ConnectionConfig::default()));

        assert_eq!(text(rx.next().await.unwrap()), "one\ntwo");
        client.close();
        pump.await.unwrap();
        assert!(matches!(rx.next().await, Some(Message::Close(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_is_dropped_after_pong_wait() {
        let config = ConnectionConfig {
            ping_interval: Duration::from_secs(5),
            pong_wait: Duration::from_secs(8),
            ..ConnectionConfig::default()
        };
        let client = Arc::new(ClientHandle::new(alice(), &config));
        let (tx, mut rx) = mpsc::unbounded();

        let pump = tokio::spawn(write_pump(tx, client.clone(), config));

        assert!(matches!(rx.next().await, Some(Message::Ping(_))));
        pump.await.unwrap();
        assert!(client.is_closed());
        assert!(matches!(rx.next().await, Some(Message::Close(None))));
    }

    #[tokio::test]
    async fn closed_sink_stops_pump_and_closes_client() {
        let client = Arc::new(ClientHandle::new(alice(), &ConnectionConfig::default()));
        let (tx, rx) = mpsc::unbounded::<Message>();
        drop(rx);
        client.send("lost".into());

        write_pump(tx, client.clone(), ConnectionConfig::default()).await;

        assert!(client.is_closed());
    }
}
