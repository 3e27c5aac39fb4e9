//! Inbound side of a connection: frame dispatch and the read pump.
//!
//! The session owns everything only the read loop touches (the local
//! limiter), so dispatch needs no locking beyond what the shared services
//! already do.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use serde_json::{json, Value as JsonValue};
use tokio::time;

use super::client::{ClientHandle, ConnectionConfig};
use super::handler::WebSocketState;
use super::local_limiter::LocalRateLimiter;
use super::messages::{
    CallInitiateRequest, CallRefRequest, CallSignalRequest, FrameCategory, IceReplayRequest, InboundFrame,
    OutboundFrame, PresenceUpdateRequest, TopicRequest,
};
use super::queue::PushOutcome;
use crate::domain::call::SignalKind;
use crate::domain::foundation::{CallId, ConversationId, DomainError, ErrorCode, UserId};
use crate::domain::presence::PresenceState;
use crate::domain::routing::Topic;
use crate::ports::{is_own_topic, Command};

/// Per-connection dispatcher for client frames.
pub struct Session {
    state: WebSocketState,
    client: Arc<ClientHandle>,
    local: LocalRateLimiter,
    last_heartbeat: time::Instant,
}

impl Session {
    pub fn new(state: WebSocketState, client: Arc<ClientHandle>) -> Self {
        let local = LocalRateLimiter::new(state.config.local_quotas, state.config.local_window);
        Self {
            state,
            client,
            local,
            last_heartbeat: time::Instant::now(),
        }
    }

    /// Refreshes presence for this connection at most once per `presence_refresh`.
    pub async fn heartbeat_if_due(&mut self) {
        if self.last_heartbeat.elapsed() < self.state.config.presence_refresh {
            return;
        }
        self.last_heartbeat = time::Instant::now();

        let user = self.client.user();
        if let Err(e) = self
            .state
            .presence
            .heartbeat(&user.id, &user.device_id, &self.client.id())
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "presence heartbeat failed");
        }
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    /// Handles one text frame and queues the reply, if any.
    pub async fn handle_text(&mut self, text: &str) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply(&OutboundFrame::from_error("error", None, &e));
                return;
            }
        };

        if let Some(category) = FrameCategory::of(&frame.frame_type) {
            if !self.local.allow(category) {
                tracing::debug!(
                    connection_id = %self.client.id(),
                    frame_type = %frame.frame_type,
                    "local quota exhausted, dropping frame"
                );
                return;
            }
        }

        if let Some(reply) = self.dispatch(&frame).await {
            self.reply(&reply);
        }
    }

    async fn dispatch(&self, frame: &InboundFrame) -> Option<OutboundFrame> {
        let rid = Some(frame.request_id().to_string());
        let user = self.client.user();

        let outcome = match frame.frame_type.as_str() {
            "ping" => return Some(OutboundFrame::pong(rid)),
            "subscribe" => self.subscribe(frame).await,
            "unsubscribe" => self.unsubscribe(frame).await,
            "presence.update" => self.update_presence(frame).await,
            "call.initiate" => self.initiate_call(frame).await,
            "call.accept" | "call.join" => self.enter_call(frame).await,
            "call.leave" | "call.end" => self.exit_call(frame).await,
            "call.offer" => self.relay(frame, SignalKind::Offer).await,
            "call.answer" => self.relay(frame, SignalKind::Answer).await,
            "call.ice" => self.relay(frame, SignalKind::Ice).await,
            "call.ice.replay" => self.replay_ice(frame).await,
            "message.send" => {
                match self.state.limiter.allow_message_send(&user.id).await {
                    Ok(result) if result.is_denied() => {
                        return Some(OutboundFrame::rate_limited(&frame.frame_type, rid, &result));
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(user_id = %user.id, error = %e, "rate limiter unavailable, allowing send"),
                }
                self.execute(frame).await
            }
            _ => self.execute(frame).await,
        };

        Some(match outcome {
            Ok(payload) => OutboundFrame::ok(&frame.frame_type, rid, payload),
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(frame_type = %frame.frame_type, code = %e.code, error = %e.message, "request failed");
                } else {
                    tracing::debug!(frame_type = %frame.frame_type, code = %e.code, error = %e.message, "request rejected");
                }
                OutboundFrame::from_error(&frame.frame_type, rid, &e)
            }
        })
    }

    async fn subscribe(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: TopicRequest = frame.payload_as()?;
        let topic = Topic::parse(&request.topic)?;
        let user = self.client.user();

        if !is_own_topic(user, &topic) && !self.state.authorizer.can_subscribe(user, &topic).await? {
            return Err(DomainError::new(
                ErrorCode::Forbidden,
                format!("Not allowed to subscribe to {}", topic),
            ));
        }

        self.state.hub.subscribe(self.client.id(), topic.clone()).await;
        Ok(Some(json!({ "topic": topic.as_str() })))
    }

    async fn unsubscribe(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: TopicRequest = frame.payload_as()?;
        let topic = Topic::parse(&request.topic)?;
        let removed = self.state.hub.unsubscribe(self.client.id(), &topic).await;
        Ok(Some(json!({ "topic": topic.as_str(), "removed": removed })))
    }

    async fn update_presence(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: PresenceUpdateRequest = frame.payload_as()?;
        let status: PresenceState = request.status.parse()?;
        let presence = self.state.presence.update_status(&self.client.user().id, status).await?;
        Ok(Some(to_payload(&presence)?))
    }

    async fn initiate_call(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: CallInitiateRequest = frame.payload_as()?;
        let invitees = request
            .invitees
            .into_iter()
            .map(UserId::new)
            .collect::<Result<Vec<_>, _>>()?;

        let call = self
            .state
            .calls
            .initiate(
                &self.client.user().id,
                ConversationId::new(request.conversation_id)?,
                request.call_type,
                invitees,
            )
            .await?;

        self.state
            .hub
            .subscribe(self.client.id(), Topic::call(call.call_id.as_str()))
            .await;
        Ok(Some(to_payload(&call)?))
    }

    async fn enter_call(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: CallRefRequest = frame.payload_as()?;
        let call_id = CallId::new(request.call_id)?;
        let user = &self.client.user().id;

        let call = if frame.frame_type == "call.accept" {
            self.state.calls.accept(&call_id, user).await?
        } else {
            self.state.calls.join(&call_id, user).await?
        };

        self.state.hub.subscribe(self.client.id(), Topic::call(call_id.as_str())).await;
        Ok(Some(to_payload(&call)?))
    }

    async fn exit_call(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: CallRefRequest = frame.payload_as()?;
        let call_id = CallId::new(request.call_id)?;
        let user = &self.client.user().id;

        let call = if frame.frame_type == "call.end" {
            self.state.calls.end(&call_id, user).await?
        } else {
            self.state.calls.leave(&call_id, user).await?
        };

        self.state.hub.unsubscribe(self.client.id(), &Topic::call(call_id.as_str())).await;
        Ok(Some(to_payload(&call)?))
    }

    async fn relay(&self, frame: &InboundFrame, kind: SignalKind) -> Result<Option<JsonValue>, DomainError> {
        let request: CallSignalRequest = frame.payload_as()?;
        let call_id = CallId::new(request.call_id)?;
        let to = UserId::new(request.to_user)?;

        self.state
            .calls
            .relay(kind, &call_id, &self.client.user().id, &to, request.data)
            .await?;
        Ok(None)
    }

    async fn replay_ice(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let request: IceReplayRequest = frame.payload_as()?;
        let call_id = CallId::new(request.call_id)?;
        let from = UserId::new(request.from_user)?;

        let candidates = self
            .state
            .calls
            .replay_ice(&call_id, &self.client.user().id, &from)
            .await?;
        Ok(Some(json!({ "candidates": candidates })))
    }

    async fn execute(&self, frame: &InboundFrame) -> Result<Option<JsonValue>, DomainError> {
        let command = Command {
            name: frame.frame_type.clone(),
            request_id: frame.request_id().to_string(),
            issuer: self.client.user().clone(),
            connection_id: self.client.id(),
            payload: frame.payload.clone(),
        };
        let payload = self.state.commands.execute(command).await?;
        Ok((!payload.is_null()).then_some(payload))
    }

    fn reply(&self, frame: &OutboundFrame) {
        match self.client.send_frame(frame) {
            Ok(PushOutcome::Overflow) => {
                tracing::warn!(connection_id = %self.client.id(), "outbound queue full, closing connection");
                self.client.close();
            }
            Ok(_) => {}
            Err(e) => tracing::error!(frame_type = %frame.frame_type, error = %e, "failed to encode reply"),
        }
    }
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<JsonValue, DomainError> {
    serde_json::to_value(value)
        .map_err(|e| DomainError::new(ErrorCode::InternalError, format!("Failed to encode reply: {}", e)))
}

/// Reads frames until the peer goes away, stays silent past `pong_wait`,
/// or the connection is closed from the other side.
pub async fn read_pump<S, E>(mut stream: S, session: &mut Session, config: &ConnectionConfig)
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let client = session.client().clone();
    let mut closed = client.closed_signal();

    loop {
        if *closed.borrow() {
            break;
        }

        let next = tokio::select! {
            _ = closed.changed() => break,
            next = time::timeout(config.pong_wait, stream.next()) => next,
        };

        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %client.id(), error = %e, "socket read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::info!(connection_id = %client.id(), "no traffic within pong wait, closing");
                break;
            }
        };

        client.touch();
        session.heartbeat_if_due().await;
        match message {
            Message::Text(text) if text.len() > config.max_message_bytes => {
                let err = DomainError::new(ErrorCode::MalformedFrame, "Frame exceeds maximum size")
                    .with_detail("max_bytes", config.max_message_bytes.to_string());
                session.reply(&OutboundFrame::from_error("error", None, &err));
            }
            Message::Text(text) => session.handle_text(&text).await,
            Message::Binary(_) => {
                let err = DomainError::new(ErrorCode::MalformedFrame, "Binary frames are not supported");
                session.reply(&OutboundFrame::from_error("error", None, &err));
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                tracing::debug!(connection_id = %client.id(), "client sent close frame");
                break;
            }
        }
    }

    client.close();
}
