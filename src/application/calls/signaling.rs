//! CallSignaling - call lifecycle and point-to-point WebRTC relay.
//!
//! Signals and lifecycle events are pushed through the pub/sub transport.
//! Every signal goes to the call topic and to the target peer's user topic,
//! so a peer that has not yet subscribed to the call still receives it.
//! ICE candidates are also kept in a capped replay list.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::domain::call::{CallState, CallStatus, CallType, SignalKind, SignalPayload};
use crate::domain::foundation::{
    CallId, ConversationId, DomainError, Envelope, ErrorCode, Timestamp, UserId,
};
use crate::domain::realtime_event::event_types;
use crate::domain::routing::Topic;
use crate::ports::{CallMutation, CallStore, PubSubTransport, RateLimiter};

#[derive(Debug, Clone)]
pub struct CallSignalingConfig {
    /// Lifetime of call state after the last write.
    pub state_ttl: Duration,
    /// Candidates kept per (call, from, to).
    pub ice_cap: usize,
    pub ice_ttl: Duration,
}

impl Default for CallSignalingConfig {
    fn default() -> Self {
        Self {
            state_ttl: Duration::from_secs(3600),
            ice_cap: 50,
            ice_ttl: Duration::from_secs(300),
        }
    }
}

pub struct CallSignaling {
    store: Arc<dyn CallStore>,
    transport: Arc<dyn PubSubTransport>,
    limiter: Arc<dyn RateLimiter>,
    config: CallSignalingConfig,
}

impl CallSignaling {
    pub fn new(
        store: Arc<dyn CallStore>,
        transport: Arc<dyn PubSubTransport>,
        limiter: Arc<dyn RateLimiter>,
        config: CallSignalingConfig,
    ) -> Self {
        Self {
            store,
            transport,
            limiter,
            config,
        }
    }

    /// Starts ringing every invitee.
    ///
    /// Gated by the call-initiate limiter; a limiter outage lets the call through.
    pub async fn initiate(
        &self,
        initiator: &UserId,
        conversation_id: ConversationId,
        call_type: CallType,
        invitees: Vec<UserId>,
    ) -> Result<CallState, DomainError> {
        match self.limiter.allow_call_initiate(initiator).await {
            Ok(result) if result.is_denied() => {
                return Err(DomainError::new(ErrorCode::RateLimited, "Too many calls started")
                    .with_detail("limit", result.limit.to_string())
                    .with_detail("remaining", result.remaining.to_string())
                    .with_detail("reset_in", result.reset_in_secs().to_string()));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(user_id = %initiator, error = %e, "call limiter unavailable, allowing"),
        }

        let call_id = CallId::new(Uuid::new_v4().to_string())?;
        let call = CallState::initiate(
            call_id,
            conversation_id,
            initiator.clone(),
            call_type,
            invitees,
            Timestamp::now(),
        )?;
        self.store.save(&call, self.config.state_ttl).await?;

        tracing::info!(call_id = %call.call_id, initiator = %initiator, "call ringing");
        let peers: Vec<UserId> = call.peers_of(initiator).cloned().collect();
        self.publish_lifecycle(event_types::CALL_RINGING, &call, initiator, &peers)
            .await?;
        Ok(call)
    }

    pub async fn accept(&self, call_id: &CallId, user: &UserId) -> Result<CallState, DomainError> {
        let call = self
            .transition(call_id, &|call| call.accept(user, Timestamp::now()))
            .await?;

        self.publish_lifecycle(event_types::CALL_ACCEPTED, &call, user, &[])
            .await?;
        Ok(call)
    }

    /// Joins or rejoins. A join on a ringing call counts as an accept.
    pub async fn join(&self, call_id: &CallId, user: &UserId) -> Result<CallState, DomainError> {
        let call = self
            .transition(call_id, &|call| call.join(user, Timestamp::now()))
            .await?;

        self.publish_lifecycle(event_types::CALL_JOINED, &call, user, &[])
            .await?;
        Ok(call)
    }

    /// Leaves the call, ending it when too few participants remain.
    pub async fn leave(&self, call_id: &CallId, user: &UserId) -> Result<CallState, DomainError> {
        // leave() refuses an ended call, so an ENDED result means this leave ended it.
        let call = self
            .transition(call_id, &|call| call.leave(user, Timestamp::now()).map(|_| ()))
            .await?;

        self.publish_lifecycle(event_types::CALL_LEFT, &call, user, &[])
            .await?;
        if call.status == CallStatus::Ended {
            self.publish_ended(&call, user).await?;
        }
        Ok(call)
    }

    /// Ends the call for everyone. Only participants may end a call.
    pub async fn end(&self, call_id: &CallId, user: &UserId) -> Result<CallState, DomainError> {
        let call = self
            .transition(call_id, &|call| {
                if !call.is_participant(user) {
                    return Err(forbidden(user, call_id));
                }
                call.end(Timestamp::now()).map(|_| ())
            })
            .await?;

        self.publish_ended(&call, user).await?;
        Ok(call)
    }

    /// Relays an offer, answer or ICE candidate from one peer to another.
    pub async fn relay(
        &self,
        kind: SignalKind,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
        data: JsonValue,
    ) -> Result<(), DomainError> {
        let call = self.load(call_id).await?;
        if !call.is_participant(from) {
            return Err(forbidden(from, call_id));
        }
        if !call.is_participant(to) {
            return Err(forbidden(to, call_id));
        }
        if call.status == CallStatus::Ended {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("Call {} has already ended", call_id),
            ));
        }

        if kind == SignalKind::Ice {
            self.store
                .append_ice(call_id, from, to, &data, self.config.ice_cap, self.config.ice_ttl)
                .await?;
        }

        let signal = SignalPayload {
            call_id: call_id.clone(),
            from_user: from.clone(),
            to_user: to.clone(),
            data,
        };
        let envelope = Envelope::new(
            kind.event_type(),
            "call",
            call_id.as_str(),
            serde_json::to_value(&signal).map_err(encode_error)?,
        );

        let topics = BTreeSet::from([Topic::call(call_id.as_str()), Topic::user(to.as_str())]);
        tracing::debug!(call_id = %call_id, kind = %kind, from = %from, to = %to, "relaying signal");
        self.publish(&envelope, &topics).await
    }

    /// Candidates `from` has sent to `requester`, oldest first.
    pub async fn replay_ice(
        &self,
        call_id: &CallId,
        requester: &UserId,
        from: &UserId,
    ) -> Result<Vec<JsonValue>, DomainError> {
        let call = self.load(call_id).await?;
        if !call.is_participant(requester) {
            return Err(forbidden(requester, call_id));
        }
        Ok(self.store.ice_candidates(call_id, from, requester).await?)
    }

    pub async fn get(&self, call_id: &CallId) -> Result<CallState, DomainError> {
        self.load(call_id).await
    }

    async fn transition(
        &self,
        call_id: &CallId,
        mutate: CallMutation<'_>,
    ) -> Result<CallState, DomainError> {
        Ok(self
            .store
            .update(call_id, self.config.state_ttl, mutate)
            .await?)
    }

    async fn load(&self, call_id: &CallId) -> Result<CallState, DomainError> {
        self.store.load(call_id).await?.ok_or_else(|| {
            DomainError::new(ErrorCode::CallNotFound, format!("Call {} not found", call_id))
        })
    }

    async fn publish_ended(&self, call: &CallState, actor: &UserId) -> Result<(), DomainError> {
        let everyone: Vec<UserId> = call.participants.keys().cloned().collect();
        tracing::info!(
            call_id = %call.call_id,
            duration_secs = call.duration().map(|d| d.num_seconds()),
            "call ended"
        );
        self.publish_lifecycle(event_types::CALL_ENDED, call, actor, &everyone)
            .await
    }

    /// Publishes to the call topic and to each listed user's topic.
    async fn publish_lifecycle(
        &self,
        event_type: &str,
        call: &CallState,
        actor: &UserId,
        notify: &[UserId],
    ) -> Result<(), DomainError> {
        let mut payload = json!({
            "call_id": call.call_id,
            "user_id": actor,
            "conversation_id": call.conversation_id,
            "call_type": call.call_type,
            "status": call.status,
            "participants": call.participants,
        });
        if let Some(duration) = call.duration() {
            payload["duration_secs"] = json!(duration.num_seconds());
        }
        let envelope = Envelope::new(event_type, "call", call.call_id.as_str(), payload);

        let mut topics = BTreeSet::from([Topic::call(call.call_id.as_str())]);
        topics.extend(notify.iter().map(|u| Topic::user(u.as_str())));
        self.publish(&envelope, &topics).await
    }

    /// Publishes to every topic independently; fails only if all fail.
    async fn publish(&self, envelope: &Envelope, topics: &BTreeSet<Topic>) -> Result<(), DomainError> {
        let bytes = envelope.to_bytes().map_err(encode_error)?;

        let mut delivered = 0;
        let mut last_error = None;
        for topic in topics {
            match self.transport.publish(topic.as_str(), bytes.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(topic = %topic, event_type = %envelope.event_type, error = %e, "signal publish failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn forbidden(user: &UserId, call_id: &CallId) -> DomainError {
    DomainError::new(
        ErrorCode::Forbidden,
        format!("User {} is not a participant of call {}", user, call_id),
    )
}

fn encode_error(e: serde_json::Error) -> DomainError {
    DomainError::new(ErrorCode::InternalError, format!("Failed to encode signal: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::events::InMemoryTransport;
    use crate::adapters::rate_limiter::{InMemoryRateLimiter, RateLimitConfig, ScopeLimits};
    use crate::adapters::signaling::InMemoryCallStore;
    use crate::domain::call::ParticipantStatus;
    use crate::ports::SignalingError;
    use async_trait::async_trait;

    /// Yields to the scheduler before every store call so concurrent
    /// transitions interleave.
    struct InterleavingStore(InMemoryCallStore);

    #[async_trait]
    impl CallStore for InterleavingStore {
        async fn save(&self, call: &CallState, ttl: Duration) -> Result<(), SignalingError> {
            tokio::task::yield_now().await;
            self.0.save(call, ttl).await
        }

        async fn load(&self, call_id: &CallId) -> Result<Option<CallState>, SignalingError> {
            tokio::task::yield_now().await;
            self.0.load(call_id).await
        }

        async fn update(
            &self,
            call_id: &CallId,
            ttl: Duration,
            mutate: CallMutation<'_>,
        ) -> Result<CallState, SignalingError> {
            tokio::task::yield_now().await;
            self.0.update(call_id, ttl, mutate).await
        }

        async fn append_ice(
            &self,
            call_id: &CallId,
            from: &UserId,
            to: &UserId,
            candidate: &JsonValue,
            cap: usize,
            ttl: Duration,
        ) -> Result<(), SignalingError> {
            self.0.append_ice(call_id, from, to, candidate, cap, ttl).await
        }

        async fn ice_candidates(
            &self,
            call_id: &CallId,
            from: &UserId,
            to: &UserId,
        ) -> Result<Vec<JsonValue>, SignalingError> {
            self.0.ice_candidates(call_id, from, to).await
        }
    }

    fn interleaving_signaling() -> CallSignaling {
        CallSignaling::new(
            Arc::new(InterleavingStore(InMemoryCallStore::new())),
            Arc::new(InMemoryTransport::new()),
            Arc::new(InMemoryRateLimiter::new(RateLimitConfig::default())),
            CallSignalingConfig::default(),
        )
    }

    async fn group_call(signaling: &CallSignaling) -> CallState {
        signaling
            .initiate(
                &uid("alice"),
                ConversationId::new("c1").unwrap(),
                CallType::Audio,
                vec![uid("bob"), uid("carol")],
            )
            .await
            .unwrap()
    }

    struct Fixture {
        signaling: CallSignaling,
        transport: Arc<InMemoryTransport>,
    }

    fn fixture_with_limits(config: RateLimitConfig) -> Fixture {
        let transport = Arc::new(InMemoryTransport::new());
        let signaling = CallSignaling::new(
            Arc::new(InMemoryCallStore::new()),
            transport.clone(),
            Arc::new(InMemoryRateLimiter::new(config)),
            CallSignalingConfig {
                ice_cap: 2,
                ..CallSignalingConfig::default()
            },
        );
        Fixture { signaling, transport }
    }

    fn fixture() -> Fixture {
        fixture_with_limits(RateLimitConfig::default())
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn event_types_on(transport: &InMemoryTransport, topic: &str) -> Vec<String> {
        transport
            .published_to(topic)
            .iter()
            .map(|bytes| Envelope::from_bytes(bytes).unwrap().event_type)
            .collect()
    }

    async fn ringing(f: &Fixture) -> CallState {
        f.signaling
            .initiate(
                &uid("alice"),
                ConversationId::new("c1").unwrap(),
                CallType::Video,
                vec![uid("bob")],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initiate_rings_invitees_on_their_user_topic() {
        let f = fixture();
        let call = ringing(&f).await;

        assert_eq!(call.status, CallStatus::Ringing);
        assert_eq!(event_types_on(&f.transport, "channel:user:bob"), vec!["call.ringing"]);
        let call_topic = format!("channel:call:{}", call.call_id);
        assert_eq!(event_types_on(&f.transport, &call_topic), vec!["call.ringing"]);
        assert!(f.transport.published_to("channel:user:alice").is_empty());
    }

    #[tokio::test]
    async fn initiate_is_rate_limited() {
        let f = fixture_with_limits(RateLimitConfig {
            call_initiate: ScopeLimits::per_minute(1),
            ..RateLimitConfig::default()
        });
        ringing(&f).await;

        let err = f
            .signaling
            .initiate(
                &uid("alice"),
                ConversationId::new("c1").unwrap(),
                CallType::Audio,
                vec![uid("bob")],
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::RateLimited);
        assert_eq!(err.details.get("remaining").map(String::as_str), Some("0"));
        assert_eq!(err.details.get("limit").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn offer_goes_to_call_and_peer_topics() {
        let f = fixture();
        let call = ringing(&f).await;

        f.signaling
            .relay(
                SignalKind::Offer,
                &call.call_id,
                &uid("alice"),
                &uid("bob"),
                json!({"sdp": "v=0"}),
            )
            .await
            .unwrap();

        let call_topic = format!("channel:call:{}", call.call_id);
        assert_eq!(
            event_types_on(&f.transport, &call_topic),
            vec!["call.ringing", "call.offer"]
        );
        let to_bob = f.transport.published_to("channel:user:bob");
        let offer = Envelope::from_bytes(to_bob.last().unwrap()).unwrap();
        assert_eq!(offer.event_type, "call.offer");
        assert_eq!(offer.payload["from_user"], "alice");
        assert_eq!(offer.payload["data"]["sdp"], "v=0");
    }

    #[tokio::test]
    async fn ice_is_kept_for_replay_up_to_cap() {
        let f = fixture();
        let call = ringing(&f).await;

        for n in 0..3 {
            f.signaling
                .relay(
                    SignalKind::Ice,
                    &call.call_id,
                    &uid("alice"),
                    &uid("bob"),
                    json!({"candidate": n}),
                )
                .await
                .unwrap();
        }

        let replay = f
            .signaling
            .replay_ice(&call.call_id, &uid("bob"), &uid("alice"))
            .await
            .unwrap();
        assert_eq!(replay, vec![json!({"candidate": 1}), json!({"candidate": 2})]);
    }

    #[tokio::test]
    async fn outsiders_cannot_relay() {
        let f = fixture();
        let call = ringing(&f).await;

        let err = f
            .signaling
            .relay(SignalKind::Offer, &call.call_id, &uid("mallory"), &uid("bob"), json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn unknown_call_is_not_found() {
        let f = fixture();
        let err = f
            .signaling
            .accept(&CallId::new("nope").unwrap(), &uid("bob"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CallNotFound);
    }

    #[tokio::test]
    async fn last_leave_ends_call_and_notifies_everyone() {
        let f = fixture();
        let call = ringing(&f).await;
        f.signaling.accept(&call.call_id, &uid("bob")).await.unwrap();

        let after = f.signaling.leave(&call.call_id, &uid("bob")).await.unwrap();

        assert_eq!(after.status, CallStatus::Ended);
        assert_eq!(
            event_types_on(&f.transport, "channel:user:alice"),
            vec!["call.ended"]
        );
        let ended = f.transport.published_to("channel:user:alice");
        let ended = Envelope::from_bytes(&ended[0]).unwrap();
        assert!(ended.payload.get("duration_secs").is_some());
    }

    #[tokio::test]
    async fn concurrent_accepts_both_stick() {
        let signaling = interleaving_signaling();
        let call = group_call(&signaling).await;

        let (bob_id, carol_id) = (uid("bob"), uid("carol"));
        let (bob, carol) = tokio::join!(
            signaling.accept(&call.call_id, &bob_id),
            signaling.accept(&call.call_id, &carol_id),
        );
        bob.unwrap();
        carol.unwrap();

        let stored = signaling.get(&call.call_id).await.unwrap();
        assert_eq!(stored.status, CallStatus::Connected);
        assert_eq!(stored.participant_status(&uid("bob")), Some(ParticipantStatus::Joined));
        assert_eq!(stored.participant_status(&uid("carol")), Some(ParticipantStatus::Joined));
    }

    #[tokio::test]
    async fn accept_racing_end_never_revives_the_call() {
        let signaling = interleaving_signaling();
        let call = group_call(&signaling).await;

        let (alice_id, bob_id) = (uid("alice"), uid("bob"));
        let (ended, accepted) = tokio::join!(
            signaling.end(&call.call_id, &alice_id),
            signaling.accept(&call.call_id, &bob_id),
        );
        ended.unwrap();

        let stored = signaling.get(&call.call_id).await.unwrap();
        assert_eq!(stored.status, CallStatus::Ended);
        if let Err(e) = accepted {
            assert_eq!(e.code, ErrorCode::InvalidStateTransition);
        }
    }

    #[tokio::test]
    async fn relay_on_ended_call_is_rejected() {
        let f = fixture();
        let call = ringing(&f).await;
        f.signaling.end(&call.call_id, &uid("alice")).await.unwrap();

        let err = f
            .signaling
            .relay(SignalKind::Answer, &call.call_id, &uid("bob"), &uid("alice"), json!({}))
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidStateTransition);
    }

    #[tokio::test]
    async fn publish_survives_one_failing_topic() {
        let f = fixture();
        let call = ringing(&f).await;
        f.transport.fail_topic("channel:user:bob");

        f.signaling
            .relay(SignalKind::Offer, &call.call_id, &uid("alice"), &uid("bob"), json!({}))
            .await
            .unwrap();

        f.transport.set_fail_all(true);
        let err = f
            .signaling
            .relay(SignalKind::Offer, &call.call_id, &uid("alice"), &uid("bob"), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportError);
    }
}
