//! Call lifecycle and WebRTC signaling vocabulary.
//!
//! A call moves `RINGING -> CONNECTED -> ENDED` (or straight from
//! `RINGING` to `ENDED` when cancelled or declined). Reaching `CONNECTED`
//! stamps `connected_at`, which is what call duration is measured from.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use super::foundation::{
    CallId, ConversationId, DomainError, ErrorCode, StateMachine, Timestamp, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ringing,
    Connected,
    Ended,
}

impl StateMachine for CallStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        match self {
            CallStatus::Ringing => vec![CallStatus::Connected, CallStatus::Ended],
            CallStatus::Connected => vec![CallStatus::Ended],
            CallStatus::Ended => vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Invited,
    Joined,
    Left,
}

/// Shared state of one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    pub call_id: CallId,
    pub conversation_id: ConversationId,
    pub initiator: UserId,
    pub call_type: CallType,
    pub status: CallStatus,
    pub participants: BTreeMap<UserId, ParticipantStatus>,
    pub started_at: Timestamp,
    pub connected_at: Option<Timestamp>,
    pub ended_at: Option<Timestamp>,
}

impl CallState {
    /// Starts ringing. The initiator is joined; everyone else is invited.
    pub fn initiate(
        call_id: CallId,
        conversation_id: ConversationId,
        initiator: UserId,
        call_type: CallType,
        invitees: impl IntoIterator<Item = UserId>,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let mut participants = BTreeMap::new();
        for invitee in invitees {
            if invitee != initiator {
                participants.insert(invitee, ParticipantStatus::Invited);
            }
        }
        if participants.is_empty() {
            return Err(DomainError::validation("invitees", "A call needs at least one invitee"));
        }
        participants.insert(initiator.clone(), ParticipantStatus::Joined);

        Ok(Self {
            call_id,
            conversation_id,
            initiator,
            call_type,
            status: CallStatus::Ringing,
            participants,
            started_at: now,
            connected_at: None,
            ended_at: None,
        })
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains_key(user)
    }

    pub fn participant_status(&self, user: &UserId) -> Option<ParticipantStatus> {
        self.participants.get(user).copied()
    }

    pub fn joined_count(&self) -> usize {
        self.participants
            .values()
            .filter(|s| **s == ParticipantStatus::Joined)
            .count()
    }

    /// Everyone except `user`.
    pub fn peers_of<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = &'a UserId> + 'a {
        self.participants.keys().filter(move |p| *p != user)
    }

    /// An invited participant answers a ringing call.
    pub fn accept(&mut self, user: &UserId, now: Timestamp) -> Result<(), DomainError> {
        self.require_participant(user)?;
        if self.participant_status(user) != Some(ParticipantStatus::Invited) {
            return Err(DomainError::new(
                ErrorCode::InvalidStateTransition,
                format!("User {} cannot accept call {}", user, self.call_id),
            ));
        }
        if self.status != CallStatus::Connected {
            self.status = self.status.transition_to(CallStatus::Connected)?;
            self.connected_at = Some(now);
        }
        self.participants.insert(user.clone(), ParticipantStatus::Joined);
        Ok(())
    }

    /// Joins (or rejoins) a call. On a ringing call this is an accept.
    pub fn join(&mut self, user: &UserId, now: Timestamp) -> Result<(), DomainError> {
        self.require_participant(user)?;
        match self.status {
            CallStatus::Ringing => self.accept(user, now),
            CallStatus::Connected => {
                self.participants.insert(user.clone(), ParticipantStatus::Joined);
                Ok(())
            }
            CallStatus::Ended => Err(self.ended_error()),
        }
    }

    /// Leaves the call. Returns true when this ended the call.
    ///
    /// A connected call ends once fewer than two participants remain
    /// joined. A ringing call ends when the initiator cancels or the last
    /// invitee declines.
    pub fn leave(&mut self, user: &UserId, now: Timestamp) -> Result<bool, DomainError> {
        self.require_participant(user)?;
        if self.status == CallStatus::Ended {
            return Err(self.ended_error());
        }
        self.participants.insert(user.clone(), ParticipantStatus::Left);

        let should_end = match self.status {
            CallStatus::Connected => self.joined_count() < 2,
            CallStatus::Ringing => {
                *user == self.initiator
                    || !self
                        .participants
                        .values()
                        .any(|s| *s == ParticipantStatus::Invited)
            }
            CallStatus::Ended => false,
        };
        if should_end {
            self.end(now)?;
        }
        Ok(should_end)
    }

    /// Ends the call and returns its connected duration, if it connected.
    pub fn end(&mut self, now: Timestamp) -> Result<Option<Duration>, DomainError> {
        self.status = self.status.transition_to(CallStatus::Ended)?;
        self.ended_at = Some(now);
        Ok(self.duration())
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.connected_at, self.ended_at) {
            (Some(connected), Some(ended)) => Some(ended.duration_since(&connected)),
            _ => None,
        }
    }

    fn require_participant(&self, user: &UserId) -> Result<(), DomainError> {
        if self.is_participant(user) {
            Ok(())
        } else {
            Err(DomainError::new(
                ErrorCode::Forbidden,
                format!("User {} is not a participant of call {}", user, self.call_id),
            ))
        }
    }

    fn ended_error(&self) -> DomainError {
        DomainError::new(
            ErrorCode::InvalidStateTransition,
            format!("Call {} has already ended", self.call_id),
        )
    }
}

/// Point-to-point WebRTC negotiation message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

impl SignalKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            SignalKind::Offer => "call.offer",
            SignalKind::Answer => "call.answer",
            SignalKind::Ice => "call.ice",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// Relayed SDP or ICE data addressed from one peer to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub call_id: CallId,
    pub from_user: UserId,
    pub to_user: UserId,
    /// SDP description or ICE candidate, passed through untouched.
    pub data: JsonValue,
}
