//! Typed view of the events that travel over the bus.
//!
//! Each known `event_type` has exactly one decode path. Anything else
//! becomes [`RealtimeEvent::Unknown`], which dispatch ignores so new event
//! types can be rolled out before every consumer understands them.
//!
//! Payload structs keep fields they do not name in `extra`, so forwarding
//! an event to clients never loses data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::call::{SignalKind, SignalPayload};
use super::presence::PresenceChanged;

/// Discriminator values with a dedicated decode path.
pub mod event_types {
    pub const MESSAGE_CREATED: &str = "message.created";
    pub const MESSAGE_SENT: &str = "message.sent";
    pub const MESSAGE_UPDATED: &str = "message.updated";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const MESSAGE_READ: &str = "message.read";
    pub const TYPING_STARTED: &str = "typing.started";
    pub const TYPING_STOPPED: &str = "typing.stopped";
    pub const PRESENCE_CHANGED: &str = "presence.changed";
    pub const CALL_OFFER: &str = "call.offer";
    pub const CALL_ANSWER: &str = "call.answer";
    pub const CALL_ICE: &str = "call.ice";
    pub const CALL_RINGING: &str = "call.ringing";
    pub const CALL_ACCEPTED: &str = "call.accepted";
    pub const CALL_JOINED: &str = "call.joined";
    pub const CALL_LEFT: &str = "call.left";
    pub const CALL_ENDED: &str = "call.ended";
    pub const CONVERSATION_UPDATED: &str = "conversation.updated";
    pub const CONVERSATION_MEMBER_ADDED: &str = "conversation.member_added";
    pub const CONVERSATION_MEMBER_REMOVED: &str = "conversation.member_removed";
    pub const UPLOAD_PROGRESS: &str = "upload.progress";
    pub const UPLOAD_COMPLETED: &str = "upload.completed";
    pub const BROADCAST: &str = "broadcast.sent";

    pub const ALL: &[&str] = &[
        MESSAGE_CREATED,
        MESSAGE_SENT,
        MESSAGE_UPDATED,
        MESSAGE_DELETED,
        MESSAGE_READ,
        TYPING_STARTED,
        TYPING_STOPPED,
        PRESENCE_CHANGED,
        CALL_OFFER,
        CALL_ANSWER,
        CALL_ICE,
        CALL_RINGING,
        CALL_ACCEPTED,
        CALL_JOINED,
        CALL_LEFT,
        CALL_ENDED,
        CONVERSATION_UPDATED,
        CONVERSATION_MEMBER_ADDED,
        CONVERSATION_MEMBER_REMOVED,
        UPLOAD_PROGRESS,
        UPLOAD_COMPLETED,
        BROADCAST,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceiptPayload {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

/// Payload of the lifecycle events a call emits on state changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallLifecyclePayload {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Ringing,
    Accepted,
    Joined,
    Left,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    #[serde(flatten)]
    pub body: Map<String, JsonValue>,
}

/// Closed set of event shapes the bus knows how to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    MessageCreated(MessagePayload),
    MessageUpdated(MessagePayload),
    MessageDeleted(MessagePayload),
    MessageRead(ReadReceiptPayload),
    Typing(TypingPayload),
    PresenceChanged(PresenceChanged),
    CallSignal(SignalKind, SignalPayload),
    CallLifecycle(CallPhase, CallLifecyclePayload),
    ConversationUpdated(ConversationPayload),
    UploadProgress(UploadPayload),
    Broadcast(BroadcastPayload),
    Unknown(String),
}

impl RealtimeEvent {
    /// Decodes a payload according to its discriminator.
    ///
    /// An unrecognized `event_type` is not an error; a recognized one with
    /// the wrong payload shape is.
    pub fn decode(event_type: &str, payload: &JsonValue) -> Result<Self, serde_json::Error> {
        use event_types::*;

        let payload = payload.clone();
        let event = match event_type {
            MESSAGE_CREATED | MESSAGE_SENT => Self::MessageCreated(serde_json::from_value(payload)?),
            MESSAGE_UPDATED => Self::MessageUpdated(serde_json::from_value(payload)?),
            MESSAGE_DELETED => Self::MessageDeleted(serde_json::from_value(payload)?),
            MESSAGE_READ => Self::MessageRead(serde_json::from_value(payload)?),
            TYPING_STARTED | TYPING_STOPPED => {
                let mut typing: TypingPayload = serde_json::from_value(payload)?;
                typing.is_typing = event_type == TYPING_STARTED;
                Self::Typing(typing)
            }
            PRESENCE_CHANGED => Self::PresenceChanged(serde_json::from_value(payload)?),
            CALL_OFFER => Self::CallSignal(SignalKind::Offer, serde_json::from_value(payload)?),
            CALL_ANSWER => Self::CallSignal(SignalKind::Answer, serde_json::from_value(payload)?),
            CALL_ICE => Self::CallSignal(SignalKind::Ice, serde_json::from_value(payload)?),
            CALL_RINGING => Self::CallLifecycle(CallPhase::Ringing, serde_json::from_value(payload)?),
            CALL_ACCEPTED => Self::CallLifecycle(CallPhase::Accepted, serde_json::from_value(payload)?),
            CALL_JOINED => Self::CallLifecycle(CallPhase::Joined, serde_json::from_value(payload)?),
            CALL_LEFT => Self::CallLifecycle(CallPhase::Left, serde_json::from_value(payload)?),
            CALL_ENDED => Self::CallLifecycle(CallPhase::Ended, serde_json::from_value(payload)?),
            CONVERSATION_UPDATED | CONVERSATION_MEMBER_ADDED | CONVERSATION_MEMBER_REMOVED => {
                Self::ConversationUpdated(serde_json::from_value(payload)?)
            }
            UPLOAD_PROGRESS | UPLOAD_COMPLETED => Self::UploadProgress(serde_json::from_value(payload)?),
            BROADCAST => Self::Broadcast(serde_json::from_value(payload)?),
            other => Self::Unknown(other.to_string()),
        };
        Ok(event)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Re-encodes the typed payload for forwarding.
    pub fn to_payload(&self) -> Result<JsonValue, serde_json::Error> {
        match self {
            Self::MessageCreated(p) | Self::MessageUpdated(p) | Self::MessageDeleted(p) => {
                serde_json::to_value(p)
            }
            Self::MessageRead(p) => serde_json::to_value(p),
            Self::Typing(p) => serde_json::to_value(p),
            Self::PresenceChanged(p) => serde_json::to_value(p),
            Self::CallSignal(_, p) => serde_json::to_value(p),
            Self::CallLifecycle(_, p) => serde_json::to_value(p),
            Self::ConversationUpdated(p) => serde_json::to_value(p),
            Self::UploadProgress(p) => serde_json::to_value(p),
            Self::Broadcast(p) => serde_json::to_value(p),
            Self::Unknown(_) => Ok(JsonValue::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::presence::PresenceState;
    use serde_json::json;

    #[test]
    fn message_created_and_sent_share_a_shape() {
        let payload = json!({"message_id": "m1", "conversation_id": "c1", "body": "hi"});
        for event_type in [event_types::MESSAGE_CREATED, event_types::MESSAGE_SENT] {
            match RealtimeEvent::decode(event_type, &payload).unwrap() {
                RealtimeEvent::MessageCreated(m) => {
                    assert_eq!(m.conversation_id.as_deref(), Some("c1"));
                    assert_eq!(m.extra["body"], "hi");
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn typing_flag_follows_event_type() {
        let payload = json!({"conversation_id": "c1", "user_id": "u1", "is_typing": true});
        match RealtimeEvent::decode(event_types::TYPING_STOPPED, &payload).unwrap() {
            RealtimeEvent::Typing(t) => assert!(!t.is_typing),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn presence_changed_decodes_status() {
        let payload = json!({"user_id": "u1", "status": "away", "online": true});
        match RealtimeEvent::decode(event_types::PRESENCE_CHANGED, &payload).unwrap() {
            RealtimeEvent::PresenceChanged(p) => assert_eq!(p.status, PresenceState::Away),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn call_signal_keeps_kind() {
        let payload = json!({"call_id": "k1", "from_user": "a", "to_user": "b", "data": {"sdp": "v=0"}});
        match RealtimeEvent::decode(event_types::CALL_ANSWER, &payload).unwrap() {
            RealtimeEvent::CallSignal(kind, p) => {
                assert_eq!(kind, SignalKind::Answer);
                assert_eq!(p.data["sdp"], "v=0");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let event = RealtimeEvent::decode("reaction.added", &json!({"emoji": "x"})).unwrap();
        assert!(event.is_unknown());
    }

    #[test]
    fn known_type_with_bad_shape_is_an_error() {
        assert!(RealtimeEvent::decode(event_types::TYPING_STARTED, &json!({"nope": 1})).is_err());
    }

    #[test]
    fn forwarding_preserves_unnamed_fields() {
        let payload = json!({"upload_id": "f1", "progress": 0.5, "bytes": 1024});
        let event = RealtimeEvent::decode(event_types::UPLOAD_PROGRESS, &payload).unwrap();
        assert_eq!(event.to_payload().unwrap(), payload);
    }
}
