//! WebSocket frame protocol.
//!
//! Client → server frames: `{type, request_id?, payload}`. A missing
//! request id is filled in server-side so every reply can reference one.
//!
//! Server → client frames: `{type, request_id?, success, payload?, error?}`.
//! Events pushed from the bus carry the topic they arrived on.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::domain::call::CallType;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::ports::RateLimitResult;

// ============================================
// Client → Server
// ============================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
}

impl InboundFrame {
    /// Parses a text frame, assigning a request id when the client sent none.
    pub fn parse(text: &str) -> Result<Self, DomainError> {
        let mut frame: InboundFrame = serde_json::from_str(text)
            .map_err(|e| DomainError::new(ErrorCode::MalformedFrame, format!("Malformed frame: {}", e)))?;

        if frame.frame_type.trim().is_empty() {
            return Err(DomainError::new(ErrorCode::MalformedFrame, "Frame type is required"));
        }
        if frame.request_id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            frame.request_id = Some(Uuid::new_v4().to_string());
        }
        Ok(frame)
    }

    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or_default()
    }

    /// Decodes the payload into a typed shape, reporting a validation error.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::new(
                ErrorCode::ValidationFailed,
                format!("Invalid payload for {}: {}", self.frame_type, e),
            )
        })
    }
}

/// `subscribe` / `unsubscribe`.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicRequest {
    pub topic: String,
}

/// `presence.update`.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceUpdateRequest {
    pub status: String,
}

/// `call.initiate`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallInitiateRequest {
    pub conversation_id: String,
    pub call_type: CallType,
    pub invitees: Vec<String>,
}

/// `call.accept`, `call.join`, `call.leave`, `call.end`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRefRequest {
    pub call_id: String,
}

/// `call.offer`, `call.answer`, `call.ice`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallSignalRequest {
    pub call_id: String,
    pub to_user: String,
    #[serde(default)]
    pub data: JsonValue,
}

/// `call.ice.replay`.
#[derive(Debug, Clone, Deserialize)]
pub struct IceReplayRequest {
    pub call_id: String,
    pub from_user: String,
}

/// Frame categories with their own local quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameCategory {
    Typing,
    ReadReceipt,
    Presence,
    CallSignal,
    Ping,
}

impl FrameCategory {
    /// Category of an inbound frame type, if it is locally limited.
    pub fn of(frame_type: &str) -> Option<Self> {
        match frame_type {
            "ping" => Some(Self::Ping),
            "typing.start" | "typing.stop" | "typing.started" | "typing.stopped" => Some(Self::Typing),
            "message.read" | "read_receipt" => Some(Self::ReadReceipt),
            "presence.update" => Some(Self::Presence),
            "call.offer" | "call.answer" | "call.ice" => Some(Self::CallSignal),
            _ => None,
        }
    }
}

// ============================================
// Server → Client
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundFrame {
    pub fn ok(frame_type: impl Into<String>, request_id: Option<String>, payload: Option<JsonValue>) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id,
            success: true,
            topic: None,
            payload,
            error: None,
        }
    }

    pub fn pong(request_id: Option<String>) -> Self {
        Self::ok("pong", request_id, None)
    }

    /// An event pushed from a subscribed topic.
    pub fn event(event_type: impl Into<String>, topic: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::ok(event_type, None, Some(payload))
        }
    }

    /// Rejection of a request, echoing its type and id.
    pub fn from_error(frame_type: impl Into<String>, request_id: Option<String>, err: &DomainError) -> Self {
        let payload = (!err.details.is_empty()).then(|| json!({ "code": err.code.to_string(), "details": err.details }));
        Self {
            frame_type: frame_type.into(),
            request_id,
            success: false,
            topic: None,
            payload,
            error: Some(err.message.clone()),
        }
    }

    /// The 429-equivalent reply for a limited request.
    pub fn rate_limited(frame_type: impl Into<String>, request_id: Option<String>, result: &RateLimitResult) -> Self {
        Self {
            frame_type: frame_type.into(),
            request_id,
            success: false,
            topic: None,
            payload: Some(json!({
                "status": 429,
                "limit": result.limit,
                "remaining": result.remaining,
                "reset_in": result.reset_in_secs(),
            })),
            error: Some("rate_limited".to_string()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
