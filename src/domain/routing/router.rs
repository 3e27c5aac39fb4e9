//! Channel router: maps a domain event to the topics it is published on.
//!
//! Routing is a pure function of `(event_type, aggregate_type,
//! aggregate_id, payload)`. Every input yields at least one topic; events
//! the router does not recognize go to `channel:system:outbox` so nothing
//! is dropped on the floor.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use super::topic::{Topic, TopicScope};
use crate::domain::foundation::Envelope;

/// Stateless router from events to topic sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelRouter;

impl ChannelRouter {
    pub fn new() -> Self {
        Self
    }

    /// Resolves the topics for an envelope.
    pub fn resolve(&self, envelope: &Envelope) -> BTreeSet<Topic> {
        self.resolve_parts(
            &envelope.event_type,
            &envelope.aggregate_type,
            &envelope.aggregate_id,
            &envelope.payload,
        )
    }

    /// Resolves topics from the raw event fields.
    pub fn resolve_parts(
        &self,
        event_type: &str,
        aggregate_type: &str,
        aggregate_id: &str,
        payload: &JsonValue,
    ) -> BTreeSet<Topic> {
        let aggregate_id = aggregate_id.trim();
        let mut topics = BTreeSet::new();

        match aggregate_type.trim().to_ascii_lowercase().as_str() {
            "message" => route_message(event_type, aggregate_id, payload, &mut topics),
            "conversation" => push_keyed(&mut topics, TopicScope::Conversation, aggregate_id),
            // A typing aggregate id is the conversation id.
            "typing" => push_keyed(&mut topics, TopicScope::Conversation, aggregate_id),
            // Receipt aggregates are keyed by message; the conversation comes from the payload.
            "read_receipt" | "receipt" => {
                let key = payload_str(payload, "conversation_id").unwrap_or(aggregate_id);
                push_keyed(&mut topics, TopicScope::Conversation, key);
            }
            "call" => push_keyed(&mut topics, TopicScope::Call, aggregate_id),
            "presence" => push_keyed(&mut topics, TopicScope::Presence, aggregate_id),
            "user" | "notification" => push_keyed(&mut topics, TopicScope::User, aggregate_id),
            "upload" | "attachment" => push_keyed(&mut topics, TopicScope::Upload, aggregate_id),
            "broadcast" => push_keyed(&mut topics, TopicScope::Broadcast, aggregate_id),
            _ => {}
        }

        if topics.is_empty() {
            topics.insert(Topic::system_outbox());
        }
        topics
    }
}

fn route_message(event_type: &str, aggregate_id: &str, payload: &JsonValue, topics: &mut BTreeSet<Topic>) {
    if is_creation(event_type) {
        for recipient in recipients(payload) {
            topics.insert(Topic::user(recipient));
        }
        if !topics.is_empty() {
            return;
        }
    }

    match payload_str(payload, "conversation_id") {
        Some(conversation) => {
            topics.insert(Topic::conversation(conversation));
        }
        None => push_keyed(topics, TopicScope::Conversation, aggregate_id),
    }
}

fn is_creation(event_type: &str) -> bool {
    let event_type = event_type.to_ascii_lowercase();
    event_type.ends_with(".created") || event_type.ends_with(".sent")
}

/// `recipient_id` or `recipient_ids`, skipping blanks.
fn recipients(payload: &JsonValue) -> Vec<&str> {
    let mut found: Vec<&str> = payload_str(payload, "recipient_id").into_iter().collect();
    if let Some(list) = payload.get("recipient_ids").and_then(JsonValue::as_array) {
        found.extend(
            list.iter()
                .filter_map(JsonValue::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty()),
        );
    }
    found
}

fn payload_str<'a>(payload: &'a JsonValue, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn push_keyed(topics: &mut BTreeSet<Topic>, scope: TopicScope, key: &str) {
    if !key.is_empty() {
        topics.insert(Topic::new(scope, key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn names(topics: &BTreeSet<Topic>) -> Vec<&str> {
        topics.iter().map(Topic::as_str).collect()
    }

    #[test]
    fn message_with_conversation_routes_to_conversation_topic() {
        let topics = ChannelRouter::new().resolve_parts(
            "message.updated",
            "message",
            "m1",
            &json!({"conversation_id": "c1"}),
        );
        assert_eq!(names(&topics), vec!["channel:conversation:c1"]);
    }

    #[test]
    fn created_message_prefers_recipient_user_topic() {
        let topics = ChannelRouter::new().resolve_parts(
            "message.created",
            "message",
            "m1",
            &json!({"conversation_id": "c1", "recipient_id": "u2"}),
        );
        assert_eq!(names(&topics), vec!["channel:user:u2"]);
    }

    #[test]
    fn created_message_fans_out_to_every_recipient() {
        let topics = ChannelRouter::new().resolve_parts(
            "message.created",
            "message",
            "m1",
            &json!({"recipient_ids": ["u3", "u2", " "]}),
        );
        assert_eq!(names(&topics), vec!["channel:user:u2", "channel:user:u3"]);
    }

    #[test]
    fn recipient_is_ignored_for_non_creation_events() {
        let topics = ChannelRouter::new().resolve_parts(
            "message.deleted",
            "message",
            "m1",
            &json!({"conversation_id": "c1", "recipient_id": "u2"}),
        );
        assert_eq!(names(&topics), vec!["channel:conversation:c1"]);
    }

    #[test]
    fn message_without_payload_hints_falls_back_to_aggregate_id() {
        let topics = ChannelRouter::new().resolve_parts("message.created", "message", "c7", &json!({}));
        assert_eq!(names(&topics), vec!["channel:conversation:c7"]);
    }

    #[test]
    fn natural_keys_are_used_directly() {
        let router = ChannelRouter::new();
        let empty = json!(null);
        assert_eq!(names(&router.resolve_parts("typing.started", "typing", "c1", &empty)), vec!["channel:conversation:c1"]);
        assert_eq!(names(&router.resolve_parts("call.offer", "call", "k1", &empty)), vec!["channel:call:k1"]);
        assert_eq!(names(&router.resolve_parts("presence.changed", "presence", "u1", &empty)), vec!["channel:presence:u1"]);
        assert_eq!(names(&router.resolve_parts("upload.progress", "upload", "f1", &empty)), vec!["channel:upload:f1"]);
        assert_eq!(names(&router.resolve_parts("broadcast.sent", "broadcast", "all", &empty)), vec!["channel:broadcast:all"]);
        assert_eq!(names(&router.resolve_parts("user.updated", "user", "u1", &empty)), vec!["channel:user:u1"]);
    }

    #[test]
    fn typing_ignores_payload_but_receipts_read_it() {
        let router = ChannelRouter::new();
        let payload = json!({"conversation_id": "other"});
        assert_eq!(
            names(&router.resolve_parts("typing.started", "typing", "c1", &payload)),
            vec!["channel:conversation:c1"]
        );
        assert_eq!(
            names(&router.resolve_parts("message.read", "read_receipt", "m1", &payload)),
            vec!["channel:conversation:other"]
        );
    }

    #[test]
    fn aggregate_type_is_case_insensitive() {
        let topics = ChannelRouter::new().resolve_parts("x", "Conversation", "c1", &json!({}));
        assert_eq!(names(&topics), vec!["channel:conversation:c1"]);
    }

    #[test]
    fn unknown_aggregate_goes_to_system_fallback() {
        let topics = ChannelRouter::new().resolve_parts("invoice.paid", "invoice", "i1", &json!({}));
        assert_eq!(names(&topics), vec!["channel:system:outbox"]);
    }

    #[test]
    fn blank_aggregate_id_goes_to_system_fallback() {
        let topics = ChannelRouter::new().resolve_parts("call.ended", "call", "  ", &json!({}));
        assert_eq!(names(&topics), vec!["channel:system:outbox"]);
    }

    fn arb_aggregate_type() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("message".to_string()),
            Just("conversation".to_string()),
            Just("typing".to_string()),
            Just("call".to_string()),
            Just("presence".to_string()),
            Just("user".to_string()),
            Just("upload".to_string()),
            Just("broadcast".to_string()),
            "[a-z]{1,10}",
        ]
    }

    fn arb_payload() -> impl Strategy<Value = JsonValue> {
        (
            proptest::option::of("[a-z0-9]{0,6}"),
            proptest::option::of("[a-z0-9]{0,6}"),
            proptest::collection::vec("[a-z0-9]{0,6}", 0..4),
        )
            .prop_map(|(conversation, recipient, recipients)| {
                let mut payload = serde_json::Map::new();
                if let Some(c) = conversation {
                    payload.insert("conversation_id".into(), json!(c));
                }
                if let Some(r) = recipient {
                    payload.insert("recipient_id".into(), json!(r));
                }
                if !recipients.is_empty() {
                    payload.insert("recipient_ids".into(), json!(recipients));
                }
                JsonValue::Object(payload)
            })
    }

    proptest! {
        #[test]
        fn resolve_is_deterministic(
            event_type in "[a-z]{1,8}\\.(created|sent|updated|deleted)",
            aggregate_type in arb_aggregate_type(),
            aggregate_id in "[a-z0-9 ]{0,8}",
            payload in arb_payload(),
        ) {
            let router = ChannelRouter::new();
            let first = router.resolve_parts(&event_type, &aggregate_type, &aggregate_id, &payload);
            let second = router.resolve_parts(&event_type, &aggregate_type, &aggregate_id, &payload.clone());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn resolve_is_total(
            event_type in "[a-z.]{0,12}",
            aggregate_type in arb_aggregate_type(),
            aggregate_id in "[a-z0-9 ]{0,8}",
            payload in arb_payload(),
        ) {
            let topics = ChannelRouter::new().resolve_parts(&event_type, &aggregate_type, &aggregate_id, &payload);
            prop_assert!(!topics.is_empty());
            for topic in &topics {
                prop_assert!(Topic::parse(topic.as_str()).is_ok());
            }
        }
    }
}
