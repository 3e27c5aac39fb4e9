//! Topic names of the form `channel:<scope>:<id>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Prefix shared by every topic.
pub const TOPIC_PREFIX: &str = "channel";

/// Pattern matching every topic, used by the bus's global subscription.
pub const ALL_TOPICS_PATTERN: &str = "channel:*";

/// Key of the fallback topic for events with no better destination.
pub const SYSTEM_OUTBOX_KEY: &str = "outbox";

/// Delivery scope of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicScope {
    Conversation,
    User,
    Call,
    Presence,
    Broadcast,
    Upload,
    System,
}

impl TopicScope {
    pub const ALL: [TopicScope; 7] = [
        TopicScope::Conversation,
        TopicScope::User,
        TopicScope::Call,
        TopicScope::Presence,
        TopicScope::Broadcast,
        TopicScope::Upload,
        TopicScope::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicScope::Conversation => "conversation",
            TopicScope::User => "user",
            TopicScope::Call => "call",
            TopicScope::Presence => "presence",
            TopicScope::Broadcast => "broadcast",
            TopicScope::Upload => "upload",
            TopicScope::System => "system",
        }
    }
}

impl fmt::Display for TopicScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| ValidationError::invalid_format("topic", format!("unknown scope '{}'", s)))
    }
}

/// A publish/subscribe destination.
///
/// Ordering compares the full name, so topic sets iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    name: String,
    scope: TopicScope,
}

impl Topic {
    /// Builds a topic from a scope and key. The key may itself contain `:`.
    pub fn new(scope: TopicScope, key: impl AsRef<str>) -> Self {
        Self {
            name: format!("{}:{}:{}", TOPIC_PREFIX, scope.as_str(), key.as_ref()),
            scope,
        }
    }

    pub fn conversation(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::Conversation, id)
    }

    pub fn user(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::User, id)
    }

    pub fn call(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::Call, id)
    }

    pub fn presence(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::Presence, id)
    }

    pub fn broadcast(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::Broadcast, id)
    }

    pub fn upload(id: impl AsRef<str>) -> Self {
        Self::new(TopicScope::Upload, id)
    }

    /// `channel:system:outbox`
    pub fn system_outbox() -> Self {
        Self::new(TopicScope::System, SYSTEM_OUTBOX_KEY)
    }

    /// Parses a full topic name.
    pub fn parse(name: &str) -> Result<Self, ValidationError> {
        let mut parts = name.splitn(3, ':');
        let prefix = parts.next().unwrap_or_default();
        let scope = parts.next().unwrap_or_default();
        let key = parts.next().unwrap_or_default();

        if prefix != TOPIC_PREFIX {
            return Err(ValidationError::invalid_format(
                "topic",
                format!("expected '{}:' prefix", TOPIC_PREFIX),
            ));
        }
        let scope: TopicScope = scope.parse()?;
        if key.trim().is_empty() {
            return Err(ValidationError::empty_field("topic key"));
        }
        Ok(Self::new(scope, key))
    }

    pub fn scope(&self) -> TopicScope {
        self.scope
    }

    /// The part after `channel:<scope>:`.
    pub fn key(&self) -> &str {
        let offset = TOPIC_PREFIX.len() + self.scope.as_str().len() + 2;
        &self.name[offset..]
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for Topic {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::parse(s)
    }
}

impl TryFrom<String> for Topic {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.name
    }
}
