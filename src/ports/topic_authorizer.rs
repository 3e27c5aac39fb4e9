//! TopicAuthorizer port - who may subscribe to which topic.

use async_trait::async_trait;

use crate::domain::foundation::{AuthenticatedUser, DomainError};
use crate::domain::routing::{Topic, TopicScope};

/// Decides subscriptions to topics other than the caller's own.
#[async_trait]
pub trait TopicAuthorizer: Send + Sync {
    async fn can_subscribe(&self, user: &AuthenticatedUser, topic: &Topic) -> Result<bool, DomainError>;
}

/// A connection may always subscribe to its own user and presence topics.
pub fn is_own_topic(user: &AuthenticatedUser, topic: &Topic) -> bool {
    matches!(topic.scope(), TopicScope::User | TopicScope::Presence) && topic.key() == user.id.as_str()
}
