//! Default subscription policy.
//!
//! - own user and presence topics: always
//! - any presence or broadcast topic: allowed
//! - another user's personal topic or a system topic: denied
//! - conversation, call and upload topics: deferred to an optional
//!   membership authorizer, allowed when none is configured

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::{AuthenticatedUser, DomainError};
use crate::domain::routing::{Topic, TopicScope};
use crate::ports::{is_own_topic, TopicAuthorizer};

#[derive(Clone, Default)]
pub struct DefaultTopicAuthorizer {
    membership: Option<Arc<dyn TopicAuthorizer>>,
}

impl DefaultTopicAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks conversation, call and upload topics with `membership`.
    pub fn with_membership(membership: Arc<dyn TopicAuthorizer>) -> Self {
        Self {
            membership: Some(membership),
        }
    }
}

#[async_trait]
impl TopicAuthorizer for DefaultTopicAuthorizer {
    async fn can_subscribe(&self, user: &AuthenticatedUser, topic: &Topic) -> Result<bool, DomainError> {
        if is_own_topic(user, topic) {
            return Ok(true);
        }
        match topic.scope() {
            TopicScope::Presence | TopicScope::Broadcast => Ok(true),
            TopicScope::User | TopicScope::System => Ok(false),
            TopicScope::Conversation | TopicScope::Call | TopicScope::Upload => match &self.membership {
                Some(membership) => membership.can_subscribe(user, topic).await,
                None => Ok(true),
            },
        }
    }
}
