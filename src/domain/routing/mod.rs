//! Topic naming and event-to-topic routing.

mod router;
mod topic;

pub use router::ChannelRouter;
pub use topic::{Topic, TopicScope, ALL_TOPICS_PATTERN, SYSTEM_OUTBOX_KEY, TOPIC_PREFIX};
