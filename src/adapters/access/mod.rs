//! Default collaborator adapters for subscription policy and commands.

mod topic_authorizer;
mod unsupported_commands;

pub use topic_authorizer::DefaultTopicAuthorizer;
pub use unsupported_commands::UnsupportedCommandExecutor;
