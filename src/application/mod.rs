//! Application layer - services that compose ports into use cases.
//!
//! - `presence` - online tracking, heartbeats and the stale sweep
//! - `calls` - call lifecycle and WebRTC relay

pub mod calls;
pub mod presence;

pub use calls::{CallSignaling, CallSignalingConfig};
pub use presence::{PresenceSweeper, PresenceSweeperConfig, PresenceTracker};
