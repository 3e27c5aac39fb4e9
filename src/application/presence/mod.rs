//! Presence tracking services.

mod sweeper;
mod tracker;

pub use sweeper::{PresenceSweeper, PresenceSweeperConfig};
pub use tracker::PresenceTracker;
