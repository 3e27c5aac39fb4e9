//! Call signaling services.

mod signaling;

pub use signaling::{CallSignaling, CallSignalingConfig};
