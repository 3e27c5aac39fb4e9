//! chat-realtime - real-time event distribution for a chat platform
//!
//! Relays transactional outbox events onto Redis pub/sub topics, fans them
//! out to WebSocket clients, and carries presence, rate limiting and
//! WebRTC call signaling on the same connections.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
