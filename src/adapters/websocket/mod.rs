//! WebSocket edge: the connection hub and per-client pumps.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         Event Bus                                   │
//! │   TransportEventBus over InMemoryTransport / RedisTransport         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ dispatches
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      HubBroadcaster                                 │
//! │   - Re-encodes each delivery as an event frame                      │
//! │   - Broadcasts on the topic it arrived on                           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           Hub                                       │
//! │   topic → connections    connection → topics                        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │ bounded queue per client
//!                                     ▼
//!                write pump ──► socket ──► read pump ──► Session
//! ```
//!
//! # Components
//!
//! - [`messages`] - Frame protocol
//! - [`queue`] - Bounded outbound queue with overflow policy
//! - [`client`] - Client handle and write pump
//! - [`session`] - Frame dispatch and read pump
//! - [`local_limiter`] - Per-connection frame quotas
//! - [`hub`] - Connection and subscription registry
//! - [`handler`] - Axum upgrade handler
//! - [`bridge`] - Event bus to hub forwarding

pub mod bridge;
pub mod client;
pub mod handler;
pub mod hub;
pub mod local_limiter;
pub mod messages;
pub mod queue;
pub mod session;

pub use bridge::HubBroadcaster;
pub use client::{write_pump, ClientHandle, ConnectionConfig};
pub use handler::{authorize_connect, serve_connection, websocket_router, ws_handler, WebSocketState};
pub use hub::Hub;
pub use local_limiter::{LocalQuotas, LocalRateLimiter};
pub use messages::{FrameCategory, InboundFrame, OutboundFrame};
pub use queue::{OutboundQueue, OverflowPolicy, PushOutcome};
pub use session::{read_pump, Session};
