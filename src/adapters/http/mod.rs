//! HTTP adapters - the axum surface.
//!
//! - `GET /health` - liveness
//! - `GET /ws` - WebSocket upgrade
//! - `middleware` - bearer auth and ingress rate limits for routes mounted
//!   by the embedding application

pub mod health;
pub mod middleware;

pub use health::health_router;

use axum::http::HeaderValue;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::websocket::{websocket_router, WebSocketState};
use crate::config::ServerConfig;

/// Full application router with tracing, request ids, CORS and timeouts.
pub fn app_router(ws: WebSocketState, server: &ServerConfig) -> Router {
    let hub = ws.hub.clone();

    Router::new()
        .merge(health_router(hub))
        .merge(websocket_router(ws))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(cors_layer(server))
                .layer(TimeoutLayer::new(server.request_timeout())),
        )
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins_list()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() && !server.is_production() {
        return CorsLayer::permissive();
    }
    CorsLayer::new().allow_origin(origins)
}
