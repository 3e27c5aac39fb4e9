//! Liveness endpoint.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::adapters::websocket::Hub;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
}

pub async fn health(State(hub): State<Arc<Hub>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: hub.client_count().await,
    })
}

pub fn health_router(hub: Arc<Hub>) -> Router {
    Router::new().route("/health", get(health)).with_state(hub)
}
