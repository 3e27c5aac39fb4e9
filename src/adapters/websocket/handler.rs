//! WebSocket upgrade handler and connection lifecycle.
//!
//! `GET /ws?token=...`
//!
//! 1. Validate the token and resolve the user
//! 2. Check the per-user connect limit
//! 3. Upgrade, register with the hub, auto-subscribe own topics
//! 4. Mark the device online
//! 5. Run the read and write pumps until either ends
//! 6. Unregister and record the connection as closed

use std::fmt::Display;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use futures::{Sink, Stream, StreamExt};
use serde::Deserialize;

use super::client::{write_pump, ClientHandle, ConnectionConfig};
use super::hub::Hub;
use super::session::{read_pump, Session};
use crate::adapters::http::middleware::auth::{auth_error_response, auth_failure};
use crate::adapters::http::middleware::rate_limit::too_many_requests;
use crate::application::{CallSignaling, PresenceTracker};
use crate::domain::foundation::AuthenticatedUser;
use crate::domain::routing::Topic;
use crate::ports::{CommandExecutor, RateLimiter, SessionValidator, TopicAuthorizer};

/// Everything a connection needs, shared across all of them.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: Arc<Hub>,
    pub presence: Arc<PresenceTracker>,
    pub calls: Arc<CallSignaling>,
    pub limiter: Arc<dyn RateLimiter>,
    pub authorizer: Arc<dyn TopicAuthorizer>,
    pub commands: Arc<dyn CommandExecutor>,
    pub validator: Arc<dyn SessionValidator>,
    pub config: Arc<ConnectionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// come from the query string; a bearer header is accepted as well.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WebSocketState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
) -> Response {
    let token = params.token.or_else(|| {
        headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    let user = match authorize_connect(&state, token.as_deref()).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Resolves the connecting user and applies the connect limit.
///
/// Runs before the upgrade so rejections are plain HTTP responses.
pub async fn authorize_connect(state: &WebSocketState, token: Option<&str>) -> Result<AuthenticatedUser, Response> {
    let Some(token) = token else {
        return Err(auth_failure(StatusCode::UNAUTHORIZED, "Missing token"));
    };

    let user = state
        .validator
        .validate(token)
        .await
        .map_err(|e| auth_error_response(&e))?;

    match state.limiter.allow_ws_connect(&user.id).await {
        Ok(result) if result.is_denied() => {
            tracing::info!(user_id = %user.id, "connect rate limit exceeded");
            return Err(too_many_requests(&result));
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(user_id = %user.id, error = %e, "rate limiter unavailable, allowing connect"),
    }
    Ok(user)
}

async fn handle_socket(socket: WebSocket, state: WebSocketState, user: AuthenticatedUser) {
    let (sink, stream) = socket.split();
    serve_connection(sink, stream, state, user).await;
}

/// Runs one authenticated connection to completion.
pub async fn serve_connection<Si, St, E>(sink: Si, stream: St, state: WebSocketState, user: AuthenticatedUser)
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let config = state.config.as_ref().clone();
    let client = Arc::new(ClientHandle::new(user, &config));
    let id = client.id();
    let user_id = client.user().id.clone();

    state.hub.register(client.clone()).await;
    state.hub.subscribe(id, Topic::user(user_id.as_str())).await;
    state.hub.subscribe(id, Topic::presence(user_id.as_str())).await;

    if let Err(e) = state
        .presence
        .set_online(&user_id, &client.user().device_id, &id)
        .await
    {
        tracing::warn!(user_id = %user_id, error = %e, "failed to record presence");
    }
    tracing::info!(connection_id = %id, user_id = %user_id, "client connected");

    let writer = tokio::spawn(write_pump(sink, client.clone(), config.clone()));
    let mut session = Session::new(state.clone(), client);
    read_pump(stream, &mut session, &config).await;

    state.hub.unregister(id).await;
    if let Err(e) = state.presence.connection_closed(&user_id, &id).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to clear presence");
    }
    if let Err(e) = writer.await {
        tracing::warn!(connection_id = %id, error = %e, "write pump ended abnormally");
    }
    tracing::info!(connection_id = %id, user_id = %user_id, "client disconnected");
}

/// Router exposing the upgrade endpoint at `/ws`.
pub fn websocket_router(state: WebSocketState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}
