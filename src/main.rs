//! chat-realtime server entry point.
//!
//! Wires Postgres (outbox), Redis (transport, presence, counters, call
//! state) and the axum WebSocket edge, then runs until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use chat_realtime::adapters::access::{DefaultTopicAuthorizer, UnsupportedCommandExecutor};
use chat_realtime::adapters::auth::JwtSessionValidator;
use chat_realtime::adapters::events::{OutboxProcessor, RedisTransport, TransportEventBus};
use chat_realtime::adapters::http::app_router;
use chat_realtime::adapters::postgres::PostgresOutboxStore;
use chat_realtime::adapters::presence::RedisPresenceStore;
use chat_realtime::adapters::rate_limiter::RedisRateLimiter;
use chat_realtime::adapters::signaling::RedisCallStore;
use chat_realtime::adapters::websocket::{Hub, HubBroadcaster, WebSocketState};
use chat_realtime::application::{CallSignaling, PresenceSweeper, PresenceTracker};
use chat_realtime::config::AppConfig;
use chat_realtime::ports::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    config.validate().context("validating configuration")?;

    init_tracing(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.server.environment,
        "starting chat-realtime"
    );

    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await
        .context("connecting to postgres")?;
    let outbox = Arc::new(PostgresOutboxStore::new(pool));
    if config.database.run_migrations {
        outbox.migrate().await?;
        tracing::info!("outbox migrations applied");
    }

    let redis_client = redis::Client::open(config.redis.url.as_str()).context("parsing redis url")?;
    let redis = tokio::time::timeout(config.redis.timeout(), redis_client.get_multiplexed_tokio_connection())
        .await
        .context("connecting to redis timed out")?
        .context("connecting to redis")?;
    let transport = Arc::new(RedisTransport::new(redis_client, redis.clone()));

    let bus = Arc::new(TransportEventBus::with_config(
        transport.clone(),
        config.event_bus.bus_config(),
    ));

    let hub = Arc::new(Hub::new());
    HubBroadcaster::new(hub.clone()).register(bus.as_ref());
    bus.start().await.context("starting event bus")?;

    let limiter: Arc<dyn RateLimiter> = Arc::new(RedisRateLimiter::new(redis.clone(), config.rate_limits.clone()));
    let presence = Arc::new(PresenceTracker::new(
        Arc::new(RedisPresenceStore::new(redis.clone(), config.presence.status_ttl())),
        bus.clone(),
    ));
    let calls = Arc::new(CallSignaling::new(
        Arc::new(RedisCallStore::new(redis)),
        transport.clone(),
        limiter.clone(),
        config.calls.signaling_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let processor = OutboxProcessor::with_config(outbox, transport, config.outbox.processor_config());
    let outbox_worker = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { processor.run(shutdown).await })
    };

    let sweeper = PresenceSweeper::new(presence.clone(), config.presence.sweeper_config());
    let sweep_worker = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    };

    let state = WebSocketState {
        hub,
        presence,
        calls,
        limiter,
        authorizer: Arc::new(DefaultTopicAuthorizer::new()),
        commands: Arc::new(UnsupportedCommandExecutor),
        validator: Arc::new(JwtSessionValidator::new(&config.auth.jwt_config())),
        config: Arc::new(config.websocket.connection_config()),
    };
    let app = app_router(state, &config.server);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    tracing::info!("shutting down background workers");
    let _ = shutdown_tx.send(true);
    for (name, worker) in [("outbox", outbox_worker), ("presence sweeper", sweep_worker)] {
        if let Err(e) = worker.await {
            tracing::warn!(worker = name, error = %e, "worker ended abnormally");
        }
    }
    bus.stop().await;

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if config.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
