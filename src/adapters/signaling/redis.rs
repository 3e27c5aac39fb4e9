//! Redis-backed call store.
//!
//! - `call:state:<call>` holds the JSON `CallState` with a TTL
//! - `call:ice:<call>:<from>:<to>` is a capped list of ICE candidates with a TTL
//!
//! Transitions are optimistic: the new state is written only if the key
//! still holds the exact JSON the mutation started from.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde_json::Value as JsonValue;

use crate::domain::call::CallState;
use crate::domain::foundation::{CallId, UserId};
use crate::ports::{CallMutation, CallStore, SignalingError};

const MAX_UPDATE_ATTEMPTS: usize = 16;

/// KEYS[1] state key; ARGV: expected JSON, new JSON, ttl seconds.
/// Returns 1 when written, 0 when the key changed or vanished.
static COMPARE_AND_SET: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if current ~= ARGV[1] then
            return 0
        end
        redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
        return 1
        "#,
    )
});

fn state_key(call_id: &CallId) -> String {
    format!("call:state:{}", call_id)
}

fn ice_key(call_id: &CallId, from: &UserId, to: &UserId) -> String {
    format!("call:ice:{}:{}:{}", call_id, from, to)
}

fn unavailable(e: redis::RedisError) -> SignalingError {
    SignalingError::Unavailable(e.to_string())
}

fn encode(call: &CallState) -> Result<String, SignalingError> {
    serde_json::to_string(call).map_err(|e| SignalingError::Corrupt {
        call_id: call.call_id.clone(),
        reason: e.to_string(),
    })
}

fn decode(call_id: &CallId, json: &str) -> Result<CallState, SignalingError> {
    serde_json::from_str(json).map_err(|e| SignalingError::Corrupt {
        call_id: call_id.clone(),
        reason: e.to_string(),
    })
}

#[derive(Clone)]
pub struct RedisCallStore {
    conn: MultiplexedConnection,
}

impl RedisCallStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CallStore for RedisCallStore {
    async fn save(&self, call: &CallState, ttl: Duration) -> Result<(), SignalingError> {
        let json = encode(call)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(state_key(&call.call_id))
            .arg(json)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn load(&self, call_id: &CallId) -> Result<Option<CallState>, SignalingError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(state_key(call_id)).await.map_err(unavailable)?;

        raw.map(|json| decode(call_id, &json)).transpose()
    }

    async fn update(
        &self,
        call_id: &CallId,
        ttl: Duration,
        mutate: CallMutation<'_>,
    ) -> Result<CallState, SignalingError> {
        let key = state_key(call_id);
        let mut conn = self.conn.clone();

        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let current: Option<String> = conn.get(&key).await.map_err(unavailable)?;
            let Some(current) = current else {
                return Err(SignalingError::CallNotFound(call_id.clone()));
            };

            let mut call = decode(call_id, &current)?;
            mutate(&mut call).map_err(SignalingError::Rejected)?;

            let written: i32 = COMPARE_AND_SET
                .key(&key)
                .arg(&current)
                .arg(encode(&call)?)
                .arg(ttl.as_secs().max(1))
                .invoke_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if written == 1 {
                return Ok(call);
            }
            tracing::debug!(call_id = %call_id, attempt, "call state changed concurrently, retrying");
        }

        Err(SignalingError::Unavailable(format!(
            "call {} still contended after {} attempts",
            call_id, MAX_UPDATE_ATTEMPTS
        )))
    }

    async fn append_ice(
        &self,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
        candidate: &JsonValue,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), SignalingError> {
        let key = ice_key(call_id, from, to);
        let cap = cap.max(1) as isize;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .rpush(&key, candidate.to_string())
            .ignore()
            .ltrim(&key, -cap, -1)
            .ignore()
            .expire(&key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn ice_candidates(
        &self,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
    ) -> Result<Vec<JsonValue>, SignalingError> {
        let mut conn = self.conn.clone();
        let raws: Vec<String> = conn
            .lrange(ice_key(call_id, from, to), 0, -1)
            .await
            .map_err(unavailable)?;

        Ok(raws
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(candidate) => Some(candidate),
                Err(e) => {
                    tracing::warn!(call_id = %call_id, error = %e, "skipping corrupt ICE candidate");
                    None
                }
            })
            .collect())
    }
}
