//! Redis-backed presence store.
//!
//! ## Keys
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `presence:status:<user>` | string | JSON `PresenceStatus`, with TTL |
//! | `presence:conns:<user>` | set | live connection ids, TTL refreshed by every write |
//! | `presence:online` | set | user ids currently online |
//! | `presence:heartbeat` | sorted set | user id scored by last heartbeat (unix secs) |
//!
//! Each mutation is a Lua script touching all four keys, so instances
//! racing on one user always agree on which of them saw the transition.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::domain::foundation::{ConnectionId, DeviceId, Timestamp, UserId};
use crate::domain::presence::{PresenceState, PresenceStatus};
use crate::ports::{PresenceError, PresenceStore, PresenceUpdate};

const ONLINE_SET: &str = "presence:online";
const HEARTBEAT_INDEX: &str = "presence:heartbeat";

fn status_key(user: &UserId) -> String {
    format!("presence:status:{}", user)
}

fn connections_key(user: &UserId) -> String {
    format!("presence:conns:{}", user)
}

/// Shared helper: decode a JSON record, overwrite fields, re-encode.
const LUA_PRELUDE: &str = r#"
local function patch(raw, fields)
    local ok, record = pcall(cjson.decode, raw)
    if not ok or type(record) ~= 'table' then
        return raw
    end
    for k, v in pairs(fields) do
        record[k] = v
    end
    return cjson.encode(record)
end
"#;

fn script(body: &str) -> Script {
    Script::new(&format!("{}{}", LUA_PRELUDE, body))
}

// KEYS: conns, status, online, heartbeat
// ARGV: connection, user, now_secs, ttl_secs, fresh_record, now_rfc3339, device
const ADD_CONNECTION_LUA: &str = r#"
        redis.call('SADD', KEYS[1], ARGV[1])
        redis.call('EXPIRE', KEYS[1], ARGV[4])
        local count = redis.call('SCARD', KEYS[1])
        local was_online = redis.call('SISMEMBER', KEYS[3], ARGV[2])
        redis.call('SADD', KEYS[3], ARGV[2])
        redis.call('ZADD', KEYS[4], ARGV[3], ARGV[2])
        local base = ARGV[5]
        local existing = redis.call('GET', KEYS[2])
        if was_online == 1 and existing then
            base = existing
        end
        local record = patch(base, {
            online = true,
            connection_count = count,
            last_seen = ARGV[6],
            device_id = ARGV[7],
        })
        redis.call('SET', KEYS[2], record, 'EX', ARGV[4])
        return {was_online, record}
        "#;
static ADD_CONNECTION: Lazy<Script> = Lazy::new(|| script(ADD_CONNECTION_LUA));

// KEYS: conns, status, online, heartbeat
// ARGV: connection, user, ttl_secs, now_rfc3339
const REMOVE_CONNECTION_LUA: &str = r#"
        redis.call('SREM', KEYS[1], ARGV[1])
        local count = redis.call('SCARD', KEYS[1])
        local existing = redis.call('GET', KEYS[2])
        if count > 0 then
            redis.call('EXPIRE', KEYS[1], ARGV[3])
            if existing then
                existing = patch(existing, { connection_count = count })
                redis.call('SET', KEYS[2], existing, 'EX', ARGV[3])
            end
            return {0, existing or ''}
        end
        redis.call('DEL', KEYS[1])
        local was_online = redis.call('SREM', KEYS[3], ARGV[2])
        redis.call('ZREM', KEYS[4], ARGV[2])
        if existing then
            existing = patch(existing, {
                online = false,
                status = 'offline',
                connection_count = 0,
                last_seen = ARGV[4],
            })
            redis.call('SET', KEYS[2], existing, 'EX', ARGV[3])
        end
        return {was_online, existing or ''}
        "#;
static REMOVE_CONNECTION: Lazy<Script> = Lazy::new(|| script(REMOVE_CONNECTION_LUA));

// KEYS: conns, status, online, heartbeat
// ARGV: user, ttl_secs, now_rfc3339
const MARK_OFFLINE_LUA: &str = r#"
        redis.call('DEL', KEYS[1])
        local was_online = redis.call('SREM', KEYS[3], ARGV[1])
        redis.call('ZREM', KEYS[4], ARGV[1])
        local existing = redis.call('GET', KEYS[2])
        if existing then
            existing = patch(existing, {
                online = false,
                status = 'offline',
                connection_count = 0,
                last_seen = ARGV[3],
            })
            redis.call('SET', KEYS[2], existing, 'EX', ARGV[2])
        end
        return {was_online, existing or ''}
        "#;
static MARK_OFFLINE: Lazy<Script> = Lazy::new(|| script(MARK_OFFLINE_LUA));

// KEYS: status, online, heartbeat, conns
// ARGV: user, status, now_secs, now_rfc3339, ttl_secs, fresh_record
// Returns {-1, ''} when the user is not online.
const SET_STATUS_LUA: &str = r#"
        if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 0 then
            return {-1, ''}
        end
        redis.call('EXPIRE', KEYS[4], ARGV[5])
        local existing = redis.call('GET', KEYS[1]) or ARGV[6]
        local ok, decoded = pcall(cjson.decode, existing)
        local changed = 1
        if ok and type(decoded) == 'table' and decoded.status == ARGV[2] then
            changed = 0
        end
        local record = patch(existing, { status = ARGV[2], last_seen = ARGV[4] })
        redis.call('SET', KEYS[1], record, 'EX', ARGV[5])
        redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
        return {changed, record}
        "#;
static SET_STATUS: Lazy<Script> = Lazy::new(|| script(SET_STATUS_LUA));

// KEYS: conns, status, online, heartbeat
// ARGV: connection, user, now_secs, ttl_secs, fresh_record, now_rfc3339
const TOUCH_LUA: &str = r#"
        redis.call('SADD', KEYS[1], ARGV[1])
        redis.call('EXPIRE', KEYS[1], ARGV[4])
        local count = redis.call('SCARD', KEYS[1])
        local was_online = redis.call('SISMEMBER', KEYS[3], ARGV[2])
        redis.call('SADD', KEYS[3], ARGV[2])
        redis.call('ZADD', KEYS[4], ARGV[3], ARGV[2])
        local base = ARGV[5]
        local existing = redis.call('GET', KEYS[2])
        if was_online == 1 and existing then
            base = existing
        end
        local record = patch(base, {
            online = true,
            connection_count = count,
            last_seen = ARGV[6],
        })
        redis.call('SET', KEYS[2], record, 'EX', ARGV[4])
        return {was_online, record}
        "#;
static TOUCH: Lazy<Script> = Lazy::new(|| script(TOUCH_LUA));

#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: MultiplexedConnection,
    status_ttl: Duration,
}

impl RedisPresenceStore {
    pub fn new(conn: MultiplexedConnection, status_ttl: Duration) -> Self {
        Self { conn, status_ttl }
    }

    fn ttl_secs(&self) -> u64 {
        self.status_ttl.as_secs().max(1)
    }
}

fn unavailable(e: redis::RedisError) -> PresenceError {
    PresenceError::Unavailable(e.to_string())
}

fn encode(record: &PresenceStatus) -> Result<String, PresenceError> {
    serde_json::to_string(record).map_err(|e| PresenceError::Corrupt {
        user: record.user_id.clone(),
        reason: e.to_string(),
    })
}

/// Decodes a script reply; an empty record means none was stored.
fn decode(user: &UserId, raw: &str, fallback: PresenceStatus) -> Result<PresenceStatus, PresenceError> {
    if raw.is_empty() {
        return Ok(fallback);
    }
    serde_json::from_str(raw).map_err(|e| PresenceError::Corrupt {
        user: user.clone(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn add_connection(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let fresh = encode(&PresenceStatus::connected(user.clone(), device.clone(), now))?;
        let mut conn = self.conn.clone();

        let (was_online, raw): (i64, String) = ADD_CONNECTION
            .key(connections_key(user))
            .key(status_key(user))
            .key(ONLINE_SET)
            .key(HEARTBEAT_INDEX)
            .arg(connection.to_string())
            .arg(user.as_str())
            .arg(now.as_unix_secs())
            .arg(self.ttl_secs())
            .arg(fresh)
            .arg(now.to_string())
            .arg(device.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let status = decode(user, &raw, PresenceStatus::connected(user.clone(), device.clone(), now))?;
        Ok(PresenceUpdate {
            status,
            changed: was_online == 0,
        })
    }

    async fn remove_connection(
        &self,
        user: &UserId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut conn = self.conn.clone();

        let (was_online, raw): (i64, String) = REMOVE_CONNECTION
            .key(connections_key(user))
            .key(status_key(user))
            .key(ONLINE_SET)
            .key(HEARTBEAT_INDEX)
            .arg(connection.to_string())
            .arg(user.as_str())
            .arg(self.ttl_secs())
            .arg(now.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let status = decode(user, &raw, PresenceStatus::offline(user.clone()).into_offline(now))?;
        Ok(PresenceUpdate {
            changed: was_online == 1 && !status.online,
            status,
        })
    }

    async fn mark_offline(&self, user: &UserId, now: Timestamp) -> Result<PresenceUpdate, PresenceError> {
        let mut conn = self.conn.clone();

        let (was_online, raw): (i64, String) = MARK_OFFLINE
            .key(connections_key(user))
            .key(status_key(user))
            .key(ONLINE_SET)
            .key(HEARTBEAT_INDEX)
            .arg(user.as_str())
            .arg(self.ttl_secs())
            .arg(now.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let status = decode(user, &raw, PresenceStatus::offline(user.clone()).into_offline(now))?;
        Ok(PresenceUpdate {
            status,
            changed: was_online == 1,
        })
    }

    async fn set_status(
        &self,
        user: &UserId,
        status: PresenceState,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut fresh = PresenceStatus::offline(user.clone());
        fresh.online = true;
        fresh.status = status;
        fresh.last_seen = Some(now);
        let mut conn = self.conn.clone();

        let (changed, raw): (i64, String) = SET_STATUS
            .key(status_key(user))
            .key(ONLINE_SET)
            .key(HEARTBEAT_INDEX)
            .key(connections_key(user))
            .arg(user.as_str())
            .arg(status.as_str())
            .arg(now.as_unix_secs())
            .arg(now.to_string())
            .arg(self.ttl_secs())
            .arg(encode(&fresh)?)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        if changed < 0 {
            return Err(PresenceError::NotOnline(user.clone()));
        }
        Ok(PresenceUpdate {
            status: decode(user, &raw, fresh)?,
            changed: changed == 1,
        })
    }

    async fn touch(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let fresh = PresenceStatus::connected(user.clone(), device.clone(), now);
        let mut conn = self.conn.clone();

        let (was_online, raw): (i64, String) = TOUCH
            .key(connections_key(user))
            .key(status_key(user))
            .key(ONLINE_SET)
            .key(HEARTBEAT_INDEX)
            .arg(connection.to_string())
            .arg(user.as_str())
            .arg(now.as_unix_secs())
            .arg(self.ttl_secs())
            .arg(encode(&fresh)?)
            .arg(now.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(PresenceUpdate {
            status: decode(user, &raw, fresh)?,
            changed: was_online == 0,
        })
    }

    async fn get(&self, user: &UserId) -> Result<PresenceStatus, PresenceError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(status_key(user)).await.map_err(unavailable)?;
        decode(user, raw.as_deref().unwrap_or(""), PresenceStatus::offline(user.clone()))
    }

    async fn get_many(&self, users: &[UserId]) -> Result<Vec<PresenceStatus>, PresenceError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = users.iter().map(status_key).collect();
        let mut conn = self.conn.clone();
        let raws: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        users
            .iter()
            .zip(raws)
            .map(|(user, raw)| {
                decode(user, raw.as_deref().unwrap_or(""), PresenceStatus::offline(user.clone()))
            })
            .collect()
    }

    async fn stale_users(&self, cutoff: Timestamp) -> Result<Vec<UserId>, PresenceError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrangebyscore(HEARTBEAT_INDEX, "-inf", format!("({}", cutoff.as_unix_secs()))
            .await
            .map_err(unavailable)?;

        Ok(ids
            .into_iter()
            .filter_map(|id| match UserId::new(id) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping invalid user id in heartbeat index");
                    None
                }
            })
            .collect())
    }
}
