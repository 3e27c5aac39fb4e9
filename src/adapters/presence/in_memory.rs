//! In-memory presence store for tests and single-process development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::domain::foundation::{ConnectionId, DeviceId, Timestamp, UserId};
use crate::domain::presence::{PresenceState, PresenceStatus};
use crate::ports::{PresenceError, PresenceStore, PresenceUpdate};

#[derive(Debug)]
struct Entry {
    record: PresenceStatus,
    connections: HashSet<ConnectionId>,
    heartbeat: Option<Timestamp>,
}

impl Entry {
    fn new(user: &UserId) -> Self {
        Self {
            record: PresenceStatus::offline(user.clone()),
            connections: HashSet::new(),
            heartbeat: None,
        }
    }

    fn go_offline(&mut self, now: Timestamp) -> bool {
        let was_online = self.record.online;
        self.connections.clear();
        self.heartbeat = None;
        self.record = self.record.clone().into_offline(now);
        was_online
    }
}

/// Uses `.expect()` on its lock; not for production.
#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    entries: Mutex<HashMap<UserId, Entry>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides a user's heartbeat (test helper for staleness).
    pub fn set_heartbeat(&self, user: &UserId, at: Timestamp) {
        if let Some(entry) = self
            .entries
            .lock()
            .expect("InMemoryPresenceStore lock poisoned")
            .get_mut(user)
        {
            entry.heartbeat = Some(at);
        }
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .entries
            .lock()
            .expect("InMemoryPresenceStore lock poisoned")
            .iter()
            .filter(|(_, e)| e.record.online)
            .map(|(u, _)| u.clone())
            .collect();
        users.sort();
        users
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn add_connection(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let entry = entries.entry(user.clone()).or_insert_with(|| Entry::new(user));

        entry.connections.insert(*connection);
        entry.heartbeat = Some(now);
        let changed = !entry.record.online;
        if changed {
            entry.record = PresenceStatus::connected(user.clone(), device.clone(), now);
        } else {
            entry.record.device_id = Some(device.clone());
            entry.record.last_seen = Some(now);
        }
        entry.record.connection_count = entry.connections.len() as u32;

        Ok(PresenceUpdate {
            status: entry.record.clone(),
            changed,
        })
    }

    async fn remove_connection(
        &self,
        user: &UserId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let Some(entry) = entries.get_mut(user) else {
            return Ok(PresenceUpdate {
                status: PresenceStatus::offline(user.clone()),
                changed: false,
            });
        };

        entry.connections.remove(connection);
        let changed = if entry.connections.is_empty() {
            entry.go_offline(now)
        } else {
            entry.record.connection_count = entry.connections.len() as u32;
            false
        };

        Ok(PresenceUpdate {
            status: entry.record.clone(),
            changed,
        })
    }

    async fn mark_offline(&self, user: &UserId, now: Timestamp) -> Result<PresenceUpdate, PresenceError> {
        let mut entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let entry = entries.entry(user.clone()).or_insert_with(|| Entry::new(user));
        let changed = entry.go_offline(now);

        Ok(PresenceUpdate {
            status: entry.record.clone(),
            changed,
        })
    }

    async fn set_status(
        &self,
        user: &UserId,
        status: PresenceState,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let entry = match entries.get_mut(user) {
            Some(entry) if entry.record.online => entry,
            _ => return Err(PresenceError::NotOnline(user.clone())),
        };

        let changed = entry.record.status != status;
        entry.record.status = status;
        entry.record.last_seen = Some(now);
        entry.heartbeat = Some(now);

        Ok(PresenceUpdate {
            status: entry.record.clone(),
            changed,
        })
    }

    async fn touch(
        &self,
        user: &UserId,
        device: &DeviceId,
        connection: &ConnectionId,
        now: Timestamp,
    ) -> Result<PresenceUpdate, PresenceError> {
        let mut entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let entry = entries.entry(user.clone()).or_insert_with(|| Entry::new(user));

        entry.connections.insert(*connection);
        entry.heartbeat = Some(now);
        let changed = !entry.record.online;
        if changed {
            entry.record = PresenceStatus::connected(user.clone(), device.clone(), now);
        } else {
            entry.record.last_seen = Some(now);
        }
        entry.record.connection_count = entry.connections.len() as u32;

        Ok(PresenceUpdate {
            status: entry.record.clone(),
            changed,
        })
    }

    async fn get(&self, user: &UserId) -> Result<PresenceStatus, PresenceError> {
        let entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        Ok(entries
            .get(user)
            .map(|e| e.record.clone())
            .unwrap_or_else(|| PresenceStatus::offline(user.clone())))
    }

    async fn get_many(&self, users: &[UserId]) -> Result<Vec<PresenceStatus>, PresenceError> {
        let entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        Ok(users
            .iter()
            .map(|user| {
                entries
                    .get(user)
                    .map(|e| e.record.clone())
                    .unwrap_or_else(|| PresenceStatus::offline(user.clone()))
            })
            .collect())
    }

    async fn stale_users(&self, cutoff: Timestamp) -> Result<Vec<UserId>, PresenceError> {
        let entries = self.entries.lock().expect("InMemoryPresenceStore lock poisoned");
        let mut stale: Vec<UserId> = entries
            .iter()
            .filter(|(_, e)| e.record.online && e.heartbeat.map_or(true, |hb| hb.is_before(&cutoff)))
            .map(|(u, _)| u.clone())
            .collect();
        stale.sort();
        Ok(stale)
    }
}
