//! In-memory call store for tests and single-process development.
//!
//! Honors TTLs lazily: expired entries are dropped when next read.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::call::CallState;
use crate::domain::foundation::{CallId, UserId};
use crate::ports::{CallMutation, CallStore, SignalingError};

type IceKey = (CallId, UserId, UserId);

#[derive(Debug, Default)]
struct Tables {
    calls: HashMap<CallId, (CallState, Instant)>,
    ice: HashMap<IceKey, (VecDeque<JsonValue>, Instant)>,
}

/// Uses `.expect()` on its lock; not for production.
#[derive(Debug, Default)]
pub struct InMemoryCallStore {
    tables: Mutex<Tables>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn save(&self, call: &CallState, ttl: Duration) -> Result<(), SignalingError> {
        let mut tables = self.tables.lock().expect("InMemoryCallStore lock poisoned");
        tables
            .calls
            .insert(call.call_id.clone(), (call.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn load(&self, call_id: &CallId) -> Result<Option<CallState>, SignalingError> {
        let mut tables = self.tables.lock().expect("InMemoryCallStore lock poisoned");
        let now = Instant::now();
        match tables.calls.get(call_id) {
            Some((call, expires_at)) if now < *expires_at => Ok(Some(call.clone())),
            Some(_) => {
                tables.calls.remove(call_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        call_id: &CallId,
        ttl: Duration,
        mutate: CallMutation<'_>,
    ) -> Result<CallState, SignalingError> {
        let mut tables = self.tables.lock().expect("InMemoryCallStore lock poisoned");
        let now = Instant::now();
        let mut call = match tables.calls.get(call_id) {
            Some((call, expires_at)) if now < *expires_at => call.clone(),
            _ => {
                tables.calls.remove(call_id);
                return Err(SignalingError::CallNotFound(call_id.clone()));
            }
        };

        mutate(&mut call).map_err(SignalingError::Rejected)?;
        tables.calls.insert(call_id.clone(), (call.clone(), now + ttl));
        Ok(call)
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
        let mut tables = self.tables.lock().expect("InMemoryCallStore lock poisoned");
        let now = Instant::now();
        let entry = tables
            .ice
            .entry((call_id.clone(), from.clone(), to.clone()))
            .or_insert_with(|| (VecDeque::new(), now + ttl));
        if now >= entry.1 {
            entry.0.clear();
        }

        entry.0.push_back(candidate.clone());
        while entry.0.len() > cap {
            entry.0.pop_front();
        }
        entry.1 = now + ttl;
        Ok(())
    }

    async fn ice_candidates(
        &self,
        call_id: &CallId,
        from: &UserId,
        to: &UserId,
    ) -> Result<Vec<JsonValue>, SignalingError> {
        let tables = self.tables.lock().expect("InMemoryCallStore lock poisoned");
        let key = (call_id.clone(), from.clone(), to.clone());
        Ok(match tables.ice.get(&key) {
            Some((list, expires_at)) if Instant::now() < *expires_at => list.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::CallType;
    use crate::domain::foundation::{ConversationId, Timestamp};
    use serde_json::json;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn call() -> CallState {
        CallState::initiate(
            CallId::new("k1").unwrap(),
            ConversationId::new("c1").unwrap(),
            uid("alice"),
            CallType::Audio,
            vec![uid("bob")],
            Timestamp::now(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn saved_call_expires_after_ttl() {
        let store = InMemoryCallStore::new();
        let call = call();
        store.save(&call, Duration::from_secs(10)).await.unwrap();
        assert_eq!(store.load(&call.call_id).await.unwrap(), Some(call.clone()));

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(store.load(&call.call_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejected_update_leaves_state_untouched() {
        let store = InMemoryCallStore::new();
        let call = call();
        store.save(&call, Duration::from_secs(60)).await.unwrap();

        let err = store
            .update(&call.call_id, Duration::from_secs(60), &|state| {
                state.accept(&uid("bob"), Timestamp::now())?;
                state.accept(&uid("bob"), Timestamp::now())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SignalingError::Rejected(_)));
        assert_eq!(store.load(&call.call_id).await.unwrap(), Some(call));
    }

    #[tokio::test]
    async fn update_of_unknown_call_is_not_found() {
        let store = InMemoryCallStore::new();
        let err = store
            .update(&CallId::new("nope").unwrap(), Duration::from_secs(60), &|_| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, SignalingError::CallNotFound(_)));
    }

    #[tokio::test]
    async fn ice_list_keeps_newest_candidates() {
        let store = InMemoryCallStore::new();
        let id = CallId::new("k1").unwrap();
        for n in 0..5 {
            store
                .append_ice(&id, &uid("alice"), &uid("bob"), &json!({"n": n}), 3, Duration::from_secs(60))
                .await
                .unwrap();
        }

        let candidates = store.ice_candidates(&id, &uid("alice"), &uid("bob")).await.unwrap();

        assert_eq!(candidates, vec![json!({"n": 2}), json!({"n": 3}), json!({"n": 4})]);
        assert!(store
            .ice_candidates(&id, &uid("bob"), &uid("alice"))
            .await
            .unwrap()
            .is_empty());
    }
}
