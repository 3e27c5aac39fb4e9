//! Presence vocabulary shared by the tracker, its stores and the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::foundation::{DeviceId, Timestamp, UserId, ValidationError};

/// User-visible availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Online => "online",
            PresenceState::Away => "away",
            PresenceState::Busy => "busy",
            PresenceState::Offline => "offline",
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(PresenceState::Online),
            "away" => Ok(PresenceState::Away),
            "busy" => Ok(PresenceState::Busy),
            "offline" => Ok(PresenceState::Offline),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown presence status '{}'", other),
            )),
        }
    }
}

/// Presence record for one user.
///
/// `online` reflects membership in the online set and is authoritative;
/// `status` is what the user chose to display while online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub online: bool,
    pub status: PresenceState,
    pub last_seen: Option<Timestamp>,
    pub device_id: Option<DeviceId>,
    #[serde(default)]
    pub connection_count: u32,
}

impl PresenceStatus {
    /// Record for a user nobody has seen, or whose last connection closed.
    pub fn offline(user_id: UserId) -> Self {
        Self {
            user_id,
            online: false,
            status: PresenceState::Offline,
            last_seen: None,
            device_id: None,
            connection_count: 0,
        }
    }

    pub fn connected(user_id: UserId, device_id: DeviceId, at: Timestamp) -> Self {
        Self {
            user_id,
            online: true,
            status: PresenceState::Online,
            last_seen: Some(at),
            device_id: Some(device_id),
            connection_count: 1,
        }
    }

    /// Flips the record to offline, keeping `last_seen`.
    pub fn into_offline(mut self, at: Timestamp) -> Self {
        self.online = false;
        self.status = PresenceState::Offline;
        self.connection_count = 0;
        self.last_seen = Some(self.last_seen.map_or(at, |seen| seen.max(at)));
        self
    }

    pub fn to_changed_event(&self) -> PresenceChanged {
        PresenceChanged {
            user_id: self.user_id.clone(),
            status: self.status,
            online: self.online,
            last_seen: self.last_seen,
        }
    }
}

/// Payload of the `presence.changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChanged {
    pub user_id: UserId,
    pub status: PresenceState,
    pub online: bool,
    #[serde(default)]
    pub last_seen: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    #[test]
    fn state_parses_case_insensitively() {
        assert_eq!("Busy".parse::<PresenceState>().unwrap(), PresenceState::Busy);
        assert!("sleeping".parse::<PresenceState>().is_err());
    }

    #[test]
    fn connected_record_is_online() {
        let record = PresenceStatus::connected(user(), DeviceId::new("d1").unwrap(), Timestamp::now());
        assert!(record.online);
        assert_eq!(record.status, PresenceState::Online);
        assert_eq!(record.connection_count, 1);
    }

    #[test]
    fn into_offline_keeps_latest_last_seen() {
        let seen = Timestamp::from_unix_secs(2_000);
        let record = PresenceStatus::connected(user(), DeviceId::new("d1").unwrap(), seen)
            .into_offline(Timestamp::from_unix_secs(1_000));
        assert!(!record.online);
        assert_eq!(record.status, PresenceState::Offline);
        assert_eq!(record.last_seen, Some(seen));
    }

    #[test]
    fn changed_event_serializes_lowercase_status() {
        let event = PresenceStatus::offline(user()).to_changed_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "offline");
        assert_eq!(json["online"], false);
    }
}
