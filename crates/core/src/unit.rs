//! Unit model - a versioned body of schedulable work.

use crate::id::{GroupId, UnitId};
use crate::{Payload, Time};
use serde::{Deserialize, Serialize};

/// A unit of work owned by a group, mirrored locally for execution.
///
/// The remote authority stamps every queue-affecting change with a new
/// `version`; the local mirror adopts version and queue contents
/// together, atomically, during sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    /// Unique identifier
    #[serde(rename = "unit_id", alias = "id")]
    pub id: UnitId,

    /// Owning group
    pub group_id: GroupId,

    /// Unit name
    pub name: String,

    /// Opaque configuration blob
    #[serde(default)]
    pub config: Payload,

    /// Monotonic sync version, advanced remotely on every queue change
    #[serde(default = "initial_version")]
    pub version: i64,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Opaque metadata blob
    #[serde(default)]
    pub metadata: Payload,

    /// Timestamp of the last heartbeat the authority recorded
    #[serde(default)]
    pub last_heartbeat: Option<Time>,

    /// Liveness as last reported by the authority
    #[serde(default)]
    pub connection_status: ConnectionStatus,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<Time>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<Time>,
}

fn initial_version() -> i64 {
    1
}

/// Client liveness as seen by the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Heartbeats are arriving within the authority's window
    Connected,
    /// No recent heartbeat
    Disconnected,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_decodes_from_authority_json() {
        let json = r#"{
            "unit_id": "u1",
            "group_id": "g1",
            "name": "baseline",
            "config": {"epochs": 10},
            "version": 3,
            "connection_status": "connected",
            "last_heartbeat": "2026-08-01T12:00:00Z"
        }"#;

        let unit: Unit = serde_json::from_str(json).unwrap();
        assert_eq!(unit.id.as_str(), "u1");
        assert_eq!(unit.version, 3);
        assert_eq!(unit.connection_status, ConnectionStatus::Connected);
        assert!(unit.last_heartbeat.is_some());
        assert_eq!(unit.config["epochs"], 10);
    }

    #[test]
    fn missing_liveness_fields_default_to_disconnected() {
        let json = r#"{"unit_id": "u1", "group_id": "g1", "name": "n"}"#;
        let unit: Unit = serde_json::from_str(json).unwrap();
        assert_eq!(unit.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(unit.version, 1);
        assert!(unit.last_heartbeat.is_none());
    }
}
