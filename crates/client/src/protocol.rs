//! Wire types and the operation set the runner depends on.

use crate::api::ApiClient;
use async_trait::async_trait;
use qsync_core::{
    ConnectionStatus, Error, Payload, QueueItem, QueueItemId, Result, Time, Unit, UnitId,
};
use serde::{Deserialize, Serialize};

/// Response to a version-stamped sync request.
///
/// When `need_sync` is set the response carries the full current
/// queue-item list (a snapshot, not a diff). The list may be present
/// even when `need_sync` is false; callers must consult `need_sync`
/// before adopting it.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    /// Whether the remote version is ahead of the client's
    #[serde(default)]
    pub need_sync: bool,

    /// The authority's current version for the unit
    pub cloud_version: i64,

    /// Latest unit data
    #[serde(default)]
    pub unit: Option<Unit>,

    /// Full queue-item snapshot
    #[serde(default)]
    pub queues: Option<Vec<QueueItem>>,
}

/// Response to a heartbeat.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatResponse {
    /// Whether the heartbeat was recorded
    #[serde(default)]
    pub success: bool,

    /// Connection status after this heartbeat
    #[serde(default)]
    pub connection_status: ConnectionStatus,

    /// When the authority last saw a heartbeat
    #[serde(default)]
    pub last_heartbeat: Option<Time>,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, Deserialize)]
pub struct Ack {
    /// Whether the operation succeeded
    #[serde(default)]
    pub success: bool,

    /// Optional human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl Ack {
    /// Error out when a 2xx response declines the operation anyway.
    pub(crate) fn ensure_success(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(Error::Connectivity(match self.message {
                Some(message) => format!("authority declined the request: {message}"),
                None => "authority declined the request".to_string(),
            }))
        }
    }
}

/// Acknowledgement of a reorder, with the number of items renumbered.
#[derive(Debug, Clone, Deserialize)]
pub struct ReorderResponse {
    /// Whether the reorder was applied
    #[serde(default)]
    pub success: bool,

    /// Optional human-readable message
    #[serde(default)]
    pub message: Option<String>,

    /// How many items were renumbered
    #[serde(default)]
    pub count: usize,
}

/// Specification for creating a queue item; `order` is assigned by the
/// authority (append-to-tail).
#[derive(Debug, Clone, Serialize)]
pub struct QueueItemSpec {
    /// Item name
    pub name: String,

    /// Opaque parameter blob
    pub parameters: Payload,

    /// Opaque metadata blob
    #[serde(default)]
    pub metadata: Payload,
}

impl QueueItemSpec {
    /// Create a spec with empty metadata.
    pub fn new(name: impl Into<String>, parameters: Payload) -> Self {
        Self {
            name: name.into(),
            parameters,
            metadata: Payload::new(),
        }
    }
}

/// The operation set the runner depends on.
///
/// [`ApiClient`] implements this over HTTP; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Version-stamped pull of the unit's queue snapshot.
    async fn sync_unit(&self, unit: &UnitId, client_version: i64) -> Result<SyncResponse>;

    /// Liveness signal for a unit.
    async fn heartbeat(&self, unit: &UnitId) -> Result<HeartbeatResponse>;

    /// Mark a queue item running. The authority rejects items that are
    /// not pending.
    async fn start_item(&self, item: &QueueItemId) -> Result<()>;

    /// Mark a queue item completed with its result and metrics.
    async fn complete_item(
        &self,
        item: &QueueItemId,
        result: &Payload,
        metrics: &Payload,
    ) -> Result<()>;

    /// Mark a queue item failed with an error description.
    async fn fail_item(&self, item: &QueueItemId, error_msg: &str) -> Result<()>;

    /// Submit an explicit execution order for the unit's pending items.
    async fn reorder_items(
        &self,
        unit: &UnitId,
        ids: &[QueueItemId],
    ) -> Result<ReorderResponse>;
}

#[async_trait]
impl RemoteAuthority for ApiClient {
    async fn sync_unit(&self, unit: &UnitId, client_version: i64) -> Result<SyncResponse> {
        ApiClient::sync_unit(self, unit, client_version).await
    }

    async fn heartbeat(&self, unit: &UnitId) -> Result<HeartbeatResponse> {
        ApiClient::heartbeat(self, unit).await
    }

    async fn start_item(&self, item: &QueueItemId) -> Result<()> {
        ApiClient::start_item(self, item).await
    }

    async fn complete_item(
        &self,
        item: &QueueItemId,
        result: &Payload,
        metrics: &Payload,
    ) -> Result<()> {
        ApiClient::complete_item(self, item, result, metrics).await
    }

    async fn fail_item(&self, item: &QueueItemId, error_msg: &str) -> Result<()> {
        ApiClient::fail_item(self, item, error_msg).await
    }

    async fn reorder_items(
        &self,
        unit: &UnitId,
        ids: &[QueueItemId],
    ) -> Result<ReorderResponse> {
        ApiClient::reorder_items(self, unit, ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsync_core::QueueItemStatus;

    #[test]
    fn sync_response_with_snapshot() {
        let json = r#"{
            "success": true,
            "need_sync": true,
            "cloud_version": 2,
            "unit": {"unit_id": "u1", "group_id": "g1", "name": "n", "version": 2},
            "queues": [
                {"queue_id": "q0", "unit_id": "u1", "name": "a", "order": 0},
                {"queue_id": "q2", "unit_id": "u1", "name": "c", "order": 2, "status": "pending"}
            ]
        }"#;

        let response: SyncResponse = serde_json::from_str(json).unwrap();
        assert!(response.need_sync);
        assert_eq!(response.cloud_version, 2);
        let items = response.queues.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].status, QueueItemStatus::Pending);
    }

    #[test]
    fn sync_response_without_snapshot() {
        let json = r#"{"success": true, "need_sync": false, "cloud_version": 1}"#;
        let response: SyncResponse = serde_json::from_str(json).unwrap();
        assert!(!response.need_sync);
        assert!(response.queues.is_none());
    }

    #[test]
    fn declined_ack_is_an_error_even_on_2xx() {
        let ack: Ack = serde_json::from_str(r#"{"success": false, "error": "x"}"#).unwrap();
        let err = ack.ensure_success().unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));

        let ack: Ack =
            serde_json::from_str(r#"{"success": false, "message": "queue is locked"}"#).unwrap();
        let err = ack.ensure_success().unwrap_err();
        assert!(err.to_string().contains("queue is locked"));

        let ack: Ack = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(ack.ensure_success().is_ok());
    }

    #[test]
    fn heartbeat_response_decodes() {
        let json = r#"{
            "success": true,
            "connection_status": "connected",
            "last_heartbeat": "2026-08-01T12:00:00Z"
        }"#;
        let response: HeartbeatResponse = serde_json::from_str(json).unwrap();
        assert!(response.success);
        assert_eq!(response.connection_status, ConnectionStatus::Connected);
    }
}
