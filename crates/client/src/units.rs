//! Unit CRUD and the sync/heartbeat operations.

use crate::api::ApiClient;
use crate::protocol::{Ack, HeartbeatResponse, SyncResponse};
use qsync_core::{GroupId, Payload, Result, Unit, UnitId};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct UnitEnvelope {
    unit: Unit,
}

#[derive(Deserialize)]
struct UnitsEnvelope {
    #[serde(default)]
    units: Vec<Unit>,
}

#[derive(Deserialize)]
struct CreatedUnit {
    unit_id: UnitId,
    #[serde(default)]
    version: i64,
}

/// Partial update for a unit. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UnitUpdate {
    /// New name
    pub name: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New configuration blob
    pub config: Option<Payload>,
    /// New metadata blob
    pub metadata: Option<Payload>,
}

impl ApiClient {
    /// Create a unit under a group. Returns the new unit's id and its
    /// initial version.
    pub async fn create_unit(
        &self,
        group: &GroupId,
        name: &str,
        config: Payload,
        description: Option<&str>,
    ) -> Result<(UnitId, i64)> {
        let body = json!({
            "name": name,
            "config": config,
            "description": description,
        });
        let created: CreatedUnit = self
            .request(Method::POST, &format!("/groups/{group}/units"), Some(&body))
            .await?;
        Ok((created.unit_id, created.version))
    }

    /// List the units of a group.
    pub async fn list_units(&self, group: &GroupId) -> Result<Vec<Unit>> {
        let envelope: UnitsEnvelope = self
            .request(Method::GET, &format!("/groups/{group}/units"), None)
            .await?;
        Ok(envelope.units)
    }

    /// Fetch one unit.
    pub async fn get_unit(&self, id: &UnitId) -> Result<Unit> {
        let envelope: UnitEnvelope = self
            .request(Method::GET, &format!("/units/{id}"), None)
            .await?;
        Ok(envelope.unit)
    }

    /// Apply a partial update to a unit. The authority bumps the unit
    /// version when queue-affecting fields change.
    pub async fn update_unit(&self, id: &UnitId, update: UnitUpdate) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(name) = update.name {
            body.insert("name".to_string(), json!(name));
        }
        if let Some(description) = update.description {
            body.insert("description".to_string(), json!(description));
        }
        if let Some(config) = update.config {
            body.insert("config".to_string(), json!(config));
        }
        if let Some(metadata) = update.metadata {
            body.insert("metadata".to_string(), json!(metadata));
        }

        self.request::<Ack>(
            Method::PUT,
            &format!("/units/{id}"),
            Some(&serde_json::Value::Object(body)),
        )
        .await?
        .ensure_success()
    }

    /// Delete a unit and its queue items.
    pub async fn delete_unit(&self, id: &UnitId) -> Result<()> {
        self.request::<Ack>(Method::DELETE, &format!("/units/{id}"), None)
            .await?
            .ensure_success()
    }

    /// Version-stamped sync: ask the authority whether its version is
    /// ahead of `client_version` and, if so, for the full queue
    /// snapshot.
    pub async fn sync_unit(
        &self,
        id: &UnitId,
        client_version: i64,
    ) -> Result<SyncResponse> {
        let body = json!({ "client_version": client_version });
        self.request(Method::POST, &format!("/units/{id}/sync"), Some(&body))
            .await
    }

    /// Send one liveness signal for a unit.
    pub async fn heartbeat(&self, id: &UnitId) -> Result<HeartbeatResponse> {
        self.request(Method::POST, &format!("/units/{id}/heartbeat"), None)
            .await
    }
}
