//! Queue-item CRUD and the lifecycle operations the runner pushes.

use crate::api::ApiClient;
use crate::protocol::{Ack, QueueItemSpec, ReorderResponse};
use qsync_core::{
    CreatedBy, Error, Payload, QueueItem, QueueItemId, QueueItemStatus, Result, UnitId,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct QueueEnvelope {
    queue: QueueItem,
}

#[derive(Deserialize)]
struct QueuesEnvelope {
    #[serde(default)]
    queues: Vec<QueueItem>,
}

#[derive(Deserialize)]
struct BatchCreated {
    #[serde(default)]
    queue_ids: Vec<QueueItemId>,
}

/// Partial update for a pending queue item. `order` is deliberately
/// absent; ordering changes go through `reorder_items`.
#[derive(Debug, Clone, Default)]
pub struct QueueItemUpdate {
    /// New name
    pub name: Option<String>,
    /// New parameter blob
    pub parameters: Option<Payload>,
    /// New metadata blob
    pub metadata: Option<Payload>,
}

impl ApiClient {
    /// Create a queue item; the authority assigns its order at the tail.
    pub async fn create_item(
        &self,
        unit: &UnitId,
        spec: QueueItemSpec,
        created_by: CreatedBy,
    ) -> Result<QueueItem> {
        let body = json!({
            "name": spec.name,
            "parameters": spec.parameters,
            "metadata": spec.metadata,
            "created_by": created_by,
        });
        let envelope: QueueEnvelope = self
            .request(Method::POST, &format!("/units/{unit}/queues"), Some(&body))
            .await?;
        Ok(envelope.queue)
    }

    /// Create several queue items in one call (parameter sweeps).
    /// Returns the new ids in creation order.
    pub async fn create_items_batch(
        &self,
        unit: &UnitId,
        specs: &[QueueItemSpec],
        created_by: CreatedBy,
    ) -> Result<Vec<QueueItemId>> {
        let body = json!({
            "queues": specs,
            "created_by": created_by,
        });
        let created: BatchCreated = self
            .request(
                Method::POST,
                &format!("/units/{unit}/queues/batch"),
                Some(&body),
            )
            .await?;
        Ok(created.queue_ids)
    }

    /// List a unit's queue items, optionally filtered by status.
    pub async fn list_items(
        &self,
        unit: &UnitId,
        status: Option<QueueItemStatus>,
    ) -> Result<Vec<QueueItem>> {
        let path = match status {
            Some(status) => format!("/units/{unit}/queues?status={status}"),
            None => format!("/units/{unit}/queues"),
        };
        let envelope: QueuesEnvelope = self.request(Method::GET, &path, None).await?;
        Ok(envelope.queues)
    }

    /// Fetch one queue item.
    pub async fn get_item(&self, id: &QueueItemId) -> Result<QueueItem> {
        let envelope: QueueEnvelope = self
            .request(Method::GET, &format!("/queues/{id}"), None)
            .await?;
        Ok(envelope.queue)
    }

    /// Apply a partial update to a pending queue item.
    pub async fn update_item(
        &self,
        id: &QueueItemId,
        update: QueueItemUpdate,
    ) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(name) = update.name {
            body.insert("name".to_string(), json!(name));
        }
        if let Some(parameters) = update.parameters {
            body.insert("parameters".to_string(), json!(parameters));
        }
        if let Some(metadata) = update.metadata {
            body.insert("metadata".to_string(), json!(metadata));
        }

        self.request::<Ack>(
            Method::PUT,
            &format!("/queues/{id}"),
            Some(&serde_json::Value::Object(body)),
        )
        .await?
        .ensure_success()
    }

    /// Delete a queue item.
    pub async fn delete_item(&self, id: &QueueItemId) -> Result<()> {
        self.request::<Ack>(Method::DELETE, &format!("/queues/{id}"), None)
            .await?
            .ensure_success()
    }

    /// Ask the authority to mark an item running.
    pub async fn start_item(&self, id: &QueueItemId) -> Result<()> {
        self.request::<Ack>(Method::POST, &format!("/queues/{id}/start"), None)
            .await?
            .ensure_success()
    }

    /// Report an item's result and metrics; the authority marks it
    /// completed.
    pub async fn complete_item(
        &self,
        id: &QueueItemId,
        result: &Payload,
        metrics: &Payload,
    ) -> Result<()> {
        let body = json!({
            "result": result,
            "metrics": metrics,
        });
        self.request::<Ack>(Method::POST, &format!("/queues/{id}/complete"), Some(&body))
            .await?
            .ensure_success()
    }

    /// Report an item's failure; the authority marks it failed.
    pub async fn fail_item(&self, id: &QueueItemId, error_msg: &str) -> Result<()> {
        let body = json!({ "error_msg": error_msg });
        self.request::<Ack>(Method::POST, &format!("/queues/{id}/fail"), Some(&body))
            .await?
            .ensure_success()
    }

    /// Submit a new execution order for a unit's pending items. The
    /// authority renumbers them contiguously following the given
    /// sequence and bumps the unit version.
    pub async fn reorder_items(
        &self,
        unit: &UnitId,
        ids: &[QueueItemId],
    ) -> Result<ReorderResponse> {
        let body = json!({ "queue_ids": ids });
        let response: ReorderResponse = self
            .request(
                Method::POST,
                &format!("/units/{unit}/queues/reorder"),
                Some(&body),
            )
            .await?;
        if !response.success {
            return Err(Error::Connectivity(
                response
                    .message
                    .unwrap_or_else(|| "reorder was not applied".to_string()),
            ));
        }
        Ok(response)
    }
}
