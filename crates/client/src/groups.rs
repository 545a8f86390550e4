//! Group CRUD operations.

use crate::api::ApiClient;
use crate::protocol::Ack;
use qsync_core::{Group, GroupId, Payload, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct GroupEnvelope {
    group: Group,
}

#[derive(Deserialize)]
struct GroupsEnvelope {
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Deserialize)]
struct CreatedGroup {
    group_id: GroupId,
}

impl ApiClient {
    /// Create a group.
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        metadata: Payload,
    ) -> Result<GroupId> {
        let body = json!({
            "name": name,
            "description": description,
            "metadata": metadata,
        });
        let created: CreatedGroup = self
            .request(Method::POST, "/groups", Some(&body))
            .await?;
        Ok(created.group_id)
    }

    /// List all groups.
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let envelope: GroupsEnvelope = self.request(Method::GET, "/groups", None).await?;
        Ok(envelope.groups)
    }

    /// Fetch one group.
    pub async fn get_group(&self, id: &GroupId) -> Result<Group> {
        let envelope: GroupEnvelope = self
            .request(Method::GET, &format!("/groups/{id}"), None)
            .await?;
        Ok(envelope.group)
    }

    /// Update a group's name, description or metadata. `None` fields
    /// are left unchanged.
    pub async fn update_group(
        &self,
        id: &GroupId,
        name: Option<&str>,
        description: Option<&str>,
        metadata: Option<&Payload>,
    ) -> Result<()> {
        let mut body = serde_json::Map::new();
        if let Some(name) = name {
            body.insert("name".to_string(), json!(name));
        }
        if let Some(description) = description {
            body.insert("description".to_string(), json!(description));
        }
        if let Some(metadata) = metadata {
            body.insert("metadata".to_string(), json!(metadata));
        }

        self.request::<Ack>(
            Method::PUT,
            &format!("/groups/{id}"),
            Some(&serde_json::Value::Object(body)),
        )
        .await?
        .ensure_success()
    }

    /// Delete a group and everything under it.
    pub async fn delete_group(&self, id: &GroupId) -> Result<()> {
        self.request::<Ack>(Method::DELETE, &format!("/groups/{id}"), None)
            .await?
            .ensure_success()
    }
}
