//! Group model - a project owning one or more units.

use crate::id::GroupId;
use crate::{Payload, Time};
use serde::{Deserialize, Serialize};

/// A group of related work units (one project on the remote authority).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Unique identifier
    #[serde(rename = "group_id", alias = "id")]
    pub id: GroupId,

    /// Group name
    pub name: String,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Opaque metadata blob
    #[serde(default)]
    pub metadata: Payload,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<Time>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<Time>,
}
