//! QueueItem model - one schedulable job inside a unit.

use crate::id::{QueueItemId, UnitId};
use crate::{Payload, Time};
use serde::{Deserialize, Serialize};

/// A single schedulable job with parameters, order and lifecycle status.
///
/// `order` is assigned by the remote authority (append-to-tail on
/// creation) and only meaningful while the item is pending; once an
/// item leaves `Pending` its order is frozen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier
    #[serde(rename = "queue_id", alias = "id")]
    pub id: QueueItemId,

    /// Owning unit
    pub unit_id: UnitId,

    /// Item name
    pub name: String,

    /// Opaque parameter blob handed to the work function
    #[serde(default)]
    pub parameters: Payload,

    /// Lifecycle status
    #[serde(default)]
    pub status: QueueItemStatus,

    /// Execution precedence among pending items; smaller runs first
    #[serde(default)]
    pub order: i64,

    /// Who created the item
    #[serde(default)]
    pub created_by: CreatedBy,

    /// Result blob reported on completion
    #[serde(default)]
    pub result: Option<Payload>,

    /// Metrics blob reported on completion
    #[serde(default)]
    pub metrics: Option<Payload>,

    /// Error message reported on failure
    #[serde(default, alias = "error_message")]
    pub error_msg: Option<String>,

    /// Opaque metadata blob
    #[serde(default)]
    pub metadata: Payload,

    /// When execution started
    #[serde(default)]
    pub started_at: Option<Time>,

    /// When execution finished (completed or failed)
    #[serde(default)]
    pub completed_at: Option<Time>,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<Time>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: Option<Time>,
}

/// Lifecycle status of a queue item.
///
/// `Pending → Running → {Completed, Failed}`; the terminal states
/// accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    /// Waiting to be picked up
    Pending,
    /// Currently executing on a client
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl QueueItemStatus {
    /// Whether this status accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Default for QueueItemStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Where a queue item was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreatedBy {
    /// Created through this client SDK
    Client,
    /// Created through the web console
    Web,
}

impl Default for CreatedBy {
    fn default() -> Self {
        Self::Client
    }
}
