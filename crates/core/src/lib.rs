//! qsync core data models.
//!
//! This crate defines the entities mirrored from the remote authority
//! (groups, units, queue items) and the error taxonomy shared by the
//! client and the runner.

#![warn(missing_docs)]

// Identifiers
mod id;

// Remote entities
mod group;
mod unit;
mod queue_item;

// Error taxonomy
mod error;

pub use id::{GroupId, QueueItemId, UnitId};

pub use group::Group;
pub use unit::{ConnectionStatus, Unit};
pub use queue_item::{CreatedBy, QueueItem, QueueItemStatus};

pub use error::{Error, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Opaque key/value blob (configuration, parameters, results, metrics).
///
/// The core never interprets the contents; blobs are passed through to
/// and from the remote authority unmodified.
pub type Payload = serde_json::Map<String, serde_json::Value>;
