//! HTTP client for the qsync remote authority.
//!
//! The authority owns the canonical configuration and ordering of all
//! work; this crate exposes it two ways: a plain CRUD surface for
//! groups, units and queue items, and the [`RemoteAuthority`] trait
//! covering the six operations the runner depends on (sync, heartbeat,
//! start/complete/fail, reorder).

mod api;
mod config;
mod protocol;

mod groups;
mod queues;
mod units;

pub use api::ApiClient;
pub use config::ClientConfig;
pub use protocol::{
    Ack, HeartbeatResponse, QueueItemSpec, RemoteAuthority, ReorderResponse, SyncResponse,
};
pub use queues::QueueItemUpdate;
pub use units::UnitUpdate;
