//! Error taxonomy shared by the client and the runner.

use crate::id::QueueItemId;
use crate::queue_item::QueueItemStatus;

/// Result alias using the qsync error taxonomy.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by qsync operations.
///
/// Transport-layer failures are wrapped into this taxonomy at the
/// boundary where the client talks to the remote authority; nothing is
/// retried automatically except heartbeats, which swallow their own
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Timeout, transport failure or a non-success HTTP response.
    /// Retryable in principle; the caller decides.
    #[error("connection failed: {0}")]
    Connectivity(String),

    /// Response body was not well-formed
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Credential rejected or insufficient privilege
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A state-machine operation was requested from a state that
    /// forbids it. Caller error; the item is left unchanged.
    #[error("cannot {op} item {item}: status is {from}")]
    InvalidTransition {
        /// Item the operation targeted
        item: QueueItemId,
        /// Status the item was in when the operation was rejected
        from: QueueItemStatus,
        /// The rejected operation
        op: &'static str,
    },

    /// The targeted item is not present in the local mirror, either
    /// because the caller passed a bogus id or because a sync replaced
    /// the snapshot while the operation was in flight
    #[error("item {0} is not in the local mirror")]
    UnknownItem(QueueItemId),

    /// A reorder request referenced a non-pending item or an
    /// incomplete/duplicated set of pending items
    #[error("invalid reorder request: {0}")]
    Ordering(String),

    /// Client-side configuration problem (missing credential, bad URL)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an invalid-transition error.
    pub fn invalid_transition(
        item: &QueueItemId,
        from: QueueItemStatus,
        op: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            item: item.clone(),
            from,
            op,
        }
    }
}
