//! Queue-item lifecycle state machine.

use crate::mirror::UnitMirror;
use qsync_client::RemoteAuthority;
use qsync_core::{Error, Payload, QueueItemId, QueueItemStatus, Result};
use std::sync::Arc;
use tracing::debug;

/// Enforces `pending → running → {completed, failed}` for the items of
/// one mirrored unit.
///
/// Every transition is confirm-then-mutate: the remote authority must
/// acknowledge before the local item changes, so the mirror never runs
/// ahead of the authority. An operation requested from a state that
/// forbids it is an [`Error::InvalidTransition`] and leaves the item
/// untouched; terminal states accept nothing, including repeats of the
/// call that produced them.
#[derive(Clone)]
pub struct QueueItemStateMachine {
    authority: Arc<dyn RemoteAuthority>,
    mirror: Arc<UnitMirror>,
}

impl QueueItemStateMachine {
    /// Create a state machine over one mirrored unit.
    pub fn new(authority: Arc<dyn RemoteAuthority>, mirror: Arc<UnitMirror>) -> Self {
        Self { authority, mirror }
    }

    /// Transition an item from `Pending` to `Running`.
    pub async fn start(&self, id: &QueueItemId) -> Result<()> {
        self.expect_status(id, QueueItemStatus::Pending, "start")
            .await?;

        self.authority.start_item(id).await?;

        let mut state = self.mirror.lock().await;
        let item = state
            .find_item_mut(id)
            .ok_or_else(|| Error::UnknownItem(id.clone()))?;
        // A sync may have replaced the snapshot while the remote call
        // was in flight; the status must still allow the transition.
        if item.status != QueueItemStatus::Pending {
            return Err(Error::invalid_transition(id, item.status, "start"));
        }
        item.status = QueueItemStatus::Running;
        item.started_at = Some(chrono::Utc::now());
        debug!(item = %id, "item started");
        Ok(())
    }

    /// Transition an item from `Running` to `Completed`, recording its
    /// result and metrics.
    pub async fn complete(
        &self,
        id: &QueueItemId,
        result: Payload,
        metrics: Payload,
    ) -> Result<()> {
        self.expect_status(id, QueueItemStatus::Running, "complete")
            .await?;

        self.authority.complete_item(id, &result, &metrics).await?;

        let mut state = self.mirror.lock().await;
        let item = state
            .find_item_mut(id)
            .ok_or_else(|| Error::UnknownItem(id.clone()))?;
        if item.status != QueueItemStatus::Running {
            return Err(Error::invalid_transition(id, item.status, "complete"));
        }
        item.status = QueueItemStatus::Completed;
        item.result = Some(result);
        item.metrics = Some(metrics);
        item.completed_at = Some(chrono::Utc::now());
        debug!(item = %id, "item completed");
        Ok(())
    }

    /// Transition an item from `Running` to `Failed`, recording the
    /// error description.
    pub async fn fail(&self, id: &QueueItemId, error_msg: &str) -> Result<()> {
        self.expect_status(id, QueueItemStatus::Running, "fail")
            .await?;

        self.authority.fail_item(id, error_msg).await?;

        let mut state = self.mirror.lock().await;
        let item = state
            .find_item_mut(id)
            .ok_or_else(|| Error::UnknownItem(id.clone()))?;
        if item.status != QueueItemStatus::Running {
            return Err(Error::invalid_transition(id, item.status, "fail"));
        }
        item.status = QueueItemStatus::Failed;
        item.error_msg = Some(error_msg.to_string());
        item.completed_at = Some(chrono::Utc::now());
        debug!(item = %id, "item failed");
        Ok(())
    }

    /// Reject the operation unless the item currently has `expected`
    /// status. Runs before the remote call so illegal requests never
    /// reach the authority.
    async fn expect_status(
        &self,
        id: &QueueItemId,
        expected: QueueItemStatus,
        op: &'static str,
    ) -> Result<()> {
        let state = self.mirror.lock().await;
        let item = state
            .find_item(id)
            .ok_or_else(|| Error::UnknownItem(id.clone()))?;
        if item.status != expected {
            return Err(Error::invalid_transition(id, item.status, op));
        }
        Ok(())
    }
}
