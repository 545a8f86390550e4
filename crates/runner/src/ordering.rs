//! Execution-order selection and reorder reconciliation.

use crate::mirror::UnitMirror;
use crate::sync::SyncEngine;
use qsync_client::RemoteAuthority;
use qsync_core::{Error, QueueItem, QueueItemId, QueueItemStatus, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Pick the next item to execute: smallest `order` among pending
/// items, ties broken by earliest creation timestamp, then by
/// identifier. Fully deterministic for any input.
pub fn select_next(items: &[QueueItem]) -> Option<&QueueItem> {
    items
        .iter()
        .filter(|item| item.status == QueueItemStatus::Pending)
        .min_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Applies the ordering policy to the mirror and reconciles
/// externally-requested reorders.
///
/// Order values are assigned by the authority; the resolver never
/// invents them locally. After a successful reorder the local order
/// values are not trusted: the resolver forces an immediate re-sync so
/// the next selection sees the authority's numbering.
#[derive(Clone)]
pub struct OrderingResolver {
    authority: Arc<dyn RemoteAuthority>,
    mirror: Arc<UnitMirror>,
    sync: SyncEngine,
}

impl OrderingResolver {
    /// Create a resolver over one mirrored unit.
    pub fn new(authority: Arc<dyn RemoteAuthority>, mirror: Arc<UnitMirror>) -> Self {
        let sync = SyncEngine::new(Arc::clone(&authority), Arc::clone(&mirror));
        Self {
            authority,
            mirror,
            sync,
        }
    }

    /// Clone of the head pending item, if any.
    pub async fn next_pending(&self) -> Option<QueueItem> {
        let state = self.mirror.lock().await;
        select_next(&state.items).cloned()
    }

    /// Submit an explicit execution order for the unit's pending
    /// items.
    ///
    /// The sequence must list every currently-pending item exactly
    /// once; anything else (a non-pending id, an unknown id, a
    /// duplicate, a missing item) is an [`Error::Ordering`] and nothing
    /// is sent to the authority. On success the authority renumbers
    /// the items contiguously from 0 and the mirror is refreshed by an
    /// immediate sync.
    pub async fn reorder(&self, ids: &[QueueItemId]) -> Result<()> {
        self.validate(ids).await?;

        self.authority
            .reorder_items(self.mirror.unit_id(), ids)
            .await?;

        info!(
            unit = %self.mirror.unit_id(),
            items = ids.len(),
            "reorder accepted, refreshing mirror"
        );

        // Ordering is authoritative remotely; pull the renumbered
        // snapshot before the next selection.
        self.sync.sync().await?;
        Ok(())
    }

    async fn validate(&self, ids: &[QueueItemId]) -> Result<()> {
        let state = self.mirror.lock().await;

        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id) {
                return Err(Error::Ordering(format!("duplicate item {id}")));
            }
            match state.find_item(id) {
                None => return Err(Error::Ordering(format!("unknown item {id}"))),
                Some(item) if item.status != QueueItemStatus::Pending => {
                    return Err(Error::Ordering(format!(
                        "item {id} is {}, only pending items can be reordered",
                        item.status
                    )));
                }
                Some(_) => {}
            }
        }

        let pending_count = state.pending().count();
        if seen.len() != pending_count {
            return Err(Error::Ordering(format!(
                "sequence covers {} of {} pending items",
                seen.len(),
                pending_count
            )));
        }

        Ok(())
    }
}
