//! Local mirror of one unit and its queue.

use qsync_core::{ConnectionStatus, QueueItem, QueueItemId, QueueItemStatus, Time, Unit, UnitId};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Liveness record shared between the mirror and the heartbeat task.
///
/// Kept behind its own mutex so heartbeat progress never contends with
/// sync or execution for the mirror lock.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    /// When the authority last acknowledged a heartbeat
    pub last_heartbeat: Option<Time>,

    /// Connection status the authority last reported
    pub status: ConnectionStatus,
}

/// The guarded portion of the mirror: unit data, version and queue.
///
/// Version and queue list only ever change together through
/// [`MirrorState::adopt_snapshot`]; the single mutex in [`UnitMirror`]
/// makes the swap atomic with respect to every reader.
#[derive(Debug)]
pub struct MirrorState {
    /// Mirrored unit (its `version` field is the local sync version)
    pub unit: Unit,

    /// Most recently adopted queue snapshot
    pub items: Vec<QueueItem>,
}

impl MirrorState {
    /// Replace the whole snapshot: version, unit data and queue list in
    /// one mutation.
    pub fn adopt_snapshot(&mut self, version: i64, unit: Option<Unit>, items: Vec<QueueItem>) {
        if let Some(unit) = unit {
            self.unit = unit;
        }
        self.unit.version = version;
        self.items = items;
    }

    /// Find an item by id.
    pub fn find_item(&self, id: &QueueItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Find an item by id, mutably.
    pub fn find_item_mut(&mut self, id: &QueueItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    /// Items currently in `Pending` status.
    pub fn pending(&self) -> impl Iterator<Item = &QueueItem> {
        self.items
            .iter()
            .filter(|item| item.status == QueueItemStatus::Pending)
    }
}

/// The local, versioned copy of one unit's queue.
///
/// Exclusively owned by the process for its lifetime; the remote
/// authority stays the source of truth and may be mutated concurrently
/// by other actors, so the mirror is a stale-tolerant snapshot
/// reconciled on demand by the sync engine.
pub struct UnitMirror {
    unit_id: UnitId,
    state: Mutex<MirrorState>,
    liveness: Arc<Mutex<Liveness>>,
}

impl UnitMirror {
    /// Mirror a unit with an empty queue; the first sync adopts the
    /// authority's snapshot.
    pub fn new(unit: Unit) -> Self {
        Self {
            unit_id: unit.id.clone(),
            state: Mutex::new(MirrorState {
                unit,
                items: Vec::new(),
            }),
            liveness: Arc::new(Mutex::new(Liveness::default())),
        }
    }

    /// The mirrored unit's identifier. Immutable, readable without a
    /// lock.
    pub fn unit_id(&self) -> &UnitId {
        &self.unit_id
    }

    /// Lock the guarded state.
    pub async fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().await
    }

    /// Current local sync version.
    pub async fn version(&self) -> i64 {
        self.state.lock().await.unit.version
    }

    /// Clone of the current queue snapshot.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.clone()
    }

    /// Clone of the currently pending items.
    pub async fn pending_items(&self) -> Vec<QueueItem> {
        self.state.lock().await.pending().cloned().collect()
    }

    /// Handle to the liveness record, shared with the heartbeat task.
    pub fn liveness(&self) -> Arc<Mutex<Liveness>> {
        Arc::clone(&self.liveness)
    }

    /// Connection status as of the last heartbeat.
    pub async fn connection_status(&self) -> ConnectionStatus {
        self.liveness.lock().await.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsync_core::GroupId;

    fn unit() -> Unit {
        Unit {
            id: UnitId::new("u1"),
            group_id: GroupId::new("g1"),
            name: "test".to_string(),
            config: Default::default(),
            version: 1,
            description: None,
            metadata: Default::default(),
            last_heartbeat: None,
            connection_status: ConnectionStatus::Disconnected,
            created_at: None,
            updated_at: None,
        }
    }

    fn item(id: &str, status: QueueItemStatus, order: i64) -> QueueItem {
        QueueItem {
            id: QueueItemId::new(id),
            unit_id: UnitId::new("u1"),
            name: id.to_string(),
            parameters: Default::default(),
            status,
            order,
            created_by: Default::default(),
            result: None,
            metrics: None,
            error_msg: None,
            metadata: Default::default(),
            started_at: None,
            completed_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn snapshot_swap_updates_version_and_items_together() {
        let mirror = UnitMirror::new(unit());
        assert_eq!(mirror.version().await, 1);
        assert!(mirror.items().await.is_empty());

        {
            let mut state = mirror.lock().await;
            state.adopt_snapshot(
                3,
                None,
                vec![
                    item("q0", QueueItemStatus::Pending, 0),
                    item("q1", QueueItemStatus::Running, 1),
                ],
            );
        }

        assert_eq!(mirror.version().await, 3);
        assert_eq!(mirror.items().await.len(), 2);
        assert_eq!(mirror.pending_items().await.len(), 1);
    }

    #[tokio::test]
    async fn liveness_record_starts_disconnected() {
        let mirror = UnitMirror::new(unit());
        assert_eq!(
            mirror.connection_status().await,
            ConnectionStatus::Disconnected
        );
        assert!(mirror.liveness().lock().await.last_heartbeat.is_none());
    }
}
