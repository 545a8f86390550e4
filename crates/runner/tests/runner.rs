//! Engine tests against an in-memory authority.

use async_trait::async_trait;
use qsync_client::{HeartbeatResponse, RemoteAuthority, ReorderResponse, SyncResponse};
use qsync_core::{
    ConnectionStatus, Error, GroupId, Payload, QueueItem, QueueItemId, QueueItemStatus, Unit,
    UnitId,
};
use qsync_runner::{
    HeartbeatMonitor, OrderingResolver, QueueItemStateMachine, RunnerConfig, SyncEngine,
    UnitMirror, UnitRunner, WorkFn, WorkOutput,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

fn test_unit(version: i64) -> Unit {
    Unit {
        id: UnitId::new("u1"),
        group_id: GroupId::new("g1"),
        name: "test-unit".to_string(),
        config: Payload::new(),
        version,
        description: None,
        metadata: Payload::new(),
        last_heartbeat: None,
        connection_status: ConnectionStatus::Disconnected,
        created_at: None,
        updated_at: None,
    }
}

fn test_item(id: &str, name: &str, order: i64) -> QueueItem {
    QueueItem {
        id: QueueItemId::new(id),
        unit_id: UnitId::new("u1"),
        name: name.to_string(),
        parameters: Payload::new(),
        status: QueueItemStatus::Pending,
        order,
        created_by: Default::default(),
        result: None,
        metrics: None,
        error_msg: None,
        metadata: Payload::new(),
        started_at: None,
        completed_at: None,
        created_at: None,
        updated_at: None,
    }
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[derive(Default)]
struct FakeState {
    version: i64,
    items: Vec<QueueItem>,
    heartbeats: usize,
    reorder_calls: usize,
    fail_sync: bool,
    fail_start: bool,
    fail_heartbeats: bool,
    // Misbehaving-authority knob: report this version with need_sync
    // set regardless of the client's version.
    report_version: Option<i64>,
}

/// In-memory stand-in for the remote authority.
struct FakeAuthority {
    state: Mutex<FakeState>,
}

impl FakeAuthority {
    fn new(version: i64, items: Vec<QueueItem>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                version,
                items,
                ..Default::default()
            }),
        })
    }

    async fn remove_item(&self, id: &str) {
        let mut state = self.state.lock().await;
        state.items.retain(|item| item.id.as_str() != id);
        state.version += 1;
    }

    async fn item_status(&self, id: &str) -> QueueItemStatus {
        let state = self.state.lock().await;
        state
            .items
            .iter()
            .find(|item| item.id.as_str() == id)
            .map(|item| item.status)
            .expect("item exists")
    }

    async fn item(&self, id: &str) -> QueueItem {
        let state = self.state.lock().await;
        state
            .items
            .iter()
            .find(|item| item.id.as_str() == id)
            .cloned()
            .expect("item exists")
    }

    async fn heartbeats(&self) -> usize {
        self.state.lock().await.heartbeats
    }

    async fn reorder_calls(&self) -> usize {
        self.state.lock().await.reorder_calls
    }

    async fn set(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut *self.state.lock().await);
    }
}

#[async_trait]
impl RemoteAuthority for FakeAuthority {
    async fn sync_unit(
        &self,
        _unit: &UnitId,
        client_version: i64,
    ) -> qsync_core::Result<SyncResponse> {
        let state = self.state.lock().await;
        if state.fail_sync {
            return Err(Error::Connectivity("sync unavailable".to_string()));
        }
        if let Some(version) = state.report_version {
            return Ok(SyncResponse {
                need_sync: true,
                cloud_version: version,
                unit: None,
                queues: Some(state.items.clone()),
            });
        }
        let need_sync = state.version > client_version;
        Ok(SyncResponse {
            need_sync,
            cloud_version: state.version,
            unit: None,
            queues: need_sync.then(|| state.items.clone()),
        })
    }

    async fn heartbeat(&self, _unit: &UnitId) -> qsync_core::Result<HeartbeatResponse> {
        let mut state = self.state.lock().await;
        if state.fail_heartbeats {
            return Err(Error::Connectivity("heartbeat unavailable".to_string()));
        }
        state.heartbeats += 1;
        Ok(HeartbeatResponse {
            success: true,
            connection_status: ConnectionStatus::Connected,
            last_heartbeat: Some(chrono::Utc::now()),
        })
    }

    async fn start_item(&self, item: &QueueItemId) -> qsync_core::Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_start {
            return Err(Error::Connectivity("start unavailable".to_string()));
        }
        let found = state
            .items
            .iter_mut()
            .find(|i| &i.id == item)
            .ok_or_else(|| Error::Connectivity("server returned 404".to_string()))?;
        if found.status != QueueItemStatus::Pending {
            return Err(Error::Connectivity(
                "server returned 400: queue is not pending".to_string(),
            ));
        }
        found.status = QueueItemStatus::Running;
        found.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn complete_item(
        &self,
        item: &QueueItemId,
        result: &Payload,
        metrics: &Payload,
    ) -> qsync_core::Result<()> {
        let mut state = self.state.lock().await;
        let found = state
            .items
            .iter_mut()
            .find(|i| &i.id == item)
            .ok_or_else(|| Error::Connectivity("server returned 404".to_string()))?;
        if found.status != QueueItemStatus::Running {
            return Err(Error::Connectivity(
                "server returned 400: queue is not running".to_string(),
            ));
        }
        found.status = QueueItemStatus::Completed;
        found.result = Some(result.clone());
        found.metrics = Some(metrics.clone());
        found.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn fail_item(&self, item: &QueueItemId, error_msg: &str) -> qsync_core::Result<()> {
        let mut state = self.state.lock().await;
        let found = state
            .items
            .iter_mut()
            .find(|i| &i.id == item)
            .ok_or_else(|| Error::Connectivity("server returned 404".to_string()))?;
        if found.status != QueueItemStatus::Running {
            return Err(Error::Connectivity(
                "server returned 400: queue is not running".to_string(),
            ));
        }
        found.status = QueueItemStatus::Failed;
        found.error_msg = Some(error_msg.to_string());
        found.completed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn reorder_items(
        &self,
        _unit: &UnitId,
        ids: &[QueueItemId],
    ) -> qsync_core::Result<ReorderResponse> {
        let mut state = self.state.lock().await;
        for id in ids {
            let found = state.items.iter().find(|i| &i.id == id);
            match found {
                Some(item) if item.status == QueueItemStatus::Pending => {}
                _ => {
                    return Err(Error::Connectivity(
                        "server returned 400: only pending queues can be reordered".to_string(),
                    ))
                }
            }
        }
        for (position, id) in ids.iter().enumerate() {
            if let Some(item) = state.items.iter_mut().find(|i| &i.id == id) {
                item.order = position as i64;
            }
        }
        state.version += 1;
        state.reorder_calls += 1;
        Ok(ReorderResponse {
            success: true,
            message: None,
            count: ids.len(),
        })
    }
}

fn engine_parts(
    fake: &Arc<FakeAuthority>,
) -> (
    Arc<UnitMirror>,
    SyncEngine,
    QueueItemStateMachine,
    OrderingResolver,
) {
    let authority: Arc<dyn RemoteAuthority> = fake.clone();
    let mirror = Arc::new(UnitMirror::new(test_unit(0)));
    let sync = SyncEngine::new(Arc::clone(&authority), Arc::clone(&mirror));
    let state = QueueItemStateMachine::new(Arc::clone(&authority), Arc::clone(&mirror));
    let ordering = OrderingResolver::new(authority, Arc::clone(&mirror));
    (mirror, sync, state, ordering)
}

#[tokio::test]
async fn sync_adopts_snapshot_when_version_advances() {
    let fake = FakeAuthority::new(
        1,
        vec![
            test_item("q0", "a", 0),
            test_item("q1", "b", 1),
            test_item("q2", "c", 2),
        ],
    );
    let (mirror, sync, _, _) = engine_parts(&fake);

    let outcome = sync.sync().await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.version, 1);
    assert_eq!(mirror.version().await, 1);
    assert_eq!(mirror.items().await.len(), 3);

    // q1 is deleted externally; the authority advances to version 2.
    fake.remove_item("q1").await;

    let outcome = sync.sync().await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.version, 2);
    assert_eq!(mirror.version().await, 2);
    let ids: Vec<_> = mirror
        .items()
        .await
        .iter()
        .map(|i| i.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["q0", "q2"]);

    // Versions match: no mutation.
    let outcome = sync.sync().await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(mirror.version().await, 2);
}

#[tokio::test]
async fn sync_failure_leaves_mirror_unchanged() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let (mirror, sync, _, _) = engine_parts(&fake);
    sync.sync().await.unwrap();

    fake.set(|s| {
        s.version = 5;
        s.fail_sync = true;
    })
    .await;

    let err = sync.sync().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert_eq!(mirror.version().await, 1);
    assert_eq!(mirror.items().await.len(), 1);
}

#[tokio::test]
async fn sync_rejects_a_version_regression() {
    let fake = FakeAuthority::new(2, vec![test_item("q0", "a", 0)]);
    let (mirror, sync, _, _) = engine_parts(&fake);
    sync.sync().await.unwrap();
    assert_eq!(mirror.version().await, 2);

    // Authority claims a snapshot stamped behind the local version.
    fake.set(|s| {
        s.report_version = Some(1);
        s.items.clear();
    })
    .await;

    let err = sync.sync().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    // The local version never moved backwards and the stale snapshot
    // was not adopted.
    assert_eq!(mirror.version().await, 2);
    assert_eq!(mirror.items().await.len(), 1);
}

#[tokio::test]
async fn start_twice_is_an_invalid_transition() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let (mirror, sync, state, _) = engine_parts(&fake);
    sync.sync().await.unwrap();

    let q0 = QueueItemId::new("q0");
    state.start(&q0).await.unwrap();
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Running);

    let err = state.start(&q0).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: QueueItemStatus::Running,
            ..
        }
    ));
    // Status unchanged on both sides.
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Running);
    assert_eq!(
        mirror.lock().await.find_item(&q0).unwrap().status,
        QueueItemStatus::Running
    );
}

#[tokio::test]
async fn completed_item_is_final() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let (mirror, sync, state, _) = engine_parts(&fake);
    sync.sync().await.unwrap();

    let q0 = QueueItemId::new("q0");
    state.start(&q0).await.unwrap();
    state
        .complete(
            &q0,
            payload(json!({"loss": 0.1})),
            payload(json!({"accuracy": 0.9})),
        )
        .await
        .unwrap();

    let remote = fake.item("q0").await;
    assert_eq!(remote.status, QueueItemStatus::Completed);
    assert_eq!(remote.result.unwrap()["loss"], 0.1);
    assert_eq!(remote.metrics.unwrap()["accuracy"], 0.9);

    let err = state.fail(&q0, "x").await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: QueueItemStatus::Completed,
            ..
        }
    ));
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Completed);

    let local = mirror.lock().await.find_item(&q0).unwrap().clone();
    assert_eq!(local.status, QueueItemStatus::Completed);
    assert!(local.completed_at.is_some());
    assert!(local.error_msg.is_none());
}

#[tokio::test]
async fn complete_requires_running() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let (_, sync, state, _) = engine_parts(&fake);
    sync.sync().await.unwrap();

    let err = state
        .complete(&QueueItemId::new("q0"), Payload::new(), Payload::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: QueueItemStatus::Pending,
            ..
        }
    ));
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Pending);
}

#[tokio::test]
async fn remote_rejection_leaves_local_state_untouched() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let (mirror, sync, state, _) = engine_parts(&fake);
    sync.sync().await.unwrap();

    fake.set(|s| s.fail_start = true).await;

    let q0 = QueueItemId::new("q0");
    let err = state.start(&q0).await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    // Never optimistically advanced ahead of remote confirmation.
    assert_eq!(
        mirror.lock().await.find_item(&q0).unwrap().status,
        QueueItemStatus::Pending
    );
}

#[tokio::test]
async fn reorder_rejects_non_pending_items_before_any_change() {
    let fake = FakeAuthority::new(
        1,
        vec![
            test_item("q0", "a", 0),
            test_item("q1", "b", 1),
            test_item("q2", "c", 2),
        ],
    );
    let (mirror, sync, state, ordering) = engine_parts(&fake);
    sync.sync().await.unwrap();
    state.start(&QueueItemId::new("q0")).await.unwrap();

    let ids = vec![
        QueueItemId::new("q0"),
        QueueItemId::new("q1"),
        QueueItemId::new("q2"),
    ];
    let err = ordering.reorder(&ids).await.unwrap_err();
    assert!(matches!(err, Error::Ordering(_)));

    // Rejected client-side: nothing reached the authority, no order
    // values changed.
    assert_eq!(fake.reorder_calls().await, 0);
    assert_eq!(fake.item("q1").await.order, 1);
    assert_eq!(fake.item("q2").await.order, 2);
    assert_eq!(
        mirror
            .lock()
            .await
            .find_item(&QueueItemId::new("q1"))
            .unwrap()
            .order,
        1
    );
}

#[tokio::test]
async fn reorder_rejects_duplicates_and_incomplete_sets() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0), test_item("q1", "b", 1)]);
    let (_, sync, _, ordering) = engine_parts(&fake);
    sync.sync().await.unwrap();

    let err = ordering
        .reorder(&[QueueItemId::new("q0"), QueueItemId::new("q0")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Ordering(_)));

    let err = ordering.reorder(&[QueueItemId::new("q0")]).await.unwrap_err();
    assert!(matches!(err, Error::Ordering(_)));

    let err = ordering
        .reorder(&[QueueItemId::new("q0"), QueueItemId::new("nope")])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Ordering(_)));

    assert_eq!(fake.reorder_calls().await, 0);
}

#[tokio::test]
async fn reorder_renumbers_remotely_and_resyncs() {
    let fake = FakeAuthority::new(
        1,
        vec![
            test_item("q0", "a", 0),
            test_item("q1", "b", 1),
            test_item("q2", "c", 2),
        ],
    );
    let (mirror, sync, _, ordering) = engine_parts(&fake);
    sync.sync().await.unwrap();

    ordering
        .reorder(&[
            QueueItemId::new("q2"),
            QueueItemId::new("q0"),
            QueueItemId::new("q1"),
        ])
        .await
        .unwrap();

    assert_eq!(fake.reorder_calls().await, 1);
    // Mirror was refreshed with the authority's numbering.
    assert_eq!(mirror.version().await, 2);
    let state = mirror.lock().await;
    assert_eq!(state.find_item(&QueueItemId::new("q2")).unwrap().order, 0);
    assert_eq!(state.find_item(&QueueItemId::new("q0")).unwrap().order, 1);
    assert_eq!(state.find_item(&QueueItemId::new("q1")).unwrap().order, 2);
}

#[tokio::test]
async fn runner_drains_queue_in_order() {
    // Orders deliberately disagree with insertion order.
    let fake = FakeAuthority::new(
        1,
        vec![
            test_item("q0", "c", 2),
            test_item("q1", "a", 0),
            test_item("q2", "b", 1),
        ],
    );
    let authority: Arc<dyn RemoteAuthority> = fake.clone();

    let executed: Arc<std::sync::Mutex<Vec<String>>> = Arc::default();
    let seen = Arc::clone(&executed);
    let handler = Arc::new(WorkFn::new(move |item: &QueueItem| {
        seen.lock().unwrap().push(item.name.clone());
        Ok(WorkOutput::new(payload(json!({"ok": true}))))
    }));

    let mut runner = UnitRunner::new(authority, test_unit(0), handler).with_config(RunnerConfig {
        poll_interval: Duration::from_millis(1),
        exit_when_drained: true,
        max_cycles: None,
    });

    runner.run().await.unwrap();

    assert_eq!(*executed.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(runner.cycles(), 3);
    for id in ["q0", "q1", "q2"] {
        assert_eq!(fake.item_status(id).await, QueueItemStatus::Completed);
    }
}

#[tokio::test]
async fn runner_marks_failed_item_and_continues() {
    let fake = FakeAuthority::new(
        1,
        vec![
            test_item("q0", "a", 0),
            test_item("q1", "b", 1),
            test_item("q2", "c", 2),
        ],
    );
    let authority: Arc<dyn RemoteAuthority> = fake.clone();

    let handler = Arc::new(WorkFn::new(|item: &QueueItem| {
        if item.name == "b" {
            anyhow::bail!("boom");
        }
        Ok(WorkOutput::default())
    }));

    let mut runner = UnitRunner::new(authority, test_unit(0), handler).with_config(RunnerConfig {
        poll_interval: Duration::from_millis(1),
        exit_when_drained: true,
        max_cycles: None,
    });

    runner.run().await.unwrap();

    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Completed);
    assert_eq!(fake.item_status("q2").await, QueueItemStatus::Completed);
    let failed = fake.item("q1").await;
    assert_eq!(failed.status, QueueItemStatus::Failed);
    assert!(failed.error_msg.unwrap().contains("boom"));
}

#[tokio::test]
async fn runner_aborts_on_connectivity_failure() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    fake.set(|s| s.fail_sync = true).await;
    let authority: Arc<dyn RemoteAuthority> = fake.clone();

    let handler = Arc::new(WorkFn::new(|_: &QueueItem| Ok(WorkOutput::default())));
    let mut runner = UnitRunner::new(authority, test_unit(0), handler);

    let err = runner.run().await.unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert_eq!(runner.cycles(), 0);
}

#[tokio::test]
async fn cancellation_stops_the_runner_before_work() {
    let fake = FakeAuthority::new(1, vec![test_item("q0", "a", 0)]);
    let authority: Arc<dyn RemoteAuthority> = fake.clone();

    let handler = Arc::new(WorkFn::new(|_: &QueueItem| Ok(WorkOutput::default())));
    let mut runner = UnitRunner::new(authority, test_unit(0), handler);

    runner.cancel_flag().cancel();
    runner.run().await.unwrap();

    assert_eq!(runner.cycles(), 0);
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Pending);
}

#[tokio::test]
async fn heartbeat_records_liveness_and_stops_cooperatively() {
    let fake = FakeAuthority::new(1, vec![]);
    let authority: Arc<dyn RemoteAuthority> = fake.clone();
    let mirror = Arc::new(UnitMirror::new(test_unit(1)));

    let handle = HeartbeatMonitor::new(authority, &mirror)
        .with_interval(Duration::from_millis(10))
        .start();

    tokio::time::sleep(Duration::from_millis(55)).await;
    assert!(fake.heartbeats().await >= 2);
    assert_eq!(mirror.connection_status().await, ConnectionStatus::Connected);
    assert!(mirror.liveness().lock().await.last_heartbeat.is_some());

    handle.stop().await;
    let after_stop = fake.heartbeats().await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(fake.heartbeats().await, after_stop);
}

#[tokio::test]
async fn heartbeat_failures_are_swallowed() {
    let fake = FakeAuthority::new(1, vec![]);
    fake.set(|s| s.fail_heartbeats = true).await;
    let authority: Arc<dyn RemoteAuthority> = fake.clone();
    let mirror = Arc::new(UnitMirror::new(test_unit(1)));

    let handle = HeartbeatMonitor::new(authority, &mirror)
        .with_interval(Duration::from_millis(10))
        .start();

    tokio::time::sleep(Duration::from_millis(40)).await;
    // Still ticking despite every tick failing.
    assert!(!handle.is_finished());
    assert_eq!(
        mirror.connection_status().await,
        ConnectionStatus::Disconnected
    );

    handle.stop().await;
}

#[tokio::test]
async fn heartbeat_and_execution_are_independent() {
    let fake = FakeAuthority::new(
        1,
        vec![test_item("q0", "a", 0), test_item("q1", "b", 1)],
    );
    let authority: Arc<dyn RemoteAuthority> = fake.clone();

    let handler = Arc::new(WorkFn::new(|_: &QueueItem| Ok(WorkOutput::default())));
    let mut runner = UnitRunner::new(Arc::clone(&authority), test_unit(0), handler)
        .with_config(RunnerConfig {
            poll_interval: Duration::from_millis(15),
            exit_when_drained: true,
            max_cycles: None,
        });

    let handle = HeartbeatMonitor::new(authority, &runner.mirror())
        .with_interval(Duration::from_millis(5))
        .start();

    let loop_task = tokio::spawn(async move {
        runner.run().await.unwrap();
        runner
    });

    // Stop the heartbeat while the loop is mid-flight; neither side
    // may block the other.
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.stop().await;

    let runner = loop_task.await.unwrap();
    assert_eq!(runner.cycles(), 2);
    assert_eq!(fake.item_status("q0").await, QueueItemStatus::Completed);
    assert_eq!(fake.item_status("q1").await, QueueItemStatus::Completed);
    assert!(fake.heartbeats().await >= 1);
}
