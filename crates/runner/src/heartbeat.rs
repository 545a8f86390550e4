//! Background liveness signaling.

use crate::mirror::{Liveness, UnitMirror};
use qsync_client::RemoteAuthority;
use qsync_core::UnitId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Recommended heartbeat cadence is 5-8 seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(6);

/// How long `stop` waits for an in-flight tick before giving up.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Maintains the authority's belief that this client is alive for one
/// unit, independent of whether any work is executing.
///
/// Each tick sends a heartbeat and records the returned connection
/// status in the mirror's liveness record. Tick failures are logged
/// and swallowed: a missed heartbeat only degrades the remote view to
/// "disconnected", so liveness signaling must never disturb the
/// execution flow.
pub struct HeartbeatMonitor {
    authority: Arc<dyn RemoteAuthority>,
    unit_id: UnitId,
    liveness: Arc<Mutex<Liveness>>,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Create a monitor for the mirrored unit. It does nothing until
    /// [`HeartbeatMonitor::start`] is called.
    pub fn new(authority: Arc<dyn RemoteAuthority>, mirror: &UnitMirror) -> Self {
        Self {
            authority,
            unit_id: mirror.unit_id().clone(),
            liveness: mirror.liveness(),
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Set the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the heartbeat task. The first tick fires immediately.
    pub fn start(self) -> HeartbeatHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                // Stop flag is observed at the top of each iteration.
                if *stop_rx.borrow() {
                    break;
                }

                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop_rx.changed() => continue,
                }

                match self.authority.heartbeat(&self.unit_id).await {
                    Ok(response) => {
                        let mut liveness = self.liveness.lock().await;
                        liveness.status = response.connection_status;
                        liveness.last_heartbeat =
                            response.last_heartbeat.or_else(|| Some(chrono::Utc::now()));
                    }
                    Err(e) => {
                        // Best-effort: log and keep ticking.
                        warn!(unit = %self.unit_id, "heartbeat failed: {e}");
                    }
                }
            }

            debug!(unit = %self.unit_id, "heartbeat stopped");
        });

        HeartbeatHandle {
            stop: stop_tx,
            task,
        }
    }
}

/// Handle to a running heartbeat task.
pub struct HeartbeatHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Request a cooperative stop and wait up to the default grace
    /// period for the in-flight tick to finish.
    pub async fn stop(self) {
        self.stop_with_grace(DEFAULT_STOP_GRACE).await;
    }

    /// Request a cooperative stop with an explicit grace period. If
    /// the grace elapses the task is left to wind down on its own.
    pub async fn stop_with_grace(mut self, grace: Duration) {
        let _ = self.stop.send(true);
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!("heartbeat task did not stop within the grace period");
        }
    }

    /// Whether the heartbeat task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
