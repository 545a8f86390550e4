//! The execution loop driving a unit's queue to completion.

use crate::mirror::UnitMirror;
use crate::ordering::OrderingResolver;
use crate::state::QueueItemStateMachine;
use crate::sync::SyncEngine;
use async_trait::async_trait;
use qsync_client::RemoteAuthority;
use qsync_core::{Payload, QueueItem, QueueItemId, Result, Unit};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What a work function produces on success.
#[derive(Debug, Clone, Default)]
pub struct WorkOutput {
    /// Result blob reported to the authority
    pub result: Payload,

    /// Metrics blob reported to the authority
    pub metrics: Payload,
}

impl WorkOutput {
    /// Output with a result and no metrics.
    pub fn new(result: Payload) -> Self {
        Self {
            result,
            metrics: Payload::new(),
        }
    }

    /// Attach metrics.
    pub fn with_metrics(mut self, metrics: Payload) -> Self {
        self.metrics = metrics;
        self
    }
}

/// The black box executed for each queue item.
///
/// The core never interprets the parameters or the output; it only
/// reports them. A returned error marks the item failed with the
/// error's description.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    /// Execute one item.
    async fn run(&self, item: &QueueItem) -> anyhow::Result<WorkOutput>;
}

/// Adapter turning a plain closure into a [`WorkHandler`].
pub struct WorkFn<F>(F);

impl<F> WorkFn<F>
where
    F: Fn(&QueueItem) -> anyhow::Result<WorkOutput> + Send + Sync,
{
    /// Wrap a closure as a work handler.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> WorkHandler for WorkFn<F>
where
    F: Fn(&QueueItem) -> anyhow::Result<WorkOutput> + Send + Sync,
{
    async fn run(&self, item: &QueueItem) -> anyhow::Result<WorkOutput> {
        (self.0)(item)
    }
}

/// Configuration for [`UnitRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Delay between loop iterations, bounding the remote polling rate
    pub poll_interval: Duration,

    /// Stop when no pending items remain; `false` keeps polling for
    /// work created later
    pub exit_when_drained: bool,

    /// Max cycles before stopping (None = unbounded)
    pub max_cycles: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            exit_when_drained: true,
            max_cycles: None,
        }
    }
}

/// Cooperative cancellation flag for a runner.
///
/// Checked at iteration boundaries; a cancellation request takes
/// effect at the next natural suspension point and never discards
/// in-flight remote state.
#[derive(Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a single loop cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// An item was started and finished (completed or failed)
    Executed {
        /// The item that ran
        item: QueueItemId,
        /// Whether the work function succeeded
        completed: bool,
    },
    /// No pending items remained after sync
    Drained,
    /// Cancellation was observed before any work started
    Cancelled,
}

/// Drives one unit: sync, select the head pending item, start it, run
/// the work function, report the outcome, repeat.
///
/// One item executes at a time per runner; concurrency across units is
/// achieved by running independent runners. Work-function failures are
/// per-item bookkeeping (the item is marked failed and the loop
/// continues); connectivity and authentication failures abort the loop
/// and surface to the caller.
pub struct UnitRunner {
    sync: SyncEngine,
    state: QueueItemStateMachine,
    ordering: OrderingResolver,
    mirror: Arc<UnitMirror>,
    handler: Arc<dyn WorkHandler>,
    config: RunnerConfig,
    cancel: CancelFlag,
    cycles_run: usize,
}

impl UnitRunner {
    /// Create a runner for a unit. The mirror starts empty; the first
    /// cycle's sync adopts the authority's snapshot.
    pub fn new(
        authority: Arc<dyn RemoteAuthority>,
        unit: Unit,
        handler: Arc<dyn WorkHandler>,
    ) -> Self {
        let mirror = Arc::new(UnitMirror::new(unit));
        Self {
            sync: SyncEngine::new(Arc::clone(&authority), Arc::clone(&mirror)),
            state: QueueItemStateMachine::new(Arc::clone(&authority), Arc::clone(&mirror)),
            ordering: OrderingResolver::new(Arc::clone(&authority), Arc::clone(&mirror)),
            mirror,
            handler,
            config: RunnerConfig::default(),
            cancel: CancelFlag(Arc::new(AtomicBool::new(false))),
            cycles_run: 0,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle to the unit mirror (e.g. to share with a heartbeat
    /// monitor or to inspect state from outside the loop).
    pub fn mirror(&self) -> Arc<UnitMirror> {
        Arc::clone(&self.mirror)
    }

    /// Cancellation flag; clone it and call `cancel()` from anywhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The ordering resolver for this unit, for submitting reorders
    /// between cycles.
    pub fn ordering(&self) -> &OrderingResolver {
        &self.ordering
    }

    /// Cycles run so far.
    pub fn cycles(&self) -> usize {
        self.cycles_run
    }

    /// Run one cycle: sync, select, start, execute, report.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(CycleOutcome::Cancelled);
        }

        self.sync.sync().await?;

        let Some(item) = self.ordering.next_pending().await else {
            return Ok(CycleOutcome::Drained);
        };

        self.state.start(&item.id).await?;
        info!(item = %item.id, name = %item.name, order = item.order, "executing item");

        let outcome = match self.handler.run(&item).await {
            Ok(output) => {
                self.state
                    .complete(&item.id, output.result, output.metrics)
                    .await?;
                CycleOutcome::Executed {
                    item: item.id,
                    completed: true,
                }
            }
            Err(e) => {
                let description = format!("{e:#}");
                warn!(item = %item.id, "work function failed: {description}");
                self.state.fail(&item.id, &description).await?;
                CycleOutcome::Executed {
                    item: item.id,
                    completed: false,
                }
            }
        };

        self.cycles_run += 1;
        Ok(outcome)
    }

    /// Run until the queue drains (or indefinitely with
    /// `exit_when_drained = false`), cancellation is requested, or a
    /// connectivity/authentication failure aborts the loop.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if let Some(max) = self.config.max_cycles {
                if self.cycles_run >= max {
                    info!("reached max cycles ({max})");
                    break;
                }
            }

            match self.run_cycle().await? {
                CycleOutcome::Cancelled => {
                    info!(unit = %self.mirror.unit_id(), "runner cancelled");
                    break;
                }
                CycleOutcome::Drained => {
                    if self.config.exit_when_drained {
                        info!(unit = %self.mirror.unit_id(), "queue drained");
                        break;
                    }
                }
                CycleOutcome::Executed { .. } => {}
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }

        Ok(())
    }
}
