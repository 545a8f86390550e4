//! The qsync execution engine.
//!
//! Keeps a local mirror of one unit's queue consistent with the remote
//! authority (version-stamped snapshot sync), enforces the queue-item
//! lifecycle with confirm-then-mutate discipline, signals liveness on
//! an independent heartbeat task, and drives items to completion one
//! at a time in the authority's order.

mod heartbeat;
mod mirror;
mod ordering;
mod run;
mod state;
mod sync;

pub use heartbeat::{
    HeartbeatHandle, HeartbeatMonitor, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_STOP_GRACE,
};
pub use mirror::{Liveness, MirrorState, UnitMirror};
pub use ordering::{select_next, OrderingResolver};
pub use run::{CancelFlag, CycleOutcome, RunnerConfig, UnitRunner, WorkFn, WorkHandler, WorkOutput};
pub use state::QueueItemStateMachine;
pub use sync::{SyncEngine, SyncOutcome};
