//! Version-stamped snapshot sync against the remote authority.

use crate::mirror::UnitMirror;
use qsync_client::RemoteAuthority;
use qsync_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one sync round-trip.
#[derive(Debug, Clone, Copy)]
pub struct SyncOutcome {
    /// Whether a new snapshot was adopted
    pub changed: bool,

    /// Local version after the sync
    pub version: i64,
}

/// Reconciles the mirror against the authority.
///
/// Full-snapshot replacement: when the remote version is ahead, the
/// response's complete queue list replaces the local one and the
/// version advances, as a single atomic swap under the mirror mutex.
/// There is no merge; local status knowledge between syncs is covered
/// by the eager push of transitions in the state machine. A transport
/// failure leaves the mirror untouched.
#[derive(Clone)]
pub struct SyncEngine {
    authority: Arc<dyn RemoteAuthority>,
    mirror: Arc<UnitMirror>,
}

impl SyncEngine {
    /// Create a sync engine for one mirrored unit.
    pub fn new(authority: Arc<dyn RemoteAuthority>, mirror: Arc<UnitMirror>) -> Self {
        Self { authority, mirror }
    }

    /// Pull the latest snapshot if the authority's version is ahead.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        let local_version = self.mirror.version().await;
        let response = self
            .authority
            .sync_unit(self.mirror.unit_id(), local_version)
            .await?;

        if !response.need_sync {
            debug!(
                unit = %self.mirror.unit_id(),
                version = local_version,
                "mirror is current"
            );
            return Ok(SyncOutcome {
                changed: false,
                version: local_version,
            });
        }

        // The local version never regresses; a snapshot stamped behind
        // it is a protocol violation, not something to adopt.
        if response.cloud_version < local_version {
            return Err(Error::Connectivity(format!(
                "authority reported version {} behind local version {}",
                response.cloud_version, local_version
            )));
        }

        let items = response.queues.unwrap_or_default();
        let item_count = items.len();

        let mut state = self.mirror.lock().await;
        state.adopt_snapshot(response.cloud_version, response.unit, items);
        drop(state);

        info!(
            unit = %self.mirror.unit_id(),
            from = local_version,
            to = response.cloud_version,
            items = item_count,
            "adopted remote snapshot"
        );

        Ok(SyncOutcome {
            changed: true,
            version: response.cloud_version,
        })
    }
}
