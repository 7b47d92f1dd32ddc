//! Idle-compute reconciliation.
//!
//! Compute units gain scale-in protection when a game session starts on
//! them. Nothing clears that flag when the session ends, so without this
//! loop the cluster could never shrink. The reconciler cross-references
//! every protected unit against live session occupancy and releases
//! protection on the ones nobody plays on.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rallypoint_types::{ComputeUnitId, ServiceError};
use tracing::{debug, info, warn};

use crate::services::{MatchmakingService, OrchestrationService, PROTECTION_STATUS_MAX_BATCH};

/// Concurrent per-unit occupancy checks in flight at once.
const MAX_PARALLEL_UNIT_CHECKS: usize = 8;

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Protected units whose occupancy was checked.
    pub units_checked: usize,
    /// Units whose protection was released.
    pub units_released: usize,
}

/// Run-aborting reconciler failure. Anything below the initial unit listing
/// is logged and skipped per unit instead.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("orchestration listing failed: {0}")]
    Orchestration(#[from] ServiceError),
}

/// Releases scale-in protection on compute units with no active session.
pub struct IdleReconciler {
    orchestration: Arc<dyn OrchestrationService>,
    matchmaking: Arc<dyn MatchmakingService>,
}

impl IdleReconciler {
    pub fn new(
        orchestration: Arc<dyn OrchestrationService>,
        matchmaking: Arc<dyn MatchmakingService>,
    ) -> Self {
        Self {
            orchestration,
            matchmaking,
        }
    }

    /// Runs one reconciliation pass over a cluster.
    ///
    /// Sessions are matched to units through the session property carrying
    /// the hosting compute id. A session whose property has not propagated
    /// yet is invisible to the check, so a just-started session can still
    /// lose its unit's protection for one pass, an accepted consequence of
    /// the upstream's eventual consistency.
    pub async fn run(
        &self,
        cluster: &str,
        fleet: &str,
        location: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let running = self.orchestration.list_running_units(cluster).await?;
        if running.is_empty() {
            info!("no running units in cluster {cluster}, nothing to reconcile");
            return Ok(ReconcileReport::default());
        }

        let protected = self.protected_units(cluster, &running).await;
        info!(
            "{} of {} running unit(s) in {cluster} carry scale-in protection",
            protected.len(),
            running.len()
        );

        let released = AtomicUsize::new(0);
        let checked = protected.len();
        stream::iter(protected)
            .for_each_concurrent(MAX_PARALLEL_UNIT_CHECKS, |unit| {
                let released = &released;
                async move {
                    if self.reconcile_unit(cluster, fleet, location, &unit).await {
                        released.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .await;

        let report = ReconcileReport {
            units_checked: checked,
            units_released: released.into_inner(),
        };
        info!(
            "reconciliation of {cluster}: {} unit(s) checked, {} released",
            report.units_checked, report.units_released
        );
        Ok(report)
    }

    /// Deregisters a stopped unit from the fleet.
    ///
    /// Idempotent: an already-absent unit is success. Returns whether the
    /// unit was still registered when the call was made.
    pub async fn release_stopped_unit(
        &self,
        fleet: &str,
        unit: &ComputeUnitId,
    ) -> Result<bool, ServiceError> {
        match self.orchestration.deregister_compute(fleet, unit).await {
            Ok(()) => {
                info!("deregistered compute {} from fleet {fleet}", unit.short_id());
                Ok(true)
            }
            Err(err) if err.is_not_found() => {
                info!(
                    "compute {} already deregistered from fleet {fleet}",
                    unit.short_id()
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Fetches protection flags in API-sized chunks and keeps the protected
    /// subset. A failed chunk is logged and skipped.
    async fn protected_units(
        &self,
        cluster: &str,
        running: &[ComputeUnitId],
    ) -> Vec<ComputeUnitId> {
        let mut protected = Vec::new();
        for chunk in running.chunks(PROTECTION_STATUS_MAX_BATCH) {
            match self.orchestration.protection_status(cluster, chunk).await {
                Ok(statuses) => protected.extend(
                    statuses
                        .into_iter()
                        .filter(|(_, enabled)| *enabled)
                        .map(|(unit, _)| unit),
                ),
                Err(err) => warn!(
                    "protection status fetch failed for {} unit(s): {err}",
                    chunk.len()
                ),
            }
        }
        protected
    }

    /// Checks one protected unit and releases protection if it is idle.
    /// Returns whether protection was released.
    async fn reconcile_unit(
        &self,
        cluster: &str,
        fleet: &str,
        location: &str,
        unit: &ComputeUnitId,
    ) -> bool {
        let occupied = match self.unit_is_occupied(fleet, location, unit).await {
            Ok(occupied) => occupied,
            Err(err) => {
                warn!("session check failed for unit {}: {err}", unit.short_id());
                return false;
            }
        };
        if occupied {
            debug!("unit {} still hosts an active session", unit.short_id());
            return false;
        }

        match self.orchestration.set_protection(cluster, unit, false).await {
            Ok(()) => {
                info!("released scale-in protection on idle unit {}", unit.short_id());
                true
            }
            Err(err) if err.is_not_found() => {
                // The unit disappeared between listing and update; protection
                // is moot for a unit that no longer exists.
                debug!("unit {} gone before protection update", unit.short_id());
                true
            }
            Err(err) => {
                warn!(
                    "failed to release protection on unit {}: {err}",
                    unit.short_id()
                );
                false
            }
        }
    }

    async fn unit_is_occupied(
        &self,
        fleet: &str,
        location: &str,
        unit: &ComputeUnitId,
    ) -> Result<bool, ServiceError> {
        let sessions = self.matchmaking.active_sessions(fleet, location).await?;
        Ok(sessions.iter().any(|s| s.references_compute(unit)))
    }
}
