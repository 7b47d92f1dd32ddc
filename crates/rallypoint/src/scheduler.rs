//! Schedule loops for the background control jobs.
//!
//! Each loop drives one job on a fixed interval and exits on shutdown. A
//! job run happens inline in its loop, so two runs of the same job can
//! never overlap, which is the serialization the synchronizer's
//! write-then-prune replacement relies on. Every run carries a deadline of one
//! interval; a run that outlives it is abandoned, which both jobs tolerate
//! (partial progress never corrupts a store).

use std::sync::Arc;
use std::time::Duration;

use rallypoint_core::{IdleReconciler, PortMappingSynchronizer};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info};

/// Spawns the port-mapping synchronization loop. The first run fires
/// immediately so the cache is usable right after startup.
pub fn spawn_sync_loop(
    synchronizer: Arc<PortMappingSynchronizer>,
    accelerator_arn: String,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match timeout(every, synchronizer.run(&accelerator_arn)).await {
                        Ok(Ok(report)) => {
                            if report.entries_dropped > 0 {
                                error!(
                                    "port-mapping sync dropped {} entr(ies); cache is missing part of the upstream set",
                                    report.entries_dropped
                                );
                            }
                        }
                        Ok(Err(e)) => error!("scheduled port-mapping sync failed: {e}"),
                        Err(_) => error!("port-mapping sync abandoned after {every:?}"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Port-mapping sync loop stopping");
                    break;
                }
            }
        }
    })
}

/// Spawns the idle-compute reconciliation loop.
pub fn spawn_reconcile_loop(
    reconciler: Arc<IdleReconciler>,
    cluster: String,
    fleet: String,
    location: String,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match timeout(every, reconciler.run(&cluster, &fleet, &location)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("scheduled reconciliation failed: {e}"),
                        Err(_) => error!("reconciliation abandoned after {every:?}"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Reconciliation loop stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rallypoint_core::stub::{StubAccelerator, StubMatchmaking, StubOrchestration};
    use rallypoint_core::{MemoryMappingStore, SyncConfig};
    use rallypoint_types::ComputeUnitId;

    #[tokio::test(start_paused = true)]
    async fn sync_loop_runs_on_schedule_and_stops_on_shutdown() {
        let accelerator = Arc::new(StubAccelerator::new("arn:accel/one", 25));
        let synchronizer = Arc::new(PortMappingSynchronizer::new(
            accelerator.clone(),
            Arc::new(MemoryMappingStore::new()),
            SyncConfig::default(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = spawn_sync_loop(
            synchronizer,
            "arn:accel/one".into(),
            Duration::from_secs(60),
            shutdown_tx.subscribe(),
        );

        // First tick fires immediately; the next after the interval.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(accelerator.list_calls() >= 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_loop_releases_idle_units_over_time() {
        let orchestration = Arc::new(StubOrchestration::new("game-cluster", "fleet-1"));
        let unit = ComputeUnitId::new("arn:cluster/game-cluster/unit-1");
        orchestration.add_unit(&unit, true);
        let reconciler = Arc::new(IdleReconciler::new(
            orchestration.clone(),
            Arc::new(StubMatchmaking::new()),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = spawn_reconcile_loop(
            reconciler,
            "game-cluster".into(),
            "fleet-1".into(),
            "custom-loc".into(),
            Duration::from_secs(60),
            shutdown_tx.subscribe(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestration.protection(&unit), Some(false));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
