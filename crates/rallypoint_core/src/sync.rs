//! Port-mapping cache synchronization.
//!
//! Pulls the accelerator's complete port-mapping set and replaces the local
//! cache with it. Replacement is write-then-prune: every fresh entry is
//! written first, then keys absent from the new enumeration are deleted, so
//! readers never observe an empty or mixed table. The full enumeration is
//! collected before the first write, which makes an aborted pagination
//! harmless to the existing cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rallypoint_types::{PortMappingEntry, ServiceError, StoreError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::services::AcceleratorService;
use crate::store::MappingStore;

/// Synchronizer tuning. The defaults match the upstream batch-write API
/// caps; `max_workers` defaults to twice the available parallelism and is
/// additionally capped by the batch count at run time.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub max_workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_retries: 3,
            max_workers: (num_cpus::get() * 2).max(1),
        }
    }
}

/// What one synchronization run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries returned by the upstream enumeration.
    pub entries_seen: usize,
    /// Entries that landed in the cache.
    pub entries_written: usize,
    /// Entries abandoned after the retry ceiling.
    pub entries_dropped: usize,
    /// Stale cache keys deleted after the write phase.
    pub entries_pruned: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Run-aborting synchronizer failure. Per-batch trouble is not here by
/// design: a stuck batch is retried, then dropped and counted, and the run
/// continues.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The accelerator enumeration failed; the cache was left untouched.
    #[error("accelerator enumeration failed: {0}")]
    Upstream(#[from] ServiceError),
    /// The cache itself failed outside the per-batch write path.
    #[error("mapping store failed: {0}")]
    Store(#[from] StoreError),
}

struct BatchOutcome {
    written: usize,
    dropped: usize,
}

/// Mirrors an accelerator's port mappings into the local cache.
pub struct PortMappingSynchronizer {
    accelerator: Arc<dyn AcceleratorService>,
    cache: Arc<dyn MappingStore>,
    config: SyncConfig,
}

impl PortMappingSynchronizer {
    pub fn new(
        accelerator: Arc<dyn AcceleratorService>,
        cache: Arc<dyn MappingStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            accelerator,
            cache,
            config,
        }
    }

    /// Runs one full synchronization against the given accelerator.
    ///
    /// The accelerator identifier is a per-call parameter so one
    /// synchronizer can serve several accelerators. Overlapping runs are
    /// not coordinated here; callers schedule one run at a time.
    pub async fn run(&self, accelerator_arn: &str) -> Result<SyncReport, SyncError> {
        let started = Instant::now();

        let entries = self.enumerate(accelerator_arn).await?;
        let entries_seen = entries.len();
        let fresh_keys: HashSet<String> = entries
            .iter()
            .map(|entry| entry.destination_address.clone())
            .collect();

        let (entries_written, entries_dropped) = self.upload(entries).await;
        let entries_pruned = self.prune(&fresh_keys).await?;

        let report = SyncReport {
            entries_seen,
            entries_written,
            entries_dropped,
            entries_pruned,
            elapsed: started.elapsed(),
        };
        info!(
            "port-mapping sync of {accelerator_arn}: {} seen, {} written, {} dropped, {} pruned in {:.2?}",
            report.entries_seen,
            report.entries_written,
            report.entries_dropped,
            report.entries_pruned,
            report.elapsed
        );
        Ok(report)
    }

    /// Follows the upstream cursor chain until exhausted.
    async fn enumerate(
        &self,
        accelerator_arn: &str,
    ) -> Result<Vec<PortMappingEntry>, ServiceError> {
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .accelerator
                .port_mappings_page(accelerator_arn, cursor.as_deref())
                .await?;
            entries.extend(page.port_mappings.into_iter().map(|m| m.flatten()));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!("enumerated {} port mapping(s) from {accelerator_arn}", entries.len());
        Ok(entries)
    }

    /// Writes all entries in bounded-parallel batches. Returns
    /// (written, dropped).
    async fn upload(&self, entries: Vec<PortMappingEntry>) -> (usize, usize) {
        if entries.is_empty() {
            return (0, 0);
        }

        let batches: Vec<Vec<PortMappingEntry>> = entries
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        let workers = self.config.max_workers.min(batches.len()).max(1);
        let slots = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        for (index, batch) in batches.into_iter().enumerate() {
            let cache = Arc::clone(&self.cache);
            let slots = Arc::clone(&slots);
            let max_retries = self.config.max_retries;
            tasks.spawn(async move {
                let _permit = slots.acquire_owned().await.expect("semaphore closed");
                upload_batch(cache, index, batch, max_retries).await
            });
        }

        let mut written = 0;
        let mut dropped = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    written += outcome.written;
                    dropped += outcome.dropped;
                }
                Err(err) => error!("batch upload task failed to complete: {err}"),
            }
        }
        (written, dropped)
    }

    /// Deletes cache keys that are not part of the fresh enumeration.
    async fn prune(&self, fresh_keys: &HashSet<String>) -> Result<usize, SyncError> {
        let stale: Vec<String> = self
            .cache
            .keys()
            .await?
            .into_iter()
            .filter(|key| !fresh_keys.contains(key))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let pruned = self.cache.remove(&stale).await?;
        debug!("pruned {pruned} stale port mapping(s)");
        Ok(pruned)
    }
}

/// Writes one batch, retrying the unprocessed remainder with exponential
/// backoff. The backoff sleep blocks only this worker; a batch that stays
/// stuck is dropped with a warning instead of failing the run.
async fn upload_batch(
    cache: Arc<dyn MappingStore>,
    index: usize,
    batch: Vec<PortMappingEntry>,
    max_retries: u32,
) -> BatchOutcome {
    let mut pending = batch;
    let mut written = 0;
    let mut attempt = 0u32;
    loop {
        match cache.write_batch(&pending).await {
            Ok(unprocessed) => {
                written += pending.len() - unprocessed.len();
                if unprocessed.is_empty() {
                    return BatchOutcome { written, dropped: 0 };
                }
                pending = unprocessed;
            }
            Err(err) => {
                warn!("batch {index} write failed: {err}");
            }
        }

        if attempt >= max_retries {
            warn!(
                "dropping {} port mapping(s) from batch {index} after {max_retries} retries",
                pending.len()
            );
            return BatchOutcome {
                written,
                dropped: pending.len(),
            };
        }
        attempt += 1;
        let backoff = Duration::from_secs(2u64.pow(attempt));
        debug!(
            "batch {index}: {} unprocessed item(s), retry {attempt}/{max_retries} in {:?}",
            pending.len(),
            backoff
        );
        sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMappingStore;
    use crate::stub::{upstream_mapping, FlakyMappingStore, StubAccelerator};

    const ARN: &str = "arn:accel/one";

    fn seeded_accelerator(page_size: usize, count: usize) -> Arc<StubAccelerator> {
        let accel = Arc::new(StubAccelerator::new(ARN, page_size));
        accel.set_mappings(
            (0..count)
                .map(|i| upstream_mapping(&format!("10.0.1.{i}"), 9000 + i as u16))
                .collect(),
        );
        accel
    }

    #[tokio::test]
    async fn sync_replaces_cache_with_multi_page_enumeration() {
        let accel = seeded_accelerator(3, 8);
        let cache = Arc::new(MemoryMappingStore::new());
        // Pre-existing entry that is no longer upstream.
        cache
            .write_batch(&[upstream_mapping("192.168.0.1", 8000).flatten()])
            .await
            .unwrap();

        let sync = PortMappingSynchronizer::new(
            accel.clone(),
            cache.clone(),
            SyncConfig {
                batch_size: 4,
                ..SyncConfig::default()
            },
        );
        let report = sync.run(ARN).await.unwrap();

        assert_eq!(report.entries_seen, 8);
        assert_eq!(report.entries_written, 8);
        assert_eq!(report.entries_dropped, 0);
        assert_eq!(report.entries_pruned, 1);
        // Three pages of three, three and two.
        assert_eq!(accel.list_calls(), 3);

        assert_eq!(cache.len(), 8);
        assert!(cache.lookup("192.168.0.1").await.unwrap().is_none());
        let entry = cache.lookup("10.0.1.5").await.unwrap().unwrap();
        assert_eq!(entry.accelerator_port, 9005);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_throttling_is_retried_to_success() {
        let accel = seeded_accelerator(10, 4);
        let cache = Arc::new(FlakyMappingStore::refusing("10.0.1.2", 2));

        let sync = PortMappingSynchronizer::new(accel, cache.clone(), SyncConfig::default());
        let report = sync.run(ARN).await.unwrap();

        assert_eq!(report.entries_written, 4);
        assert_eq!(report.entries_dropped, 0);
        assert!(cache.lookup("10.0.1.2").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn persistently_stuck_batch_is_dropped_but_run_completes() {
        let accel = seeded_accelerator(10, 6);
        let cache = Arc::new(FlakyMappingStore::refusing("10.0.1.3", usize::MAX));

        let sync = PortMappingSynchronizer::new(
            accel,
            cache.clone(),
            SyncConfig {
                batch_size: 2,
                ..SyncConfig::default()
            },
        );
        let report = sync.run(ARN).await.unwrap();

        assert_eq!(report.entries_seen, 6);
        assert_eq!(report.entries_written, 5);
        assert_eq!(report.entries_dropped, 1);
        assert!(cache.lookup("10.0.1.3").await.unwrap().is_none());
        for i in [0usize, 1, 2, 4, 5] {
            assert!(
                cache.lookup(&format!("10.0.1.{i}")).await.unwrap().is_some(),
                "entry 10.0.1.{i} missing"
            );
        }
    }

    #[tokio::test]
    async fn pagination_failure_aborts_and_leaves_cache_intact() {
        let accel = seeded_accelerator(2, 6);
        accel.fail_from_page(2);
        let cache = Arc::new(MemoryMappingStore::new());
        cache
            .write_batch(&[upstream_mapping("10.9.9.9", 8999).flatten()])
            .await
            .unwrap();

        let sync = PortMappingSynchronizer::new(accel, cache.clone(), SyncConfig::default());
        let err = sync.run(ARN).await.unwrap_err();

        assert!(matches!(err, SyncError::Upstream(ServiceError::Throttled(_))));
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("10.9.9.9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_accelerator_surfaces_not_found() {
        let accel = Arc::new(StubAccelerator::new(ARN, 5));
        let cache = Arc::new(MemoryMappingStore::new());
        let sync = PortMappingSynchronizer::new(accel, cache, SyncConfig::default());

        let err = sync.run("arn:accel/other").await.unwrap_err();
        assert!(matches!(err, SyncError::Upstream(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_upstream_set_prunes_everything() {
        let accel = Arc::new(StubAccelerator::new(ARN, 5));
        let cache = Arc::new(MemoryMappingStore::new());
        cache
            .write_batch(&[upstream_mapping("10.0.1.0", 9000).flatten()])
            .await
            .unwrap();

        let sync = PortMappingSynchronizer::new(accel, cache.clone(), SyncConfig::default());
        let report = sync.run(ARN).await.unwrap();

        assert_eq!(report.entries_seen, 0);
        assert_eq!(report.entries_pruned, 1);
        assert!(cache.is_empty());
    }
}
