//! In-memory implementations of the collaborator seams.
//!
//! These back the `memory` backend of the binary (local runs with no cloud
//! services attached) and every failure-path test in the crate. Each stub
//! exposes the small set of knobs the tests need: seeded state, call
//! counters, and injectable failures.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use rallypoint_types::{
    ComputeUnitId, GameSession, PortMappingEntry, PortMappingPage, ServiceError, SessionProperty,
    SocketDestination, StoreError, UpstreamPortMapping, SESSION_COMPUTE_PROPERTY,
};

use crate::services::{
    AcceleratorService, MatchmakingService, OrchestrationService, PROTECTION_STATUS_MAX_BATCH,
};
use crate::store::{MappingStore, MemoryMappingStore};

/// Builds an ACTIVE game session pinned to a compute unit, for seeding
/// [`StubMatchmaking`].
pub fn session_on_compute(fleet: &str, location: &str, compute_short_id: &str) -> GameSession {
    GameSession {
        session_id: format!("gs-{compute_short_id}"),
        fleet_id: fleet.to_string(),
        location: location.to_string(),
        status: "ACTIVE".to_string(),
        properties: vec![SessionProperty {
            key: SESSION_COMPUTE_PROPERTY.to_string(),
            value: compute_short_id.to_string(),
        }],
    }
}

/// Builds an upstream port mapping for seeding [`StubAccelerator`].
pub fn upstream_mapping(destination_address: &str, accelerator_port: u16) -> UpstreamPortMapping {
    UpstreamPortMapping {
        accelerator_port,
        endpoint_group_arn: "arn:endpoint-group/eg-1".to_string(),
        endpoint_id: "subnet-1".to_string(),
        destination: SocketDestination {
            ip_address: destination_address.to_string(),
            port: 7777,
        },
        protocols: vec!["UDP".to_string()],
        traffic_state: "ALLOW".to_string(),
    }
}

/// In-memory matchmaking service.
#[derive(Default)]
pub struct StubMatchmaking {
    sessions: Mutex<Vec<GameSession>>,
    next_ticket: AtomicU64,
    outage: AtomicBool,
    session_queries: AtomicUsize,
}

impl StubMatchmaking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the active-session set returned by queries.
    pub fn set_sessions(&self, sessions: Vec<GameSession>) {
        *self.sessions.lock().expect("sessions lock poisoned") = sessions;
    }

    /// When set, every call fails with `ServiceError::Unavailable`.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// How many session queries have been served.
    pub fn session_queries(&self) -> usize {
        self.session_queries.load(Ordering::SeqCst)
    }

    fn check_outage(&self) -> Result<(), ServiceError> {
        if self.outage.load(Ordering::SeqCst) {
            Err(ServiceError::Unavailable("matchmaking stub offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MatchmakingService for StubMatchmaking {
    async fn active_sessions(
        &self,
        fleet: &str,
        location: &str,
    ) -> Result<Vec<GameSession>, ServiceError> {
        self.check_outage()?;
        self.session_queries.fetch_add(1, Ordering::SeqCst);
        let sessions = self.sessions.lock().expect("sessions lock poisoned");
        Ok(sessions
            .iter()
            .filter(|s| s.fleet_id == fleet && s.location == location && s.status == "ACTIVE")
            .cloned()
            .collect())
    }

    async fn start_matchmaking(
        &self,
        _configuration: &str,
        player_id: &str,
        _attributes: serde_json::Value,
    ) -> Result<String, ServiceError> {
        self.check_outage()?;
        let n = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        Ok(format!("ticket-{player_id}-{n}"))
    }
}

/// In-memory orchestration service for a single cluster/fleet pair.
pub struct StubOrchestration {
    cluster: String,
    fleet: String,
    /// unit id → scale-in protection flag, for units in RUNNING state.
    units: DashMap<String, bool>,
    /// compute short-ids currently registered with the fleet.
    registered: DashMap<String, ()>,
    fail_status_fetch: AtomicBool,
    fail_clear_for: DashMap<String, ()>,
    status_calls: AtomicUsize,
    largest_status_batch: AtomicUsize,
}

impl StubOrchestration {
    pub fn new(cluster: &str, fleet: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            fleet: fleet.to_string(),
            units: DashMap::new(),
            registered: DashMap::new(),
            fail_status_fetch: AtomicBool::new(false),
            fail_clear_for: DashMap::new(),
            status_calls: AtomicUsize::new(0),
            largest_status_batch: AtomicUsize::new(0),
        }
    }

    /// Adds a running unit and registers its compute with the fleet.
    pub fn add_unit(&self, unit: &ComputeUnitId, protected: bool) {
        self.units.insert(unit.as_str().to_string(), protected);
        self.registered.insert(unit.short_id().to_string(), ());
    }

    /// Current protection flag of a unit, if it is running.
    pub fn protection(&self, unit: &ComputeUnitId) -> Option<bool> {
        self.units.get(unit.as_str()).map(|p| *p)
    }

    /// Whether a compute short-id is still registered with the fleet.
    pub fn is_registered(&self, short_id: &str) -> bool {
        self.registered.contains_key(short_id)
    }

    /// When set, protection-status fetches fail with
    /// `ServiceError::Unavailable`.
    pub fn set_fail_status_fetch(&self, fail: bool) {
        self.fail_status_fetch.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_protection` fail for one specific unit.
    pub fn fail_clear_for(&self, unit: &ComputeUnitId) {
        self.fail_clear_for.insert(unit.as_str().to_string(), ());
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Largest unit count seen in one protection-status call.
    pub fn largest_status_batch(&self) -> usize {
        self.largest_status_batch.load(Ordering::SeqCst)
    }

    fn check_cluster(&self, cluster: &str) -> Result<(), ServiceError> {
        if cluster == self.cluster {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("cluster {cluster}")))
        }
    }
}

#[async_trait]
impl OrchestrationService for StubOrchestration {
    async fn list_running_units(
        &self,
        cluster: &str,
    ) -> Result<Vec<ComputeUnitId>, ServiceError> {
        self.check_cluster(cluster)?;
        let mut ids: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids.into_iter().map(ComputeUnitId::new).collect())
    }

    async fn protection_status(
        &self,
        cluster: &str,
        units: &[ComputeUnitId],
    ) -> Result<Vec<(ComputeUnitId, bool)>, ServiceError> {
        self.check_cluster(cluster)?;
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.largest_status_batch
            .fetch_max(units.len(), Ordering::SeqCst);
        if units.len() > PROTECTION_STATUS_MAX_BATCH {
            return Err(ServiceError::Malformed(format!(
                "protection status limited to {PROTECTION_STATUS_MAX_BATCH} units, got {}",
                units.len()
            )));
        }
        if self.fail_status_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("status fetch stub failure".into()));
        }
        Ok(units
            .iter()
            .filter_map(|unit| {
                self.units
                    .get(unit.as_str())
                    .map(|flag| (unit.clone(), *flag))
            })
            .collect())
    }

    async fn set_protection(
        &self,
        cluster: &str,
        unit: &ComputeUnitId,
        protected: bool,
    ) -> Result<(), ServiceError> {
        self.check_cluster(cluster)?;
        if self.fail_clear_for.contains_key(unit.as_str()) {
            return Err(ServiceError::Unavailable("protection update stub failure".into()));
        }
        match self.units.get_mut(unit.as_str()) {
            Some(mut flag) => {
                *flag = protected;
                Ok(())
            }
            None => Err(ServiceError::NotFound(unit.to_string())),
        }
    }

    async fn deregister_compute(
        &self,
        fleet: &str,
        unit: &ComputeUnitId,
    ) -> Result<(), ServiceError> {
        if fleet != self.fleet {
            return Err(ServiceError::NotFound(format!("fleet {fleet}")));
        }
        if self.registered.remove(unit.short_id()).is_some() {
            Ok(())
        } else {
            Err(ServiceError::NotFound(unit.to_string()))
        }
    }
}

/// A traffic admission recorded by [`StubAccelerator::allow_traffic`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedRoute {
    pub endpoint_group: String,
    pub endpoint_id: String,
    pub destination_address: String,
    pub destination_port: u16,
}

/// In-memory accelerator with cursor pagination over a seeded mapping list.
pub struct StubAccelerator {
    arn: String,
    mappings: Mutex<Vec<UpstreamPortMapping>>,
    page_size: usize,
    /// 1-based page index at which listing starts failing; 0 disables.
    fail_at_page: AtomicUsize,
    opened: Mutex<Vec<OpenedRoute>>,
    list_calls: AtomicUsize,
}

impl StubAccelerator {
    pub fn new(arn: &str, page_size: usize) -> Self {
        Self {
            arn: arn.to_string(),
            mappings: Mutex::new(Vec::new()),
            page_size: page_size.max(1),
            fail_at_page: AtomicUsize::new(0),
            opened: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mappings(&self, mappings: Vec<UpstreamPortMapping>) {
        *self.mappings.lock().expect("mappings lock poisoned") = mappings;
    }

    /// Fails enumeration from the given 1-based page onwards.
    pub fn fail_from_page(&self, page: usize) {
        self.fail_at_page.store(page, Ordering::SeqCst);
    }

    /// All admissions recorded so far.
    pub fn opened_routes(&self) -> Vec<OpenedRoute> {
        self.opened.lock().expect("opened lock poisoned").clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcceleratorService for StubAccelerator {
    async fn port_mappings_page(
        &self,
        accelerator_arn: &str,
        cursor: Option<&str>,
    ) -> Result<PortMappingPage, ServiceError> {
        if accelerator_arn != self.arn {
            return Err(ServiceError::NotFound(format!(
                "accelerator {accelerator_arn}"
            )));
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        let offset: usize = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| ServiceError::Malformed(format!("bad cursor {raw:?}")))?,
            None => 0,
        };
        let page_index = offset / self.page_size + 1;
        let fail_at = self.fail_at_page.load(Ordering::SeqCst);
        if fail_at != 0 && page_index >= fail_at {
            return Err(ServiceError::Throttled(format!(
                "listing throttled at page {page_index}"
            )));
        }

        let mappings = self.mappings.lock().expect("mappings lock poisoned");
        let end = (offset + self.page_size).min(mappings.len());
        let page: Vec<UpstreamPortMapping> = mappings[offset.min(end)..end].to_vec();
        let next_cursor = (end < mappings.len()).then(|| end.to_string());
        Ok(PortMappingPage {
            port_mappings: page,
            next_cursor,
        })
    }

    async fn allow_traffic(
        &self,
        endpoint_group: &str,
        endpoint_id: &str,
        destination_address: &str,
        destination_port: u16,
    ) -> Result<(), ServiceError> {
        self.opened
            .lock()
            .expect("opened lock poisoned")
            .push(OpenedRoute {
                endpoint_group: endpoint_group.to_string(),
                endpoint_id: endpoint_id.to_string(),
                destination_address: destination_address.to_string(),
                destination_port,
            });
        Ok(())
    }
}

/// Mapping store that refuses to accept entries for one destination
/// address, modelling per-batch capacity throttling.
///
/// Refused entries come back as the unprocessed remainder; everything else
/// in the batch lands in the wrapped store. `refusals_remaining` of
/// `usize::MAX` throttles forever.
pub struct FlakyMappingStore {
    inner: MemoryMappingStore,
    refuse_address: String,
    refusals_remaining: AtomicUsize,
}

impl FlakyMappingStore {
    pub fn refusing(address: &str, times: usize) -> Self {
        Self {
            inner: MemoryMappingStore::new(),
            refuse_address: address.to_string(),
            refusals_remaining: AtomicUsize::new(times),
        }
    }

    pub fn inner(&self) -> &MemoryMappingStore {
        &self.inner
    }

    fn should_refuse(&self) -> bool {
        self.refusals_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 || n == usize::MAX {
                    None
                } else {
                    Some(n - 1)
                }
            })
            .map(|previous| previous > 0)
            .unwrap_or_else(|n| n == usize::MAX)
    }
}

#[async_trait]
impl MappingStore for FlakyMappingStore {
    async fn write_batch(
        &self,
        batch: &[PortMappingEntry],
    ) -> Result<Vec<PortMappingEntry>, StoreError> {
        let (refused, accepted): (Vec<_>, Vec<_>) = batch
            .iter()
            .cloned()
            .partition(|e| e.destination_address == self.refuse_address);
        if refused.is_empty() || !self.should_refuse() {
            return self.inner.write_batch(batch).await;
        }
        self.inner.write_batch(&accepted).await?;
        Ok(refused)
    }

    async fn lookup(
        &self,
        destination_address: &str,
    ) -> Result<Option<PortMappingEntry>, StoreError> {
        self.inner.lookup(destination_address).await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn remove(&self, keys: &[String]) -> Result<usize, StoreError> {
        self.inner.remove(keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accelerator_paginates_with_cursors() {
        let accel = StubAccelerator::new("arn:accel/one", 2);
        accel.set_mappings(vec![
            upstream_mapping("10.0.0.1", 9001),
            upstream_mapping("10.0.0.2", 9002),
            upstream_mapping("10.0.0.3", 9003),
        ]);

        let first = accel.port_mappings_page("arn:accel/one", None).await.unwrap();
        assert_eq!(first.port_mappings.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let second = accel
            .port_mappings_page("arn:accel/one", Some(&cursor))
            .await
            .unwrap();
        assert_eq!(second.port_mappings.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn accelerator_rejects_unknown_arn() {
        let accel = StubAccelerator::new("arn:accel/one", 2);
        let err = accel
            .port_mappings_page("arn:accel/other", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn orchestration_rejects_oversized_status_batch() {
        let orch = StubOrchestration::new("cluster-a", "fleet-a");
        let units: Vec<ComputeUnitId> = (0..11)
            .map(|i| ComputeUnitId::new(format!("unit-{i}")))
            .collect();
        let err = orch
            .protection_status("cluster-a", &units)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[tokio::test]
    async fn flaky_store_refuses_then_recovers() {
        let store = FlakyMappingStore::refusing("10.0.0.9", 1);
        let batch = vec![
            upstream_mapping("10.0.0.1", 9001).flatten(),
            upstream_mapping("10.0.0.9", 9009).flatten(),
        ];

        let unprocessed = store.write_batch(&batch).await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].destination_address, "10.0.0.9");
        assert!(store.lookup("10.0.0.1").await.unwrap().is_some());

        let retry = store.write_batch(&unprocessed).await.unwrap();
        assert!(retry.is_empty());
        assert!(store.lookup("10.0.0.9").await.unwrap().is_some());
    }
}
