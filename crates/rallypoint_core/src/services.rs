//! Trait seams for the external collaborators.
//!
//! The matchmaking service, the cluster orchestrator, and the traffic
//! accelerator are owned elsewhere; the core only needs the handful of
//! operations below. Handles implementing these traits are created once at
//! process startup and passed into component constructors, never re-created
//! per call.

use async_trait::async_trait;
use rallypoint_types::{ComputeUnitId, GameSession, PortMappingPage, ServiceError};

/// Maximum number of units one protection-status query may carry.
/// The orchestration API rejects larger batches.
pub const PROTECTION_STATUS_MAX_BATCH: usize = 10;

/// The matchmaking service: session queries and match onboarding.
#[async_trait]
pub trait MatchmakingService: Send + Sync {
    /// Lists the currently active game sessions in a fleet location,
    /// including their custom properties.
    async fn active_sessions(
        &self,
        fleet: &str,
        location: &str,
    ) -> Result<Vec<GameSession>, ServiceError>;

    /// Submits one player into matchmaking and returns the ticket id that
    /// tracks the request.
    async fn start_matchmaking(
        &self,
        configuration: &str,
        player_id: &str,
        attributes: serde_json::Value,
    ) -> Result<String, ServiceError>;
}

/// The cluster/orchestration service that owns compute units.
#[async_trait]
pub trait OrchestrationService: Send + Sync {
    /// Lists the units currently running in a cluster.
    async fn list_running_units(&self, cluster: &str)
        -> Result<Vec<ComputeUnitId>, ServiceError>;

    /// Fetches scale-in protection flags for up to
    /// [`PROTECTION_STATUS_MAX_BATCH`] units.
    async fn protection_status(
        &self,
        cluster: &str,
        units: &[ComputeUnitId],
    ) -> Result<Vec<(ComputeUnitId, bool)>, ServiceError>;

    /// Enables or disables scale-in protection on one unit.
    async fn set_protection(
        &self,
        cluster: &str,
        unit: &ComputeUnitId,
        protected: bool,
    ) -> Result<(), ServiceError>;

    /// Removes a unit's registration from the game fleet. Returns
    /// `ServiceError::NotFound` when the unit is already absent; callers
    /// treat that as success.
    async fn deregister_compute(
        &self,
        fleet: &str,
        unit: &ComputeUnitId,
    ) -> Result<(), ServiceError>;
}

/// The traffic accelerator fronting game-server endpoints.
#[async_trait]
pub trait AcceleratorService: Send + Sync {
    /// Fetches one page of the accelerator's port-mapping enumeration.
    /// Pass the previous page's cursor to continue; `None` starts over.
    async fn port_mappings_page(
        &self,
        accelerator_arn: &str,
        cursor: Option<&str>,
    ) -> Result<PortMappingPage, ServiceError>;

    /// Admits traffic to a backend destination through the given endpoint.
    async fn allow_traffic(
        &self,
        endpoint_group: &str,
        endpoint_id: &str,
        destination_address: &str,
        destination_port: u16,
    ) -> Result<(), ServiceError>;
}
