//! Configuration settings structures.
//!
//! The root [`Config`] serializes to/from TOML. Defaults describe a
//! self-contained local deployment on the in-memory backend.

use std::time::Duration;

use rallypoint_core::{RouterConfig, SyncConfig};
use serde::{Deserialize, Serialize};

/// Root configuration object.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Front-door and onboarding settings
    pub server: ServerSettings,
    /// Match routing settings
    pub router: RouterSettings,
    /// Port-mapping synchronization settings
    pub sync: SyncSettings,
    /// Idle-compute reconciliation settings
    pub reconcile: ReconcileSettings,
    /// External service wiring
    pub backend: BackendSettings,
}

/// Front-door settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerSettings {
    /// Address the TCP front door binds to
    pub listen_addr: String,
    /// Matchmaking configuration used for match requests submitted
    /// through the front door
    pub matchmaking_configuration: String,
}

/// Match routing settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RouterSettings {
    /// Connection record lifetime in seconds
    pub ttl_seconds: u64,
    /// Accelerator listener address; non-empty enables the accelerator
    /// rewrite, empty publishes game-session endpoints directly
    pub listener_address: String,
    /// Open accelerator traffic to the destination before publishing the
    /// rewritten endpoint
    pub open_traffic: bool,
}

impl RouterSettings {
    pub fn to_router_config(&self) -> RouterConfig {
        RouterConfig {
            ttl: Duration::from_secs(self.ttl_seconds),
            listener_address: self.listener_address.clone(),
            open_traffic: self.open_traffic,
        }
    }
}

/// Port-mapping synchronization settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SyncSettings {
    pub enabled: bool,
    /// Seconds between synchronization runs
    pub interval_secs: u64,
    /// Accelerator to mirror; empty disables the loop even when enabled
    pub accelerator_arn: String,
    /// Entries per batch write
    pub batch_size: usize,
    /// Retry ceiling for unprocessed batch remainders
    pub max_retries: u32,
    /// Upload worker cap; 0 sizes from available parallelism
    pub max_workers: usize,
}

impl SyncSettings {
    pub fn to_sync_config(&self) -> SyncConfig {
        let defaults = SyncConfig::default();
        SyncConfig {
            batch_size: if self.batch_size == 0 {
                defaults.batch_size
            } else {
                self.batch_size
            },
            max_retries: self.max_retries,
            max_workers: if self.max_workers == 0 {
                defaults.max_workers
            } else {
                self.max_workers
            },
        }
    }
}

/// Idle-compute reconciliation settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReconcileSettings {
    pub enabled: bool,
    /// Seconds between reconciliation passes
    pub interval_secs: u64,
    /// Cluster whose units are reconciled
    pub cluster: String,
    /// Game fleet the units are registered with
    pub fleet_id: String,
    /// Fleet location whose sessions are checked
    pub location: String,
}

/// Which implementations back the collaborator seams.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-process stubs; self-contained local runs
    Memory,
    /// HTTP JSON adapters against the configured addresses
    Http,
}

impl std::str::FromStr for BackendMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "memory" => Ok(BackendMode::Memory),
            "http" => Ok(BackendMode::Http),
            other => Err(format!("unknown backend mode {other:?}")),
        }
    }
}

/// External service wiring.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackendSettings {
    pub mode: BackendMode,
    /// Matchmaking service address ("host:port"), http mode only
    pub matchmaking_addr: String,
    /// Orchestration service address ("host:port"), http mode only
    pub orchestration_addr: String,
    /// Accelerator service address ("host:port"), http mode only
    pub accelerator_addr: String,
    /// Per-request timeout for http mode
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                listen_addr: "127.0.0.1:7600".to_string(),
                matchmaking_configuration: "default".to_string(),
            },
            router: RouterSettings {
                ttl_seconds: 300,
                listener_address: String::new(),
                open_traffic: false,
            },
            sync: SyncSettings {
                enabled: false,
                interval_secs: 60,
                accelerator_arn: String::new(),
                batch_size: 25,
                max_retries: 3,
                max_workers: 0,
            },
            reconcile: ReconcileSettings {
                enabled: true,
                interval_secs: 60,
                cluster: "game-cluster".to_string(),
                fleet_id: "fleet-local".to_string(),
                location: "custom-anywhere-location".to_string(),
            },
            backend: BackendSettings {
                mode: BackendMode::Memory,
                matchmaking_addr: "127.0.0.1:7701".to_string(),
                orchestration_addr: "127.0.0.1:7702".to_string(),
                accelerator_addr: "127.0.0.1:7703".to_string(),
                request_timeout_ms: 10_000,
            },
        }
    }
}
