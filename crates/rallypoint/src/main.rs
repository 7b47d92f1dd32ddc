//! Rallypoint control plane - main entry point.
//!
//! Wires the routing core to its collaborators and runs the three outward
//! surfaces: the TCP front door, the port-mapping sync loop, and the
//! idle-compute reconciliation loop, with graceful shutdown handling.

mod clients;
mod config;
mod frontdoor;
mod logging;
mod scheduler;
mod shutdown;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rallypoint_core::{
    IdleReconciler, MatchRouter, MemoryConnectionStore, MemoryMappingStore,
    PortMappingSynchronizer,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use config::{Args, BackendMode, Config};
use frontdoor::Frontdoor;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::setup_logging(&args)?;

    info!("Starting rallypoint control plane");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(&args)
        .await
        .context("Failed to load config")?;
    info!("Configuration loaded from: {}", args.config.display());

    let listen_addr = resolve_listen_addr(&args, &config)?;
    let backend_override = resolve_backend_override(&args)?;

    // Stores and service handles are created once here and shared by every
    // component for the life of the process.
    let connections = Arc::new(MemoryConnectionStore::new());
    let mappings = Arc::new(MemoryMappingStore::new());
    let services = clients::build_services(&config.backend, &config.reconcile, backend_override);

    let router = Arc::new(MatchRouter::new(
        connections,
        mappings.clone(),
        Some(services.accelerator.clone()),
        config.router.to_router_config(),
    ));
    let synchronizer = Arc::new(PortMappingSynchronizer::new(
        services.accelerator.clone(),
        mappings,
        config.sync.to_sync_config(),
    ));
    let reconciler = Arc::new(IdleReconciler::new(
        services.orchestration.clone(),
        services.matchmaking.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    if config.sync.enabled {
        if config.sync.accelerator_arn.is_empty() {
            warn!("Port-mapping sync enabled but no accelerator ARN configured, loop not started");
        } else {
            scheduler::spawn_sync_loop(
                Arc::clone(&synchronizer),
                config.sync.accelerator_arn.clone(),
                Duration::from_secs(config.sync.interval_secs),
                shutdown_tx.subscribe(),
            );
            info!(
                "Port-mapping sync every {}s against {}",
                config.sync.interval_secs, config.sync.accelerator_arn
            );
        }
    }

    if config.reconcile.enabled {
        scheduler::spawn_reconcile_loop(
            Arc::clone(&reconciler),
            config.reconcile.cluster.clone(),
            config.reconcile.fleet_id.clone(),
            config.reconcile.location.clone(),
            Duration::from_secs(config.reconcile.interval_secs),
            shutdown_tx.subscribe(),
        );
        info!(
            "Idle reconciliation every {}s for cluster {}",
            config.reconcile.interval_secs, config.reconcile.cluster
        );
    }

    log_configuration(&config, listen_addr);

    let frontdoor = Arc::new(Frontdoor::new(
        router,
        services.matchmaking.clone(),
        reconciler,
        config.server.matchmaking_configuration.clone(),
        config.reconcile.fleet_id.clone(),
    ));

    let shutdown_signal = shutdown::setup_shutdown_handler().await;

    tokio::select! {
        result = Arc::clone(&frontdoor).run(listen_addr, shutdown_tx.subscribe()) => {
            if let Err(e) = result {
                let _ = shutdown_tx.send(());
                return Err(e);
            }
            info!("Front door stopped");
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    }

    info!("rallypoint stopped");
    Ok(())
}

/// Listen address from CLI override or configuration.
fn resolve_listen_addr(args: &Args, config: &Config) -> Result<SocketAddr> {
    args.listen
        .as_deref()
        .unwrap_or(&config.server.listen_addr)
        .parse()
        .context("Failed to parse listen address")
}

/// Backend mode from the CLI, if given.
fn resolve_backend_override(args: &Args) -> Result<Option<BackendMode>> {
    match args.backend.as_deref() {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: String| anyhow::anyhow!(e)),
        None => Ok(None),
    }
}

/// Log the effective configuration at startup.
fn log_configuration(config: &Config, listen_addr: SocketAddr) {
    info!("Server configuration:");
    info!("  Front door: {}", listen_addr);
    info!("  Backend mode: {:?}", config.backend.mode);
    info!("  Connection record TTL: {}s", config.router.ttl_seconds);
    if config.router.listener_address.is_empty() {
        info!("  Accelerator routing: disabled (direct endpoints)");
    } else {
        info!(
            "  Accelerator routing: via {} (open traffic: {})",
            config.router.listener_address, config.router.open_traffic
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_listen_addr_from_config() {
        let config = Config::default();
        let args = Args::default();

        let addr = resolve_listen_addr(&args, &config).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:7600");
    }

    #[test]
    fn test_resolve_listen_addr_cli_override() {
        let config = Config::default();
        let mut args = Args::default();
        args.listen = Some("0.0.0.0:9090".to_string());

        let addr = resolve_listen_addr(&args, &config).unwrap();
        assert_eq!(addr.to_string(), "0.0.0.0:9090");
    }

    #[test]
    fn test_resolve_backend_override() {
        let mut args = Args::default();
        assert!(resolve_backend_override(&args).unwrap().is_none());

        args.backend = Some("http".to_string());
        assert_eq!(
            resolve_backend_override(&args).unwrap(),
            Some(BackendMode::Http)
        );

        args.backend = Some("sqlite".to_string());
        assert!(resolve_backend_override(&args).is_err());
    }
}
