//! Match-to-connection routing.
//!
//! Translates matchmaking-succeeded notifications into connection records
//! and answers client polls for them. Everything else the event transport
//! delivers is a deliberate no-op.

use std::sync::Arc;
use std::time::Duration;

use rallypoint_types::{
    current_timestamp, ConnectionRecord, ConnectionReply, ConnectionStatus, GameSessionInfo,
    MatchEventType, MatchmakingNotification, StoreError,
};
use tracing::{debug, info, warn};

use crate::services::AcceleratorService;
use crate::store::{ConnectionStore, MappingStore};

/// Router behavior knobs.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Lifetime of a published connection record.
    pub ttl: Duration,
    /// Accelerator listener address. Non-empty enables the address/port
    /// rewrite through the port-mapping cache; empty routes directly.
    pub listener_address: String,
    /// Whether to open accelerator traffic to the destination before
    /// publishing the rewritten endpoint.
    pub open_traffic: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            listener_address: String::new(),
            open_traffic: false,
        }
    }
}

/// Outcome of routing one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub match_id: String,
    pub tickets_seen: usize,
    pub records_written: usize,
    /// Tickets skipped because the event carried no usable session handle
    /// for them.
    pub tickets_skipped: usize,
}

/// Routing failure.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// A succeeded event arrived without its game-session descriptor.
    #[error("succeeded event {0} carries no game session info")]
    MissingSessionInfo(String),
    /// Some connection records could not be written; the rest were.
    #[error("{written} of {attempted} connection records written for match {match_id}")]
    PartialFailure {
        match_id: String,
        attempted: usize,
        written: usize,
        failures: Vec<(String, StoreError)>,
    },
}

/// Consumes matchmaking outcomes and publishes connection records.
///
/// One router instance serves every deployment variant: accelerator routing
/// and traffic admission are configuration, not separate code paths.
pub struct MatchRouter {
    connections: Arc<dyn ConnectionStore>,
    mappings: Arc<dyn MappingStore>,
    accelerator: Option<Arc<dyn AcceleratorService>>,
    config: RouterConfig,
}

impl MatchRouter {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        mappings: Arc<dyn MappingStore>,
        accelerator: Option<Arc<dyn AcceleratorService>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            connections,
            mappings,
            accelerator,
            config,
        }
    }

    /// Routes one matchmaking notification.
    ///
    /// Non-succeeded events return a zero-write summary. For succeeded
    /// events, each ticket is paired with the same-index player of the
    /// session descriptor and gets one connection record; a ticket without
    /// a usable session handle is logged and skipped without affecting its
    /// siblings. Redelivery of the same notification rewrites identical
    /// records and is therefore safe.
    pub async fn route(
        &self,
        notification: &MatchmakingNotification,
    ) -> Result<RouteSummary, RouteError> {
        let mut summary = RouteSummary {
            match_id: notification.match_id.clone(),
            tickets_seen: notification.tickets.len(),
            ..RouteSummary::default()
        };

        if notification.event_type != MatchEventType::Succeeded {
            debug!(
                "ignoring {:?} notification for match {}",
                notification.event_type, notification.match_id
            );
            return Ok(summary);
        }

        let session = notification
            .game_session_info
            .as_ref()
            .ok_or_else(|| RouteError::MissingSessionInfo(notification.match_id.clone()))?;

        let (address, port) = self.effective_endpoint(session).await;
        let now = current_timestamp();
        let expires_at = now + self.config.ttl.as_secs();

        let mut failures = Vec::new();
        for (index, ticket) in notification.tickets.iter().enumerate() {
            let handle = session
                .players
                .get(index)
                .and_then(|player| player.player_session_id.as_deref());
            let Some(player_session_id) = handle else {
                warn!(
                    "ticket {} in match {} has no player session handle, skipping",
                    ticket.ticket_id, notification.match_id
                );
                summary.tickets_skipped += 1;
                continue;
            };

            let record = ConnectionRecord {
                key: ticket.ticket_id.clone(),
                ip_address: address.clone(),
                port,
                player_session_id: player_session_id.to_string(),
                written_at: now,
                expires_at,
                status: ConnectionStatus::Matching,
            };
            match self.connections.put(record).await {
                Ok(()) => summary.records_written += 1,
                Err(err) => {
                    warn!(
                        "failed to write connection record for ticket {}: {err}",
                        ticket.ticket_id
                    );
                    failures.push((ticket.ticket_id.clone(), err));
                }
            }
        }

        info!(
            "match {} routed to {}:{} ({} record(s) written, {} skipped)",
            notification.match_id, address, port, summary.records_written, summary.tickets_skipped
        );

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(RouteError::PartialFailure {
                match_id: notification.match_id.clone(),
                attempted: summary.tickets_seen - summary.tickets_skipped,
                written: summary.records_written,
                failures,
            })
        }
    }

    /// Answers a connection poll for a routing key.
    ///
    /// An absent or expired record yields the empty "not ready" reply,
    /// never an error, so clients can busy-poll. The first poll that finds
    /// a record transitions it from `Matching` to `Complete`.
    pub async fn resolve(&self, key: &str) -> Result<ConnectionReply, StoreError> {
        match self.connections.resolve(key).await? {
            Some(record) => Ok(ConnectionReply::from(&record)),
            None => Ok(ConnectionReply::not_ready()),
        }
    }

    /// Picks the endpoint to publish for a game session.
    ///
    /// With accelerator routing enabled, a cache hit substitutes the
    /// listener address and the mapped accelerator port, admitting traffic
    /// first when configured. Every failure on this path degrades to direct
    /// routing rather than failing the match.
    async fn effective_endpoint(&self, session: &GameSessionInfo) -> (String, u16) {
        let direct = (session.ip_address.clone(), session.port);
        if self.config.listener_address.is_empty() {
            return direct;
        }

        let mapping = match self.mappings.lookup(&session.ip_address).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => {
                debug!(
                    "no port mapping for {}, publishing direct endpoint",
                    session.ip_address
                );
                return direct;
            }
            Err(err) => {
                warn!(
                    "port-mapping lookup for {} failed ({err}), publishing direct endpoint",
                    session.ip_address
                );
                return direct;
            }
        };

        if self.config.open_traffic {
            let Some(accelerator) = &self.accelerator else {
                warn!("traffic admission enabled but no accelerator handle, publishing direct endpoint");
                return direct;
            };
            if let Err(err) = accelerator
                .allow_traffic(
                    &mapping.endpoint_group,
                    &mapping.endpoint_id,
                    &mapping.destination_address,
                    mapping.destination_port,
                )
                .await
            {
                warn!(
                    "traffic admission for {} failed ({err}), publishing direct endpoint",
                    mapping.destination_address
                );
                return direct;
            }
        }

        (
            self.config.listener_address.clone(),
            mapping.accelerator_port,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryConnectionStore, MemoryMappingStore};
    use crate::stub::{upstream_mapping, StubAccelerator};
    use rallypoint_types::{MatchedPlayer, MatchedTicket};

    fn succeeded_event(tickets: &[&str], players: &[(&str, Option<&str>)]) -> MatchmakingNotification {
        MatchmakingNotification {
            event_type: MatchEventType::Succeeded,
            match_id: "m-1".into(),
            tickets: tickets
                .iter()
                .map(|t| MatchedTicket {
                    ticket_id: t.to_string(),
                })
                .collect(),
            game_session_info: Some(GameSessionInfo {
                ip_address: "10.0.0.5".into(),
                port: 7777,
                players: players
                    .iter()
                    .map(|(id, handle)| MatchedPlayer {
                        player_id: id.to_string(),
                        player_session_id: handle.map(str::to_string),
                    })
                    .collect(),
            }),
        }
    }

    fn direct_router(connections: Arc<MemoryConnectionStore>) -> MatchRouter {
        MatchRouter::new(
            connections,
            Arc::new(MemoryMappingStore::new()),
            None,
            RouterConfig::default(),
        )
    }

    #[tokio::test]
    async fn succeeded_event_writes_record_per_ticket() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());
        let event = succeeded_event(
            &["T1", "T2"],
            &[("P1", Some("S1")), ("P2", Some("S2"))],
        );

        let summary = router.route(&event).await.unwrap();
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.tickets_skipped, 0);

        for (key, handle) in [("T1", "S1"), ("T2", "S2")] {
            let record = connections.get(key).await.unwrap().unwrap();
            assert_eq!(record.ip_address, "10.0.0.5");
            assert_eq!(record.port, 7777);
            assert_eq!(record.player_session_id, handle);
            assert!(record.expires_at > record.written_at);
            assert_eq!(record.status, ConnectionStatus::Matching);
        }
    }

    #[tokio::test]
    async fn non_succeeded_event_writes_nothing() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());
        let mut event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);
        event.event_type = MatchEventType::TimedOut;

        let summary = router.route(&event).await.unwrap();
        assert_eq!(summary.records_written, 0);
        assert!(connections.get("T1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());
        let event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);

        router.route(&event).await.unwrap();
        let first = connections.get("T1").await.unwrap().unwrap();
        router.route(&event).await.unwrap();
        let second = connections.get("T1").await.unwrap().unwrap();

        assert_eq!(first.ip_address, second.ip_address);
        assert_eq!(first.port, second.port);
        assert_eq!(first.player_session_id, second.player_session_id);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn ticket_without_session_handle_is_skipped_not_fatal() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());
        let event = succeeded_event(&["T1", "T2"], &[("P1", None), ("P2", Some("S2"))]);

        let summary = router.route(&event).await.unwrap();
        assert_eq!(summary.tickets_skipped, 1);
        assert_eq!(summary.records_written, 1);
        assert!(connections.get("T1").await.unwrap().is_none());
        assert!(connections.get("T2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn succeeded_event_without_session_info_is_an_error() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections);
        let mut event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);
        event.game_session_info = None;

        let err = router.route(&event).await.unwrap_err();
        assert!(matches!(err, RouteError::MissingSessionInfo(_)));
    }

    #[tokio::test]
    async fn accelerator_hit_rewrites_endpoint_and_opens_traffic() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let mappings = Arc::new(MemoryMappingStore::new());
        mappings
            .write_batch(&[upstream_mapping("10.0.0.5", 9000).flatten()])
            .await
            .unwrap();
        let accelerator = Arc::new(StubAccelerator::new("arn:accel/one", 10));

        let router = MatchRouter::new(
            connections.clone(),
            mappings,
            Some(accelerator.clone()),
            RouterConfig {
                listener_address: "3.3.3.3".into(),
                open_traffic: true,
                ..RouterConfig::default()
            },
        );

        let event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);
        router.route(&event).await.unwrap();

        let record = connections.get("T1").await.unwrap().unwrap();
        assert_eq!(record.ip_address, "3.3.3.3");
        assert_eq!(record.port, 9000);

        let opened = accelerator.opened_routes();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].destination_address, "10.0.0.5");
        assert_eq!(opened[0].destination_port, 7777);
    }

    #[tokio::test]
    async fn accelerator_miss_degrades_to_direct_routing() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = MatchRouter::new(
            connections.clone(),
            Arc::new(MemoryMappingStore::new()),
            None,
            RouterConfig {
                listener_address: "3.3.3.3".into(),
                ..RouterConfig::default()
            },
        );

        let event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);
        router.route(&event).await.unwrap();

        let record = connections.get("T1").await.unwrap().unwrap();
        assert_eq!(record.ip_address, "10.0.0.5");
        assert_eq!(record.port, 7777);
    }

    #[tokio::test]
    async fn resolve_reports_pending_then_ready() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());

        assert!(router.resolve("T1").await.unwrap().is_empty());

        let event = succeeded_event(&["T1"], &[("P1", Some("S1"))]);
        router.route(&event).await.unwrap();

        let reply = router.resolve("T1").await.unwrap();
        assert_eq!(reply.ip_address, "10.0.0.5");
        assert_eq!(reply.port, 7777);
        assert_eq!(reply.player_session_id, "S1");

        let record = connections.get("T1").await.unwrap().unwrap();
        assert_eq!(record.status, ConnectionStatus::Complete);

        // Subsequent polls keep answering with the same info.
        let again = router.resolve("T1").await.unwrap();
        assert_eq!(again, reply);
    }

    #[tokio::test]
    async fn resolve_of_expired_record_is_empty() {
        let connections = Arc::new(MemoryConnectionStore::new());
        let router = direct_router(connections.clone());

        let now = current_timestamp();
        connections
            .put(ConnectionRecord {
                key: "T1".into(),
                ip_address: "10.0.0.5".into(),
                port: 7777,
                player_session_id: "S1".into(),
                written_at: now - 600,
                expires_at: now - 300,
                status: ConnectionStatus::Matching,
            })
            .await
            .unwrap();

        assert!(router.resolve("T1").await.unwrap().is_empty());
    }
}
