//! TCP JSON-line front door.
//!
//! One newline-delimited JSON request per line, one JSON reply per line.
//! The front door is thin glue: matchmaking notifications go to the match
//! router, connection polls go to the resolve path, match requests and
//! stopped-unit notices are forwarded to the owning service. Every reply
//! carries an explicit `status` field so transport success can never hide
//! an application error.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rallypoint_core::services::MatchmakingService;
use rallypoint_core::{IdleReconciler, MatchRouter};
use rallypoint_types::{ComputeUnitId, MatchmakingNotification};
use serde::Deserialize;
use serde_json::{json, Value};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Requests accepted on the wire.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
enum Request {
    /// A matchmaking outcome pushed by the event transport.
    #[serde(rename_all = "camelCase")]
    Notify { notification: MatchmakingNotification },
    /// A client polling for its connection record, by ticket id or by
    /// player name depending on how the deployment keys records.
    #[serde(rename_all = "camelCase")]
    Poll {
        #[serde(default)]
        ticket_id: Option<String>,
        #[serde(default)]
        player_name: Option<String>,
    },
    /// A player asking to enter matchmaking.
    #[serde(rename_all = "camelCase")]
    RequestMatch {
        player_id: String,
        #[serde(default)]
        attributes: Value,
    },
    /// The orchestrator reporting a stopped compute unit.
    #[serde(rename_all = "camelCase")]
    UnitStopped { unit_id: String },
}

/// The front-door endpoint and the handles it dispatches to.
pub struct Frontdoor {
    router: Arc<MatchRouter>,
    matchmaking: Arc<dyn MatchmakingService>,
    reconciler: Arc<IdleReconciler>,
    matchmaking_configuration: String,
    fleet_id: String,
}

impl Frontdoor {
    pub fn new(
        router: Arc<MatchRouter>,
        matchmaking: Arc<dyn MatchmakingService>,
        reconciler: Arc<IdleReconciler>,
        matchmaking_configuration: String,
        fleet_id: String,
    ) -> Self {
        Self {
            router,
            matchmaking,
            reconciler,
            matchmaking_configuration,
            fleet_id,
        }
    }

    /// Accepts connections until shutdown is signalled.
    pub async fn run(
        self: Arc<Self>,
        listen_addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let listener = bind_listener(listen_addr)?;
        info!("Front door listening on {listen_addr}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!("front-door connection from {peer}");
                            let frontdoor = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = frontdoor.serve_connection(stream).await {
                                    debug!("front-door connection from {peer} ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept front-door connection: {e}");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Front door shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Serves one connection: a loop of line-in, reply-out.
    async fn serve_connection(&self, stream: TcpStream) -> Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let reply = self.handle_line(&line).await;
            let mut payload = reply.to_string();
            payload.push('\n');
            write_half.write_all(payload.as_bytes()).await?;
        }
        Ok(())
    }

    /// Handles one request line and produces the reply value.
    ///
    /// A malformed line yields an error reply; the connection stays usable.
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed front-door request: {e}");
                return json!({ "status": "error", "message": format!("malformed request: {e}") });
            }
        };

        match request {
            Request::Notify { notification } => self.handle_notify(&notification).await,
            Request::Poll {
                ticket_id,
                player_name,
            } => match ticket_id.or(player_name) {
                Some(key) => self.handle_poll(&key).await,
                None => json!({
                    "status": "error",
                    "message": "poll requires ticketId or playerName",
                }),
            },
            Request::RequestMatch {
                player_id,
                attributes,
            } => self.handle_match_request(&player_id, attributes).await,
            Request::UnitStopped { unit_id } => self.handle_unit_stopped(&unit_id).await,
        }
    }

    async fn handle_notify(&self, notification: &MatchmakingNotification) -> Value {
        match self.router.route(notification).await {
            Ok(summary) => json!({
                "status": "accepted",
                "matchId": summary.match_id,
                "recordsWritten": summary.records_written,
                "ticketsSkipped": summary.tickets_skipped,
            }),
            Err(e) => {
                error!("routing notification failed: {e}");
                json!({ "status": "error", "message": e.to_string() })
            }
        }
    }

    async fn handle_poll(&self, key: &str) -> Value {
        match self.router.resolve(key).await {
            Ok(reply) => {
                let status = if reply.is_empty() { "pending" } else { "ready" };
                json!({
                    "status": status,
                    "ipAddress": reply.ip_address,
                    "port": reply.port,
                    "playerSessionId": reply.player_session_id,
                })
            }
            Err(e) => {
                error!("connection poll for {key} failed: {e}");
                json!({ "status": "error", "message": e.to_string() })
            }
        }
    }

    async fn handle_match_request(&self, player_id: &str, attributes: Value) -> Value {
        match self
            .matchmaking
            .start_matchmaking(&self.matchmaking_configuration, player_id, attributes)
            .await
        {
            Ok(ticket_id) => json!({ "status": "accepted", "ticketId": ticket_id }),
            Err(e) => {
                warn!("match request for {player_id} failed: {e}");
                json!({ "status": "error", "message": e.to_string() })
            }
        }
    }

    async fn handle_unit_stopped(&self, unit_id: &str) -> Value {
        let unit = ComputeUnitId::new(unit_id);
        match self
            .reconciler
            .release_stopped_unit(&self.fleet_id, &unit)
            .await
        {
            Ok(deregistered) => json!({ "status": "accepted", "deregistered": deregistered }),
            Err(e) => {
                error!("deregistration of {unit_id} failed: {e}");
                json!({ "status": "error", "message": e.to_string() })
            }
        }
    }
}

/// Binds the front-door listener with address reuse, so fast restarts do
/// not trip over sockets in TIME_WAIT.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket =
        Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).context("socket creation failed")?;
    socket.set_reuse_address(true).ok();
    socket.bind(&addr.into()).context("bind failed")?;
    socket.listen(1024).context("listen failed")?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .context("failed to set nonblocking")?;
    TcpListener::from_std(std_listener).context("tokio listener creation failed")
}
