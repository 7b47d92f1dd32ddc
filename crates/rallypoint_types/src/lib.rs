//! # Rallypoint Types - Shared Data Model
//!
//! Common types for the rallypoint control plane: the records the routing
//! core writes, the payloads external services deliver, and the error
//! taxonomy shared by every collaborator seam.
//!
//! The types here are deliberately free of behavior beyond small accessors;
//! all control-loop logic lives in `rallypoint_core`. Wire-facing structs
//! carry serde derives with the camelCase field names the upstream services
//! use.

pub use error::{ServiceError, StoreError};
pub use event::{
    GameSessionInfo, MatchEventType, MatchedPlayer, MatchedTicket, MatchmakingNotification,
};
pub use record::{
    ConnectionRecord, ConnectionReply, ConnectionStatus, PortMappingEntry, PortMappingPage,
    SocketDestination, UpstreamPortMapping,
};
pub use session::{ComputeUnitId, GameSession, SessionProperty, SESSION_COMPUTE_PROPERTY};

pub mod error;
pub mod event;
pub mod record;
pub mod session;

/// Returns the current Unix timestamp in seconds.
///
/// All record timestamps and expiries in the system are derived from this
/// function so that writers and readers agree on the clock.
///
/// # Panics
///
/// Panics if the system clock is set to a time before the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}
