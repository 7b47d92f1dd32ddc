//! Stored record shapes: connection records and port mappings.

use serde::{Deserialize, Serialize};

/// Lifecycle tag on a connection record.
///
/// `Matching` means the record has been written but no client has picked it
/// up yet; the first successful poll transitions it to `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Matching,
    Complete,
}

/// Durable "how do I reach my match" record, keyed by routing key.
///
/// The routing key is a ticket identifier (or a player identity, for
/// deployments that key by player). At most one live record exists per key;
/// records are only written by the match router and only read by the polling
/// front door.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub key: String,
    pub ip_address: String,
    pub port: u16,
    pub player_session_id: String,
    /// Unix seconds at write time.
    pub written_at: u64,
    /// Absolute expiry, `written_at + ttl`.
    pub expires_at: u64,
    pub status: ConnectionStatus,
}

impl ConnectionRecord {
    /// Whether the record has passed its expiry at time `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Poll response handed to game clients.
///
/// Empty-string/zero fields mean "not matched yet"; pollers never receive
/// an error for a pending match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReply {
    pub ip_address: String,
    pub port: u16,
    pub player_session_id: String,
}

impl ConnectionReply {
    /// The "not ready yet" reply.
    pub fn not_ready() -> Self {
        Self {
            ip_address: String::new(),
            port: 0,
            player_session_id: String::new(),
        }
    }

    /// True when this reply carries no connection info.
    pub fn is_empty(&self) -> bool {
        self.ip_address.is_empty()
    }
}

impl From<&ConnectionRecord> for ConnectionReply {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            ip_address: record.ip_address.clone(),
            port: record.port,
            player_session_id: record.player_session_id.clone(),
        }
    }
}

/// Destination half of an upstream port mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketDestination {
    pub ip_address: String,
    pub port: u16,
}

/// One port mapping as reported by the accelerator's listing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamPortMapping {
    pub accelerator_port: u16,
    pub endpoint_group_arn: String,
    pub endpoint_id: String,
    pub destination: SocketDestination,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub traffic_state: String,
}

impl UpstreamPortMapping {
    /// Flattens the nested destination sub-structure into a cache entry.
    pub fn flatten(self) -> PortMappingEntry {
        PortMappingEntry {
            accelerator_port: self.accelerator_port,
            endpoint_group: self.endpoint_group_arn,
            endpoint_id: self.endpoint_id,
            destination_address: self.destination.ip_address,
            destination_port: self.destination.port,
            protocols: self.protocols,
            traffic_state: self.traffic_state,
        }
    }
}

/// One page of the accelerator's port-mapping enumeration.
///
/// `next_cursor` is present while more pages remain; consumers must follow
/// it until exhausted and never assume a single page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMappingPage {
    pub port_mappings: Vec<UpstreamPortMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Cached port mapping, keyed by backend destination address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMappingEntry {
    pub accelerator_port: u16,
    pub endpoint_group: String,
    pub endpoint_id: String,
    pub destination_address: String,
    pub destination_port: u16,
    pub protocols: Vec<String>,
    pub traffic_state: String,
}
