//! Game sessions and compute-unit identity.

use serde::{Deserialize, Serialize};

/// Session property key that pins a game session to the compute unit
/// hosting it. Written by the game server when the session starts.
pub const SESSION_COMPUTE_PROPERTY: &str = "computeId";

/// Identifier of one runnable game-server instance, as issued by the
/// orchestration service.
///
/// Orchestrators report units as full ARNs (`.../cluster/unit-id`); game
/// sessions reference the bare trailing id. `short_id` bridges the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputeUnitId(String);

impl ComputeUnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing path segment of the unit identifier.
    pub fn short_id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ComputeUnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComputeUnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Custom key/value property attached to a game session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProperty {
    pub key: String,
    pub value: String,
}

/// An active game session as reported by the matchmaking service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSession {
    pub session_id: String,
    pub fleet_id: String,
    pub location: String,
    pub status: String,
    #[serde(default)]
    pub properties: Vec<SessionProperty>,
}

impl GameSession {
    /// Looks up a custom property by key.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Whether this session is pinned to the given compute unit.
    pub fn references_compute(&self, unit: &ComputeUnitId) -> bool {
        self.property(SESSION_COMPUTE_PROPERTY) == Some(unit.short_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_strips_arn_prefix() {
        let unit = ComputeUnitId::new("arn:cluster/game/abc123");
        assert_eq!(unit.short_id(), "abc123");
    }

    #[test]
    fn short_id_of_bare_id_is_identity() {
        let unit = ComputeUnitId::new("abc123");
        assert_eq!(unit.short_id(), "abc123");
    }

    #[test]
    fn session_compute_reference_matches_short_id() {
        let session = GameSession {
            session_id: "gs-1".into(),
            fleet_id: "fleet-1".into(),
            location: "loc-1".into(),
            status: "ACTIVE".into(),
            properties: vec![SessionProperty {
                key: SESSION_COMPUTE_PROPERTY.into(),
                value: "abc123".into(),
            }],
        };

        assert!(session.references_compute(&ComputeUnitId::new("arn:cluster/game/abc123")));
        assert!(!session.references_compute(&ComputeUnitId::new("arn:cluster/game/other")));
    }

    #[test]
    fn session_without_properties_references_nothing() {
        let session: GameSession = serde_json::from_str(
            r#"{"sessionId": "gs-2", "fleetId": "f", "location": "l", "status": "ACTIVE"}"#,
        )
        .unwrap();
        assert!(session.property(SESSION_COMPUTE_PROPERTY).is_none());
        assert!(!session.references_compute(&ComputeUnitId::new("abc")));
    }
}
