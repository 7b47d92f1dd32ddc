//! Matchmaking notification payloads.
//!
//! The matchmaking service publishes outcome notifications through an
//! at-least-once transport. The shapes here mirror the upstream JSON field
//! names; anything the router does not recognize deserializes into a
//! conservative default rather than failing the whole event.

use serde::{Deserialize, Serialize};

/// Outcome type carried by a matchmaking notification.
///
/// Only `Succeeded` triggers routing work; every other value is a no-op for
/// the router. Unknown upstream values fold into `Unknown` so a new event
/// type cannot break event consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEventType {
    #[serde(rename = "MatchmakingSearching")]
    Searching,
    #[serde(rename = "PotentialMatchCreated")]
    PotentialMatchCreated,
    #[serde(rename = "MatchmakingSucceeded")]
    Succeeded,
    #[serde(rename = "MatchmakingTimedOut")]
    TimedOut,
    #[serde(rename = "MatchmakingCancelled")]
    Cancelled,
    #[serde(rename = "MatchmakingFailed")]
    Failed,
    #[serde(other)]
    Unknown,
}

/// One matchmaking ticket referenced by a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedTicket {
    pub ticket_id: String,
}

/// A matched player inside the game-session descriptor.
///
/// The session handle is only present once the game session has accepted the
/// player; a missing handle makes that player unroutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPlayer {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_session_id: Option<String>,
}

/// Where the match was placed: the game session's endpoint and its players.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSessionInfo {
    pub ip_address: String,
    pub port: u16,
    #[serde(default)]
    pub players: Vec<MatchedPlayer>,
}

/// A matchmaking outcome notification as delivered by the event transport.
///
/// Delivery is at-least-once; consumers must tolerate redelivery of the same
/// notification. Events other than `Succeeded` usually omit the session
/// descriptor, so it is optional here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingNotification {
    #[serde(rename = "type")]
    pub event_type: MatchEventType,
    #[serde(default)]
    pub match_id: String,
    #[serde(default)]
    pub tickets: Vec<MatchedTicket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_session_info: Option<GameSessionInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeded_notification_parses_from_upstream_shape() {
        let raw = r#"{
            "type": "MatchmakingSucceeded",
            "matchId": "m-42",
            "tickets": [{"ticketId": "T1"}],
            "gameSessionInfo": {
                "ipAddress": "10.0.0.5",
                "port": 7777,
                "players": [{"playerId": "P1", "playerSessionId": "S1"}]
            }
        }"#;

        let note: MatchmakingNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(note.event_type, MatchEventType::Succeeded);
        assert_eq!(note.match_id, "m-42");
        assert_eq!(note.tickets[0].ticket_id, "T1");

        let info = note.game_session_info.unwrap();
        assert_eq!(info.ip_address, "10.0.0.5");
        assert_eq!(info.port, 7777);
        assert_eq!(info.players[0].player_session_id.as_deref(), Some("S1"));
    }

    #[test]
    fn searching_notification_without_session_info_parses() {
        let raw = r#"{"type": "MatchmakingSearching", "tickets": [{"ticketId": "T9"}]}"#;
        let note: MatchmakingNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(note.event_type, MatchEventType::Searching);
        assert!(note.game_session_info.is_none());
        assert!(note.match_id.is_empty());
    }

    #[test]
    fn unrecognized_event_type_folds_to_unknown() {
        let raw = r#"{"type": "MatchmakingBackfilled", "tickets": []}"#;
        let note: MatchmakingNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(note.event_type, MatchEventType::Unknown);
    }

    #[test]
    fn player_without_session_handle_parses() {
        let raw = r#"{"playerId": "P2"}"#;
        let player: MatchedPlayer = serde_json::from_str(raw).unwrap();
        assert!(player.player_session_id.is_none());
    }
}
