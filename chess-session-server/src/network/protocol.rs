//! Protocol Messages
//!
//! One discriminated envelope per role. Every connection opens with a
//! [`Hello`] naming its role; after that only that role's messages are valid.
//! Bodies are JSON inside length-prefixed frames (see `codec`).

use serde::{Deserialize, Serialize};

use crate::game::rules::BoardState;
use crate::game::session::{MoveRecord, PlayerId, SessionId, SessionSnapshot, SessionState};
use crate::replay::store::ReplayRecord;

/// Current protocol version. Clients announcing another version are refused.
pub const PROTOCOL_VERSION: u16 = 1;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// First frame on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Client protocol version.
    pub version: u16,
    /// What the connection is for.
    pub role: Role,
}

impl Hello {
    /// Hello for the current protocol version.
    pub fn new(role: Role) -> Self {
        Self { version: PROTOCOL_VERSION, role }
    }
}

/// Connection role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Join matchmaking and play.
    Play,
    /// Watch a live session.
    View,
    /// Browse stored replays.
    Replay,
}

/// Sent before the server closes a connection it refuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Client speaks another protocol version.
    VersionMismatch,
    /// Server is at its connection limit.
    ServerOverloaded,
}

// =============================================================================
// PLAY
// =============================================================================

/// Player -> server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayClientMessage {
    /// New board after the player's move.
    Update(BoardUpdate),
    /// Player is leaving; same effect as closing the socket.
    Leave,
}

/// Board after a move plus optional annotation for the move history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardUpdate {
    /// Full board after the move.
    pub board: BoardState,
    /// Time spent and captured piece.
    #[serde(default)]
    pub annotation: Option<MoveRecord>,
}

/// Server -> player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayServerMessage {
    /// Sent once on connect.
    Welcome {
        /// Id assigned to this player.
        player_id: PlayerId,
        /// Always `IN_QUEUE` at this point.
        state: SessionState,
    },
    /// Current session record.
    Session(SessionSnapshot),
}

// =============================================================================
// VIEW
// =============================================================================

/// Viewer -> server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewClientMessage {
    /// List joinable sessions.
    ListSessions,
    /// Subscribe to one session.
    Subscribe {
        /// Session to watch.
        session_id: SessionId,
    },
    /// Heartbeat; answered with a snapshot.
    Viewing,
    /// Unsubscribe and close.
    StopViewing,
}

/// Joinable session as listed to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Current viewers.
    pub viewers: u32,
}

/// Server -> viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewServerMessage {
    /// Every session currently `READY`.
    Sessions {
        /// Listed sessions.
        sessions: Vec<SessionSummary>,
    },
    /// Current record of the watched session.
    Snapshot(SessionSnapshot),
    /// Requested session does not exist or is not live.
    NotFound {
        /// Requested session.
        session_id: SessionId,
    },
    /// Requested session has reached its viewer limit.
    Full {
        /// Requested session.
        session_id: SessionId,
    },
}

// =============================================================================
// REPLAY
// =============================================================================

/// Replay browser -> server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayClientMessage {
    /// List every stored key.
    ListAll,
    /// Fetch one stored record.
    Fetch {
        /// Key as returned by `ListAll`.
        key: String,
    },
}

/// Server -> replay browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayServerMessage {
    /// Stored keys, oldest first.
    Keys {
        /// Keys.
        keys: Vec<String>,
    },
    /// One stored record.
    Record(ReplayRecord),
    /// No record under this key.
    NotFound {
        /// Requested key.
        key: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_json() {
        let json = serde_json::to_string(&Hello::new(Role::View)).unwrap();
        assert_eq!(json, r#"{"version":1,"role":"view"}"#);
    }

    #[test]
    fn test_update_without_annotation() {
        let json = r#"{"type":"update","board":"8/8/8/8/8/8/8/8 w - - 0 1"}"#;
        match serde_json::from_str::<PlayClientMessage>(json).unwrap() {
            PlayClientMessage::Update(update) => {
                assert!(update.annotation.is_none());
                assert_eq!(update.board.as_str(), "8/8/8/8/8/8/8/8 w - - 0 1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_update_with_annotation() {
        let json = r#"{"type":"update","board":"x","annotation":{"time_spent":4,"captured":"p"}}"#;
        let PlayClientMessage::Update(update) = serde_json::from_str(json).unwrap() else {
            panic!("expected update");
        };
        let annotation = update.annotation.unwrap();
        assert_eq!(annotation.time_spent, 4);
        assert_eq!(annotation.captured.as_deref(), Some("p"));
    }

    #[test]
    fn test_welcome_json() {
        let msg = PlayServerMessage::Welcome { player_id: PlayerId(3), state: SessionState::InQueue };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"welcome""#));
        assert!(json.contains(r#""state":"IN_QUEUE""#));
    }

    #[test]
    fn test_viewer_messages() {
        let subscribe: ViewClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","session_id":12}"#).unwrap();
        assert!(matches!(subscribe, ViewClientMessage::Subscribe { session_id: SessionId(12) }));

        let heartbeat: ViewClientMessage = serde_json::from_str(r#"{"type":"viewing"}"#).unwrap();
        assert!(matches!(heartbeat, ViewClientMessage::Viewing));

        let listing = ViewServerMessage::Sessions {
            sessions: vec![SessionSummary { id: SessionId(1), viewers: 2 }],
        };
        let json = serde_json::to_string(&listing).unwrap();
        assert_eq!(json, r#"{"type":"sessions","sessions":[{"id":1,"viewers":2}]}"#);
    }

    #[test]
    fn test_replay_messages() {
        let fetch: ReplayClientMessage =
            serde_json::from_str(r#"{"type":"fetch","key":"01-02-2024_10-00-00_3"}"#).unwrap();
        assert!(matches!(fetch, ReplayClientMessage::Fetch { ref key } if key == "01-02-2024_10-00-00_3"));

        let missing = ReplayServerMessage::NotFound { key: "nope".into() };
        assert!(serde_json::to_string(&missing).unwrap().contains("not_found"));
    }

    #[test]
    fn test_error_codes() {
        let error = ServerError { code: ErrorCode::VersionMismatch, message: "v2".into() };
        assert!(serde_json::to_string(&error).unwrap().contains("version_mismatch"));
    }
}
