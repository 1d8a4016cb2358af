//! Typed push messages delivered by the Lichess account-event and board streams.
//!
//! Messages are decoded leniently: every field has a default, and a message
//! with an unrecognised `type` (or a shape that does not match) decodes to
//! [`StreamEvent::Unknown`] instead of failing.

use serde::Deserialize;
use serde_json::Value;

/// Status reported by Lichess while a game is in progress.
pub const STATUS_STARTED: &str = "started";

/// One message read from a Lichess push stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    GameState(GameState),
    GameFull(GameFull),
    ChatLine(ChatLine),
    OpponentGone(OpponentGone),
    GameStart(GameEvent),
    GameFinish(GameEvent),
    Challenge(ChallengeEvent),
    ChallengeCanceled(ChallengeEvent),
    ChallengeDeclined(ChallengeEvent),
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Decodes a raw stream message, falling back to `Unknown`.
    pub fn from_value(value: &Value) -> Self {
        Self::deserialize(value).unwrap_or(StreamEvent::Unknown)
    }

    /// Returns true when the message means the game stream is over.
    ///
    /// A `gameFull` without an embedded status counts as over.
    pub fn ends_game(&self) -> bool {
        match self {
            StreamEvent::GameState(state) => !state.is_started(),
            StreamEvent::GameFull(full) => full.state.as_ref().map_or(true, |s| !s.is_started()),
            StreamEvent::OpponentGone(gone) => gone.gone && gone.claim_win_in_seconds == Some(0),
            _ => false,
        }
    }

    /// The `type` discriminator as sent by Lichess.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::GameState(_) => "gameState",
            StreamEvent::GameFull(_) => "gameFull",
            StreamEvent::ChatLine(_) => "chatLine",
            StreamEvent::OpponentGone(_) => "opponentGone",
            StreamEvent::GameStart(_) => "gameStart",
            StreamEvent::GameFinish(_) => "gameFinish",
            StreamEvent::Challenge(_) => "challenge",
            StreamEvent::ChallengeCanceled(_) => "challengeCanceled",
            StreamEvent::ChallengeDeclined(_) => "challengeDeclined",
            StreamEvent::Unknown => "unknown",
        }
    }
}

/// Clock and move state of a running game (times in milliseconds).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub moves: String,
    pub wtime: u64,
    pub btime: u64,
    pub winc: u64,
    pub binc: u64,
    pub status: Option<String>,
    pub winner: Option<String>,
    pub wdraw: bool,
    pub bdraw: bool,
    pub wtakeback: bool,
    pub btakeback: bool,
}

impl GameState {
    pub fn is_started(&self) -> bool {
        self.status.as_deref() == Some(STATUS_STARTED)
    }

    /// Number of plies played so far.
    pub fn move_count(&self) -> usize {
        self.moves.split_whitespace().count()
    }

    pub fn last_move(&self) -> Option<&str> {
        self.moves.split_whitespace().last()
    }
}

/// First message of a board stream: players plus the initial state.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameFull {
    pub id: String,
    pub white: PlayerInfo,
    pub black: PlayerInfo,
    pub state: Option<GameState>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayerInfo {
    pub name: Option<String>,
    pub rating: Option<u32>,
    pub ai_level: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatLine {
    pub username: String,
    pub text: String,
    pub room: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpponentGone {
    pub gone: bool,
    pub claim_win_in_seconds: Option<u64>,
}

/// Payload of `gameStart` / `gameFinish` account events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameEvent {
    pub game: GameEventInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameEventInfo {
    pub game_id: String,
    pub color: String,
    pub is_my_turn: bool,
    pub last_move: String,
    pub opponent: Opponent,
    pub rated: bool,
    pub speed: String,
    pub seconds_left: Option<u64>,
    pub status: Option<GameStatus>,
    pub winner: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Opponent {
    pub username: Option<String>,
    pub rating: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameStatus {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChallengeEvent {
    pub challenge: ChallengeInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChallengeInfo {
    pub id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_game_state() {
        let event = StreamEvent::from_value(&json!({
            "type": "gameState",
            "moves": "e2e4 e7e5",
            "wtime": 600000,
            "btime": 590000,
            "winc": 0,
            "binc": 0,
            "status": "started"
        }));

        match event {
            StreamEvent::GameState(state) => {
                assert_eq!(state.move_count(), 2);
                assert_eq!(state.last_move(), Some("e7e5"));
                assert!(state.is_started());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn started_game_state_is_not_terminal() {
        let event = StreamEvent::from_value(&json!({"type": "gameState", "status": "started"}));
        assert!(!event.ends_game());
    }

    #[test]
    fn finished_game_state_is_terminal() {
        let event = StreamEvent::from_value(&json!({"type": "gameState", "status": "resign"}));
        assert!(event.ends_game());
    }

    #[test]
    fn game_full_uses_embedded_status() {
        let running = StreamEvent::from_value(&json!({
            "type": "gameFull",
            "id": "abcd1234",
            "state": {"type": "gameState", "status": "started"}
        }));
        let over = StreamEvent::from_value(&json!({
            "type": "gameFull",
            "id": "abcd1234",
            "state": {"type": "gameState", "status": "mate"}
        }));

        assert!(!running.ends_game());
        assert!(over.ends_game());
    }

    #[test]
    fn game_full_without_status_is_terminal() {
        let event = StreamEvent::from_value(&json!({"type": "gameFull", "id": "abcd1234"}));
        assert!(event.ends_game());
    }

    #[test]
    fn opponent_gone_terminal_only_when_claimable_now() {
        let claimable = StreamEvent::from_value(&json!({
            "type": "opponentGone", "gone": true, "claimWinInSeconds": 0
        }));
        let counting = StreamEvent::from_value(&json!({
            "type": "opponentGone", "gone": true, "claimWinInSeconds": 12
        }));
        let back = StreamEvent::from_value(&json!({"type": "opponentGone", "gone": false}));

        assert!(claimable.ends_game());
        assert!(!counting.ends_game());
        assert!(!back.ends_game());
    }

    #[test]
    fn chat_and_account_events_never_end_game() {
        let chat = StreamEvent::from_value(&json!({"type": "chatLine", "text": "gg"}));
        let start = StreamEvent::from_value(&json!({"type": "gameStart", "game": {"gameId": "x"}}));
        assert!(!chat.ends_game());
        assert!(!start.ends_game());
    }

    #[test]
    fn unknown_type_decodes_to_unknown() {
        let event = StreamEvent::from_value(&json!({"type": "somethingNew", "x": 1}));
        assert_eq!(event, StreamEvent::Unknown);
        assert_eq!(event.kind(), "unknown");
    }

    #[test]
    fn missing_type_decodes_to_unknown() {
        let event = StreamEvent::from_value(&json!({"status": "started"}));
        assert_eq!(event, StreamEvent::Unknown);
    }

    #[test]
    fn decodes_challenge_events() {
        let event = StreamEvent::from_value(&json!({
            "type": "challengeDeclined",
            "challenge": {"id": "ch123456", "status": "declined"}
        }));
        match event {
            StreamEvent::ChallengeDeclined(c) => {
                assert_eq!(c.challenge.id, "ch123456");
                assert_eq!(c.challenge.status, "declined");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
