//! Lichess Client Port - Interface to the Lichess Board API.
//!
//! One client is bound to one personal access token. It exposes the two
//! long-lived NDJSON push streams (account events and per-game board state)
//! and the one-shot REST operations the call worker dispatches to.
//!
//! # Design
//!
//! - Push streams yield `Ok(None)` for keep-alive blank lines so consumers
//!   get a chance to re-check their own state while the game is quiet
//! - Streams are plain `futures::Stream`s; dropping one closes the connection
//! - REST result types carry only the fields the bridge reads

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use crate::domain::{Credential, GameRef};

/// One frame of a push stream: `None` for a keep-alive line.
pub type StreamFrame = Option<Value>;

/// A server push stream.
pub type LichessStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, LichessError>> + Send>>;

/// Shared handle to an authenticated client.
pub type ClientHandle = Arc<dyn LichessClient>;

/// Port for the Lichess Board API, bound to one credential.
#[async_trait]
pub trait LichessClient: Send + Sync {
    /// Opens the account-event stream (game start/finish, challenges).
    async fn stream_incoming_events(&self) -> Result<LichessStream, LichessError>;

    /// Opens the board-state stream of `game`.
    async fn stream_game_state(&self, game: &GameRef) -> Result<LichessStream, LichessError>;

    async fn account(&self) -> Result<Account, LichessError>;

    /// Games currently being played by this account.
    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, LichessError>;

    /// Posts a seek and waits until it is paired or dropped.
    async fn seek(&self, request: SeekRequest) -> Result<(), LichessError>;

    async fn make_move(&self, game: &GameRef, uci: &str) -> Result<(), LichessError>;

    async fn resign(&self, game: &GameRef) -> Result<(), LichessError>;

    async fn abort_game(&self, game: &GameRef) -> Result<(), LichessError>;

    async fn claim_victory(&self, game: &GameRef) -> Result<(), LichessError>;

    async fn handle_draw_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError>;

    async fn handle_takeback_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError>;

    async fn post_message(&self, game: &GameRef, room: ChatRoom, text: &str) -> Result<(), LichessError>;

    /// Challenges a user. A rejected challenge is reported in `ChallengeCreated::error`.
    async fn create_challenge(&self, request: ChallengeRequest) -> Result<ChallengeCreated, LichessError>;

    /// Starts a game against the Lichess AI.
    async fn create_ai_challenge(&self, request: AiChallengeRequest) -> Result<ChallengeCreated, LichessError>;

    async fn accept_challenge(&self, challenge_id: &str) -> Result<(), LichessError>;

    /// Current arena tournaments grouped by status.
    async fn arena_tournaments(&self) -> Result<ArenaTournaments, LichessError>;

    async fn join_arena(&self, tournament_id: &str, pair_immediately: bool) -> Result<(), LichessError>;

    async fn withdraw_arena(&self, tournament_id: &str) -> Result<(), LichessError>;

    /// Releases the underlying connection pool. Later calls fail with `Closed`.
    fn close(&self) -> Result<(), LichessError>;
}

/// Opens authenticated clients.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<ClientHandle, LichessError>;
}

/// Errors that can occur when talking to Lichess.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LichessError {
    /// Token rejected.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("rate limited")]
    RateLimited,

    /// Non-success status not covered by another variant.
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

impl LichessError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

/// Account profile (`/api/account`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Account {
    pub username: String,
    pub perfs: HashMap<String, Perf>,
}

impl Account {
    /// Rating in the given speed category (`blitz`, `rapid`, ...).
    pub fn rating(&self, perf: &str) -> Option<u32> {
        self.perfs.get(perf).map(|p| p.rating)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Perf {
    pub rating: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OngoingGame {
    pub game_id: String,
}

/// Open seek parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekRequest {
    pub time_minutes: u32,
    pub increment_secs: u32,
    pub rated: bool,
    /// `white`, `black` or `None` for random.
    pub color: Option<String>,
}

/// Direct challenge parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeRequest {
    pub username: String,
    pub rated: bool,
    pub clock_limit_secs: u32,
    pub clock_increment_secs: u32,
    pub color: Option<String>,
}

/// AI challenge parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AiChallengeRequest {
    /// 1..=8
    pub level: u8,
    pub clock_limit_secs: u32,
    pub clock_increment_secs: u32,
    pub color: Option<String>,
}

/// Result of creating a challenge.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChallengeCreated {
    pub id: Option<String>,
    pub error: Option<String>,
}

impl ChallengeCreated {
    /// The created game id, if it has the length of a Lichess game id.
    pub fn game_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| id.len() == GAME_ID_LEN)
    }
}

/// Length of Lichess game and tournament ids.
pub const GAME_ID_LEN: usize = 8;

/// Chat room of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRoom {
    Player,
    Spectator,
}

impl ChatRoom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRoom::Player => "player",
            ChatRoom::Spectator => "spectator",
        }
    }
}

/// Arena tournaments as listed by `/api/tournament`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ArenaTournaments {
    pub created: Vec<ArenaTournament>,
    pub started: Vec<ArenaTournament>,
    pub finished: Vec<ArenaTournament>,
}

impl ArenaTournaments {
    /// The list for `status`; unknown statuses yield an empty list.
    pub fn by_status(&self, status: &str) -> &[ArenaTournament] {
        match status {
            "created" => &self.created,
            "started" => &self.started,
            "finished" => &self.finished,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArenaTournament {
    pub id: String,
    pub full_name: String,
    pub created_by: String,
    pub system: String,
    pub clock: TournamentClock,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub starts_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TournamentClock {
    /// Seconds.
    pub limit: u32,
    /// Seconds.
    pub increment: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn account_reads_perf_ratings() {
        let account: Account = serde_json::from_value(json!({
            "id": "alice",
            "username": "Alice",
            "perfs": {"blitz": {"games": 10, "rating": 1510}, "rapid": {"rating": 1620}}
        }))
        .unwrap();

        assert_eq!(account.username, "Alice");
        assert_eq!(account.rating("blitz"), Some(1510));
        assert_eq!(account.rating("classical"), None);
    }

    #[test]
    fn tournaments_decode_start_time() {
        let list: ArenaTournaments = serde_json::from_value(json!({
            "created": [{
                "id": "abcd1234",
                "fullName": "Hourly Blitz Arena",
                "createdBy": "lichess",
                "system": "arena",
                "clock": {"limit": 180, "increment": 0},
                "startsAt": 1_700_000_000_000i64
            }],
            "started": [],
            "finished": []
        }))
        .unwrap();

        let tournament = &list.by_status("created")[0];
        assert_eq!(tournament.clock.limit, 180);
        assert_eq!(tournament.starts_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(list.by_status("bogus").is_empty());
    }

    #[test]
    fn challenge_game_id_requires_full_length() {
        let ok = ChallengeCreated { id: Some("abcd1234".into()), error: None };
        let short = ChallengeCreated { id: Some("abc".into()), error: None };
        assert_eq!(ok.game_id(), Some("abcd1234"));
        assert_eq!(short.game_id(), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(LichessError::api(404, "not found").to_string(), "api error 404: not found");
        assert_eq!(LichessError::Closed.to_string(), "client closed");
    }
}
