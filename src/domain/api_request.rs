//! Typed API requests consumed by the call worker.
//!
//! A request arrives as a JSON object with a `type` discriminator. Decoding
//! happens in two steps so an unsupported type can still be named in logs:
//! the discriminator is read first, then the full payload is decoded into
//! [`ApiRequest`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::session::IDLE;

/// Errors raised while decoding a request payload.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RequestError {
    #[error("Malformed request JSON: {0}")]
    MalformedJson(String),

    #[error("Request has no type")]
    MissingType,

    #[error("Invalid '{request_type}' request: {message}")]
    InvalidPayload {
        request_type: String,
        message: String,
    },
}

/// What must be configured before a request can be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Main credential and client present.
    Main,
    /// Main present, and the opponent credential and client either both set or both absent.
    MainWithConsistentOpponent,
    /// Main present and a game is active.
    MainAndGame,
    /// Opponent credential and client present and a game is active.
    OpponentAndGame,
}

/// One decoded request, waiting in the call queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    /// The raw `type` discriminator.
    pub request_type: String,
    pub request: ApiRequest,
}

impl PendingCall {
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RequestError::MalformedJson(e.to_string()))?;

        let request_type = value
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or(RequestError::MissingType)?
            .to_string();

        let request =
            ApiRequest::deserialize(&value).map_err(|e| RequestError::InvalidPayload {
                request_type: request_type.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            request_type,
            request,
        })
    }
}

/// Every request type the call worker knows how to execute.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ApiRequest {
    #[serde(rename = "getAccountInfoMain")]
    GetAccountInfoMain,

    #[serde(rename = "abortRunningGames")]
    AbortRunningGames,

    // Wire name kept as the board firmware sends it.
    #[serde(rename = "withdrawTornament")]
    WithdrawTournament { id: String },

    #[serde(rename = "joinTournamentByName")]
    JoinTournamentByName(JoinByName),

    #[serde(rename = "joinTournamentById")]
    JoinTournamentById { id: String },

    #[serde(rename = "createGame")]
    CreateGame(CreateGame),

    #[serde(rename = "abort")]
    Abort,

    #[serde(rename = "resign")]
    Resign,

    #[serde(rename = "claim-victory")]
    ClaimVictory,

    #[serde(rename = "makeMove")]
    MakeMove {
        #[serde(rename = "move")]
        uci: String,
    },

    #[serde(rename = "draw")]
    Draw {
        #[serde(deserialize_with = "lenient_accept")]
        parameter: bool,
    },

    #[serde(rename = "takeback")]
    Takeback {
        #[serde(deserialize_with = "lenient_accept")]
        parameter: bool,
    },

    #[serde(rename = "writeChatMessage")]
    WriteChatMessage { text: String },

    #[serde(rename = "makeMoveOpponent")]
    MakeMoveOpponent {
        #[serde(rename = "move")]
        uci: String,
    },

    #[serde(rename = "resignOpponent")]
    ResignOpponent,

    #[serde(rename = "drawOpponent")]
    DrawOpponent {
        #[serde(deserialize_with = "lenient_accept")]
        parameter: bool,
    },

    #[serde(other)]
    Unsupported,
}

impl ApiRequest {
    /// Requirement class, or `None` for unsupported requests.
    pub fn requirement(&self) -> Option<Requirement> {
        use ApiRequest::*;
        match self {
            GetAccountInfoMain
            | AbortRunningGames
            | WithdrawTournament { .. }
            | JoinTournamentByName(_)
            | JoinTournamentById { .. } => Some(Requirement::Main),
            CreateGame(_) => Some(Requirement::MainWithConsistentOpponent),
            Abort
            | Resign
            | ClaimVictory
            | MakeMove { .. }
            | Draw { .. }
            | Takeback { .. }
            | WriteChatMessage { .. } => Some(Requirement::MainAndGame),
            MakeMoveOpponent { .. } | ResignOpponent | DrawOpponent { .. } => {
                Some(Requirement::OpponentAndGame)
            }
            Unsupported => None,
        }
    }
}

/// Payload of `joinTournamentByName`.
///
/// Every field is optional on the wire; an incomplete request matches no
/// tournament and is answered with a failed response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinByName {
    #[serde(default)]
    pub tournament_name: String,
    /// Which list to search: `created`, `started` or `finished`.
    #[serde(default)]
    pub tournament_status: String,
    /// Clock limit in seconds.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Clock increment in seconds.
    #[serde(default)]
    pub increment: Option<u32>,
}

/// Payload of `createGame`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateGame {
    #[serde(default)]
    pub opponentname: Option<String>,
    /// Seek clock in minutes.
    #[serde(default = "default_time_m")]
    pub time_m: u32,
    /// Challenge clock in seconds.
    #[serde(default = "default_time_s")]
    pub time_s: u32,
    #[serde(default)]
    pub increment: u32,
    #[serde(default)]
    pub rated: bool,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub otb: Option<String>,
    #[serde(default = "default_request_id")]
    pub request_id: String,
}

impl CreateGame {
    /// Over-the-board mode: the opponent session accepts the challenge itself.
    pub fn is_otb(&self) -> bool {
        self.otb.as_deref() == Some("yes")
    }
}

fn default_time_m() -> u32 {
    15
}

fn default_time_s() -> u32 {
    600
}

fn default_request_id() -> String {
    IDLE.to_string()
}

/// Opponent requested by `createGame.opponentname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opponent {
    /// Open seek.
    Random,
    /// Lichess AI at level 1..=8.
    Ai(u8),
    /// Direct challenge to a user.
    Human(String),
}

impl Opponent {
    /// `random`, `AI_<digit>` (out-of-range levels fall back to 1) or a username.
    pub fn parse(name: &str) -> Self {
        if name == "random" {
            return Opponent::Random;
        }
        if let Some(level) = name.strip_prefix("AI_") {
            if level.len() == 1 {
                if let Ok(level) = level.parse::<u8>() {
                    let level = if (1..=8).contains(&level) { level } else { 1 };
                    return Opponent::Ai(level);
                }
            }
        }
        Opponent::Human(name.to_string())
    }
}

fn lenient_accept<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Accept {
        Flag(bool),
        Word(String),
    }

    match Accept::deserialize(deserializer)? {
        Accept::Flag(flag) => Ok(flag),
        Accept::Word(word) => match word.to_ascii_lowercase().as_str() {
            "yes" | "true" | "accept" => Ok(true),
            "no" | "false" | "decline" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected yes/no, got '{}'",
                other
            ))),
        },
    }
}
