//! Decoding of inbound control messages.
//!
//! The board talks to the bridge over five channels. A channel may be given
//! bare (`game_id`) or as a topic path (`chessboard/game_id`); only the last
//! segment is significant.

use serde_json::Value;
use std::fmt;

use crate::domain::{Credential, GameRef};

/// Payloads that carry no information and are ignored on every channel.
const PLACEHOLDER_PAYLOADS: [&str; 3] = ["", "unknown", "unavailable"];

/// Errors that can occur when decoding a control message.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ControlError {
    #[error("unknown control channel: {0}")]
    UnknownChannel(String),

    #[error("malformed payload on {channel}: {message}")]
    MalformedPayload { channel: String, message: String },
}

impl ControlError {
    fn malformed(channel: &str, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            channel: channel.to_string(),
            message: message.into(),
        }
    }
}

/// Availability of the physical board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardStatus {
    Online,
    Offline,
}

impl fmt::Display for BoardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoardStatus::Online => f.write_str("online"),
            BoardStatus::Offline => f.write_str("offline"),
        }
    }
}

/// One decoded control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Raw request JSON for the call worker.
    ApiCall(String),
    GameId(GameRef),
    TokenMain(Credential),
    TokenOpponent(Credential),
    Status(BoardStatus),
}

impl ControlEvent {
    /// Decodes `payload` received on `channel`.
    ///
    /// Returns `Ok(None)` for placeholder payloads.
    pub fn parse(channel: &str, payload: &str) -> Result<Option<Self>, ControlError> {
        let name = channel.rsplit('/').next().unwrap_or(channel);
        let payload = payload.trim();
        if PLACEHOLDER_PAYLOADS.contains(&payload) {
            return Ok(None);
        }

        let event = match name {
            "api_call" => ControlEvent::ApiCall(payload.to_string()),
            "game_id" => ControlEvent::GameId(GameRef::new(field_or_bare(name, payload, "game_id")?)),
            "token_main" => ControlEvent::TokenMain(Credential::new(field_or_bare(name, payload, "token")?)),
            "token_opponent" => {
                ControlEvent::TokenOpponent(Credential::new(field_or_bare(name, payload, "token")?))
            }
            "status" => ControlEvent::Status(parse_status(name, payload)?),
            other => return Err(ControlError::UnknownChannel(other.to_string())),
        };
        Ok(Some(event))
    }

    pub fn channel(&self) -> &'static str {
        match self {
            ControlEvent::ApiCall(_) => "api_call",
            ControlEvent::GameId(_) => "game_id",
            ControlEvent::TokenMain(_) => "token_main",
            ControlEvent::TokenOpponent(_) => "token_opponent",
            ControlEvent::Status(_) => "status",
        }
    }
}

/// `{"<field>": "value"}`, a JSON string, or the bare value.
fn field_or_bare(channel: &str, payload: &str, field: &str) -> Result<String, ControlError> {
    if !payload.starts_with('{') && !payload.starts_with('"') {
        return Ok(payload.to_string());
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|e| ControlError::malformed(channel, e.to_string()))?;
    let text = match &value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(object) => object.get(field).and_then(Value::as_str),
        _ => None,
    };
    text.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ControlError::malformed(channel, format!("expected a non-empty '{}'", field)))
}

fn parse_status(channel: &str, payload: &str) -> Result<BoardStatus, ControlError> {
    match payload.to_ascii_lowercase().as_str() {
        "online" | "on" => Ok(BoardStatus::Online),
        "offline" | "off" => Ok(BoardStatus::Offline),
        other => Err(ControlError::malformed(
            channel,
            format!("unknown status '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(channel: &str, payload: &str) -> ControlEvent {
        ControlEvent::parse(channel, payload).unwrap().unwrap()
    }

    #[test]
    fn game_id_accepts_object_and_bare_forms() {
        assert_eq!(
            parse("game_id", r#"{"game_id": "abcd1234"}"#),
            ControlEvent::GameId(GameRef::new("abcd1234"))
        );
        assert_eq!(
            parse("chessboard/game_id", "abcd1234"),
            ControlEvent::GameId(GameRef::new("abcd1234"))
        );
        assert_eq!(parse("game_id", "idle"), ControlEvent::GameId(GameRef::idle()));
    }

    #[test]
    fn tokens_decode() {
        assert_eq!(
            parse("token_main", r#"{"token": "lip_abc"}"#),
            ControlEvent::TokenMain(Credential::new("lip_abc"))
        );
        assert_eq!(
            parse("token_opponent", "\"lip_def\""),
            ControlEvent::TokenOpponent(Credential::new("lip_def"))
        );
        assert_eq!(parse("token_main", "idle"), ControlEvent::TokenMain(Credential::idle()));
    }

    #[test]
    fn placeholders_are_ignored() {
        for payload in ["", "  ", "unknown", "unavailable"] {
            assert_eq!(ControlEvent::parse("game_id", payload), Ok(None));
        }
    }

    #[test]
    fn api_call_is_passed_through() {
        let raw = r#"{"type":"makeMove","move":"e2e4"}"#;
        assert_eq!(parse("api_call", raw), ControlEvent::ApiCall(raw.to_string()));
    }

    #[test]
    fn status_values() {
        assert_eq!(parse("status", "online"), ControlEvent::Status(BoardStatus::Online));
        assert_eq!(parse("status", "OFFLINE"), ControlEvent::Status(BoardStatus::Offline));
        assert!(matches!(
            ControlEvent::parse("status", "sleeping"),
            Err(ControlError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn object_without_field_is_malformed() {
        assert!(matches!(
            ControlEvent::parse("token_main", r#"{"tok": "x"}"#),
            Err(ControlError::MalformedPayload { ref channel, .. }) if channel == "token_main"
        ));
        assert!(ControlEvent::parse("game_id", "{broken").is_err());
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert_eq!(
            ControlEvent::parse("chessboard/led", "on"),
            Err(ControlError::UnknownChannel("led".to_string()))
        );
    }
}
