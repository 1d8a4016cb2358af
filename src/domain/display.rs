//! Compact display payloads derived from push messages.
//!
//! The board hardware shows a handful of fields per message and has a small
//! receive buffer, so stream messages are reduced before they are published.

use serde_json::{json, Map, Value};

use super::session::{GameRef, IDLE};
use super::stream_event::{GameEventInfo, StreamEvent};

/// Longest chat text forwarded unchanged (keeps a reduced chat line under 255 bytes).
pub const MAX_CHAT_TEXT: usize = 205;

const CORRESPONDENCE: &str = "correspondence";

/// Reduces a board-stream message for `game`.
///
/// Messages without a reduced form are returned unchanged.
pub fn reduce_board(game: &GameRef, raw: &Value, event: &StreamEvent) -> Value {
    match event {
        StreamEvent::GameState(state) => json!({
            "type": "gameState",
            "wclk": clock(state.wtime, state.winc),
            "bclk": clock(state.btime, state.binc),
            "state": state.status.clone().unwrap_or_default(),
            "win": winner_short(state.winner.as_deref()),
            "wdraw": flag(state.wdraw),
            "bdraw": flag(state.bdraw),
            "wback": flag(state.wtakeback),
            "bback": flag(state.btakeback),
            "n": if state.moves.trim().is_empty() { -1 } else { state.move_count() as i64 },
            "last": state.last_move().unwrap_or(""),
            "id": game.as_str(),
        }),
        StreamEvent::GameFull(full) => {
            let state = full.state.clone().unwrap_or_default();
            json!({
                "type": "gameFull",
                "wid": player_label(full.white.name.as_deref(), "white", full.white.rating),
                "bid": player_label(full.black.name.as_deref(), "black", full.black.rating),
                "wclk": clock(state.wtime, state.winc),
                "bclk": clock(state.btime, state.binc),
                "state": state.status.clone().unwrap_or_default(),
                "win": winner_short(state.winner.as_deref()),
                "wdraw": flag(state.wdraw),
                "bdraw": flag(state.bdraw),
                "wback": flag(state.wtakeback),
                "bback": flag(state.btakeback),
                "last": state.last_move().unwrap_or(""),
                "id": game.as_str(),
            })
        }
        StreamEvent::ChatLine(line) => json!({
            "type": "chatLine",
            "text": truncate_chat(&line.text),
            "id": game.as_str(),
        }),
        StreamEvent::OpponentGone(_) => {
            let mut object = raw.as_object().cloned().unwrap_or_else(Map::new);
            object.insert("id".to_string(), Value::String(game.as_str().to_string()));
            Value::Object(object)
        }
        _ => raw.clone(),
    }
}

/// Reduces an account-event message.
///
/// Returns `None` for messages that should not reach the board
/// (correspondence game starts).
pub fn reduce_event(raw: &Value, event: &StreamEvent) -> Option<Value> {
    match event {
        StreamEvent::GameStart(start) => {
            let game = &start.game;
            if game.speed == CORRESPONDENCE {
                return None;
            }
            let mut object = game_summary("gameStart", game);
            object.insert("secondsLeft".into(), json!(game.seconds_left.unwrap_or(0)));
            Some(Value::Object(object))
        }
        StreamEvent::GameFinish(finish) => {
            let game = &finish.game;
            let mut object = game_summary("gameFinish", game);
            object.insert(
                "status".into(),
                json!(game.status.as_ref().map(|s| s.name.as_str()).unwrap_or("")),
            );
            object.insert("win".into(), json!(result_label(game.winner.as_deref())));
            Some(Value::Object(object))
        }
        StreamEvent::Challenge(c) | StreamEvent::ChallengeCanceled(c) | StreamEvent::ChallengeDeclined(c) => {
            Some(json!({
                "type": event.kind(),
                "id": c.challenge.id,
                "status": c.challenge.status,
            }))
        }
        _ => Some(raw.clone()),
    }
}

/// Marker published after a board stream has ended.
pub fn stream_ended(marker_type: &str) -> Value {
    json!({ "type": marker_type, "state": IDLE })
}

fn game_summary(kind: &str, game: &GameEventInfo) -> Map<String, Value> {
    let mut object = Map::new();
    object.insert("type".into(), json!(kind));
    object.insert("gameId".into(), json!(game.game_id));
    object.insert("color".into(), json!(game.color));
    object.insert("isMyTurn".into(), json!(game.is_my_turn));
    object.insert("lastMove".into(), json!(game.last_move));
    object.insert(
        "opponent".into(),
        json!(player_label(
            game.opponent.username.as_deref(),
            "player",
            game.opponent.rating
        )),
    );
    object.insert("rated".into(), json!(game.rated));
    object.insert("speed".into(), json!(game.speed));
    object
}

fn clock(time_ms: u64, increment_ms: u64) -> String {
    format!("{}+{}", millis_to_secs(time_ms), millis_to_secs(increment_ms))
}

fn millis_to_secs(ms: u64) -> u64 {
    (ms + 500) / 1000
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn winner_short(winner: Option<&str>) -> &'static str {
    match winner {
        Some("white") => "w",
        Some("black") => "b",
        _ => "",
    }
}

fn result_label(winner: Option<&str>) -> &'static str {
    match winner {
        Some("white") => "1-0",
        Some("black") => "0-1",
        _ => "",
    }
}

fn player_label(name: Option<&str>, fallback: &str, rating: Option<u32>) -> String {
    format!("{}: {}", name.unwrap_or(fallback), rating.unwrap_or(0))
}

fn truncate_chat(text: &str) -> String {
    if text.chars().count() <= MAX_CHAT_TEXT {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_CHAT_TEXT - 3).collect();
    format!("{}...", cut)
}
