//! Session value objects: credentials, game references and worker generations.
//!
//! Both `Credential` and `GameRef` reserve the sentinel `"idle"` for "absent".
//! Values are compared by content; a worker launched for one `Generation`
//! treats any other generation as a reason to stop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel value meaning "no credential" / "no active game".
pub const IDLE: &str = "idle";

/// Opaque Lichess personal access token.
///
/// `Debug` and `Display` mask the token so it can be logged safely.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Creates a credential. Empty input is treated as idle.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        if token.trim().is_empty() {
            return Self::idle();
        }
        Self(token)
    }

    /// The "no credential" sentinel.
    pub fn idle() -> Self {
        Self(IDLE.to_string())
    }

    /// Returns true for the sentinel.
    pub fn is_idle(&self) -> bool {
        self.0 == IDLE
    }

    /// Exposes the raw token (for authenticating requests).
    pub fn expose(&self) -> &str {
        &self.0
    }

    fn masked(&self) -> String {
        if self.is_idle() {
            return IDLE.to_string();
        }
        let chars: Vec<char> = self.0.chars().collect();
        let visible = chars.len().saturating_sub(4);
        let tail: String = chars[visible..].iter().collect();
        format!("****{}", tail)
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.masked())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Opaque identifier of a Lichess game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameRef(String);

impl GameRef {
    /// Creates a game reference. Empty input is treated as idle.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        if id.trim().is_empty() {
            return Self::idle();
        }
        Self(id)
    }

    /// The "no active game" sentinel.
    pub fn idle() -> Self {
        Self(IDLE.to_string())
    }

    pub fn is_idle(&self) -> bool {
        self.0 == IDLE
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GameRef {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Display for GameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `(credential, game)` pair a stream consumer is launched with.
///
/// Account-event consumers only depend on the credential; they always carry
/// an idle game.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Generation {
    pub credential: Credential,
    pub game: GameRef,
}

impl Generation {
    pub fn new(credential: Credential, game: GameRef) -> Self {
        Self { credential, game }
    }

    /// Generation of an account-event consumer.
    pub fn for_events(credential: Credential) -> Self {
        Self {
            credential,
            game: GameRef::idle(),
        }
    }

    /// The generation announced by a worker with no live consumer.
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.credential.is_idle() && self.game.is_idle()
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.credential, self.game)
    }
}
