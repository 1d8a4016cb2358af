//! SessionPool - one authenticated Lichess client per logical slot.
//!
//! Replacing a slot's credential closes the previous client before the new
//! one becomes visible through [`SessionPool::get`]. Close failures are logged
//! and swallowed: teardown is best-effort.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::Credential;
use crate::ports::{ClientFactory, ClientHandle, LichessError};

/// Logical owner of a client handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionSlot {
    ApiMain,
    ApiOpponent,
    BoardMain,
    BoardOpponent,
    EventMain,
}

impl SessionSlot {
    pub const ALL: [SessionSlot; 5] = [
        SessionSlot::ApiMain,
        SessionSlot::ApiOpponent,
        SessionSlot::BoardMain,
        SessionSlot::BoardOpponent,
        SessionSlot::EventMain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSlot::ApiMain => "api-main",
            SessionSlot::ApiOpponent => "api-opponent",
            SessionSlot::BoardMain => "board-main",
            SessionSlot::BoardOpponent => "board-opponent",
            SessionSlot::EventMain => "event-main",
        }
    }
}

impl fmt::Display for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pool of authenticated clients keyed by slot.
pub struct SessionPool {
    factory: Arc<dyn ClientFactory>,
    sessions: RwLock<HashMap<SessionSlot, ClientHandle>>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the client of `slot`.
    ///
    /// Always closes the existing client. For an idle credential the slot is
    /// left empty and `Ok(None)` is returned; otherwise a fresh client is
    /// opened and returned. If opening fails the slot stays empty.
    pub async fn set_token(
        &self,
        slot: SessionSlot,
        credential: &Credential,
    ) -> Result<Option<ClientHandle>, LichessError> {
        let mut sessions = self.sessions.write().await;
        Self::close_entry(&mut sessions, slot);

        if credential.is_idle() {
            debug!(slot = %slot, "Session cleared");
            return Ok(None);
        }

        let client = self.factory.connect(credential)?;
        sessions.insert(slot, client.clone());
        info!(slot = %slot, credential = %credential, "Session opened");
        Ok(Some(client))
    }

    /// The current client of `slot`, if any.
    pub async fn get(&self, slot: SessionSlot) -> Option<ClientHandle> {
        self.sessions.read().await.get(&slot).cloned()
    }

    pub async fn close(&self, slot: SessionSlot) {
        let mut sessions = self.sessions.write().await;
        Self::close_entry(&mut sessions, slot);
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for slot in SessionSlot::ALL {
            Self::close_entry(&mut sessions, slot);
        }
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn close_entry(sessions: &mut HashMap<SessionSlot, ClientHandle>, slot: SessionSlot) {
        if let Some(client) = sessions.remove(&slot) {
            match client.close() {
                Ok(()) => debug!(slot = %slot, "Session closed"),
                Err(e) => warn!(slot = %slot, error = %e, "Failed to close session"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::lichess::{MockClientFactory, MockLichessClient};
    use crate::domain::GameRef;

    fn pool() -> (SessionPool, MockClientFactory) {
        let factory = MockClientFactory::new();
        (SessionPool::new(Arc::new(factory.clone())), factory)
    }

    #[tokio::test]
    async fn set_token_opens_session() {
        let (pool, factory) = pool();
        let client = pool
            .set_token(SessionSlot::ApiMain, &Credential::new("tok1"))
            .await
            .unwrap();

        assert!(client.is_some());
        assert!(pool.get(SessionSlot::ApiMain).await.is_some());
        assert!(pool.get(SessionSlot::BoardMain).await.is_none());
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn set_token_replaces_and_closes_previous() {
        let (pool, _factory) = pool();
        let first = pool
            .set_token(SessionSlot::ApiMain, &Credential::new("tok1"))
            .await
            .unwrap()
            .unwrap();
        let second = pool
            .set_token(SessionSlot::ApiMain, &Credential::new("tok1"))
            .await
            .unwrap()
            .unwrap();

        let game = GameRef::new("abcd1234");
        assert_eq!(first.resign(&game).await, Err(LichessError::Closed));
        assert_eq!(second.resign(&game).await, Ok(()));
    }

    #[tokio::test]
    async fn idle_credential_clears_slot() {
        let (pool, factory) = pool();
        pool.set_token(SessionSlot::BoardMain, &Credential::new("tok1"))
            .await
            .unwrap();

        let result = pool
            .set_token(SessionSlot::BoardMain, &Credential::idle())
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(pool.get(SessionSlot::BoardMain).await.is_none());
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn close_failure_is_swallowed() {
        let (pool, factory) = pool();
        let credential = Credential::new("tok1");
        factory.register(
            &credential,
            MockLichessClient::new().with_close_error(LichessError::network("reset")),
        );
        pool.set_token(SessionSlot::EventMain, &credential)
            .await
            .unwrap();

        pool.close(SessionSlot::EventMain).await;

        assert!(pool.get(SessionSlot::EventMain).await.is_none());
    }

    #[tokio::test]
    async fn close_all_empties_pool() {
        let (pool, _factory) = pool();
        pool.set_token(SessionSlot::ApiMain, &Credential::new("tok1"))
            .await
            .unwrap();
        pool.set_token(SessionSlot::ApiOpponent, &Credential::new("tok2"))
            .await
            .unwrap();
        assert_eq!(pool.len().await, 2);

        pool.close_all().await;

        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn failed_connect_leaves_slot_empty() {
        let (pool, factory) = pool();
        pool.set_token(SessionSlot::ApiMain, &Credential::new("tok1"))
            .await
            .unwrap();
        factory.refuse_connections(LichessError::AuthenticationFailed);

        let result = pool
            .set_token(SessionSlot::ApiMain, &Credential::new("tok2"))
            .await;

        assert!(matches!(result, Err(LichessError::AuthenticationFailed)));
        assert!(pool.get(SessionSlot::ApiMain).await.is_none());
    }
}
