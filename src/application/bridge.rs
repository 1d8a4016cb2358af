//! BoardBridge - wires sessions and workers for one physical board.
//!
//! Control events are applied one at a time. Workers that depend on a
//! session are stopped before the session is replaced, so a consumer that
//! needs to be provoked still has an open client to do it with.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::call_worker::{CallWorker, CallWorkerConfig, EnqueueError};
use super::control::{BoardStatus, ControlEvent};
use super::session_pool::{SessionPool, SessionSlot};
use super::stream_worker::{StreamRole, StreamWorker, StreamWorkerConfig};
use crate::config::WorkersConfig;
use crate::domain::{Credential, GameRef};
use crate::ports::{ClientFactory, LichessError, ResponsePublisher};

const MAIN_SLOTS: [SessionSlot; 3] = [
    SessionSlot::ApiMain,
    SessionSlot::BoardMain,
    SessionSlot::EventMain,
];
const OPPONENT_SLOTS: [SessionSlot; 2] = [SessionSlot::ApiOpponent, SessionSlot::BoardOpponent];

/// Errors that can occur when applying a control event.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum BridgeError {
    #[error(transparent)]
    Enqueue(#[from] EnqueueError),

    #[error("failed to open session {slot}: {source}")]
    Session {
        slot: SessionSlot,
        source: LichessError,
    },
}

#[derive(Debug, Default)]
struct BridgeState {
    main: Credential,
    opponent: Credential,
    game: GameRef,
    status: Option<BoardStatus>,
}

impl BridgeState {
    fn is_offline(&self) -> bool {
        self.status == Some(BoardStatus::Offline)
    }
}

/// Orchestrates the session pool, the three stream workers and the call worker.
pub struct BoardBridge {
    pool: SessionPool,
    events: StreamWorker,
    main_board: StreamWorker,
    opponent_board: StreamWorker,
    calls: CallWorker,
    state: Mutex<BridgeState>,
}

impl BoardBridge {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        config: &WorkersConfig,
        publisher: Arc<dyn ResponsePublisher>,
    ) -> Self {
        Self {
            pool: SessionPool::new(factory),
            events: StreamWorker::new(StreamRole::Events, StreamWorkerConfig::events(config))
                .with_publisher(publisher.clone()),
            main_board: StreamWorker::new(StreamRole::MainBoard, StreamWorkerConfig::board(config))
                .with_publisher(publisher.clone()),
            opponent_board: StreamWorker::new(
                StreamRole::OpponentBoard,
                StreamWorkerConfig::board(config),
            )
            .with_publisher(publisher.clone()),
            calls: CallWorker::new(CallWorkerConfig::from(config)).with_publisher(publisher),
            state: Mutex::new(BridgeState::default()),
        }
    }

    /// Applies one control event.
    ///
    /// Session failures are reported after the remaining steps have been
    /// applied; the affected workers are left without a client.
    pub async fn handle(&self, event: ControlEvent) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        match event {
            ControlEvent::ApiCall(raw) => {
                self.calls.enqueue(raw)?;
                if !state.is_offline() {
                    self.calls.run();
                }
                Ok(())
            }
            ControlEvent::GameId(game) => {
                self.change_game(&mut state, game).await;
                Ok(())
            }
            ControlEvent::TokenMain(credential) => self.change_main(&mut state, credential).await,
            ControlEvent::TokenOpponent(credential) => {
                self.change_opponent(&mut state, credential).await
            }
            ControlEvent::Status(BoardStatus::Online) => self.go_online(&mut state).await,
            ControlEvent::Status(BoardStatus::Offline) => {
                info!("Board offline, stopping workers");
                state.status = Some(BoardStatus::Offline);
                self.stop_all().await;
                self.pool.close_all().await;
                Ok(())
            }
        }
    }

    /// Stops every worker and closes every session.
    pub async fn shutdown(&self) {
        let _state = self.state.lock().await;
        info!("Shutting down bridge");
        self.stop_all().await;
        self.pool.close_all().await;
    }

    pub fn is_any_worker_alive(&self) -> bool {
        self.events.is_alive()
            || self.main_board.is_alive()
            || self.opponent_board.is_alive()
            || self.calls.is_alive()
    }

    pub fn events(&self) -> &StreamWorker {
        &self.events
    }

    pub fn main_board(&self) -> &StreamWorker {
        &self.main_board
    }

    pub fn opponent_board(&self) -> &StreamWorker {
        &self.opponent_board
    }

    pub fn calls(&self) -> &CallWorker {
        &self.calls
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    async fn change_game(&self, state: &mut BridgeState, game: GameRef) {
        if state.game == game {
            return;
        }
        info!(from = %state.game, to = %game, "Game changed");
        state.game = game.clone();

        self.calls.update_game_ref(game.clone()).await;
        self.main_board.update_game_ref(game.clone()).await;
        self.opponent_board.update_game_ref(game).await;

        if !state.is_offline() {
            self.main_board.run().await;
            self.opponent_board.run().await;
        }
    }

    async fn change_main(&self, state: &mut BridgeState, credential: Credential) -> Result<(), BridgeError> {
        if state.main == credential {
            return Ok(());
        }
        info!(from = %state.main, to = %credential, "Main token changed");
        state.main = credential.clone();

        self.events.stop().await;
        self.main_board.stop().await;
        let opened = self.open_sessions(&MAIN_SLOTS, &credential).await;
        self.attach_main(&credential).await;

        if !state.is_offline() && !credential.is_idle() {
            self.events.run().await;
            self.main_board.run().await;
            self.calls.run();
        }
        opened
    }

    async fn change_opponent(&self, state: &mut BridgeState, credential: Credential) -> Result<(), BridgeError> {
        if state.opponent == credential {
            return Ok(());
        }
        info!(from = %state.opponent, to = %credential, "Opponent token changed");
        state.opponent = credential.clone();

        self.opponent_board.stop().await;
        let opened = self.open_sessions(&OPPONENT_SLOTS, &credential).await;
        self.attach_opponent(&credential).await;

        if !state.is_offline() && !credential.is_idle() {
            self.opponent_board.run().await;
        }
        opened
    }

    async fn go_online(&self, state: &mut BridgeState) -> Result<(), BridgeError> {
        info!("Board online, starting workers");
        state.status = Some(BoardStatus::Online);

        let mut result = Ok(());
        if !state.main.is_idle() {
            let missing = self.missing_slots(&MAIN_SLOTS).await;
            result = result.and(self.open_sessions(&missing, &state.main).await);
            self.attach_main(&state.main).await;
        }
        if !state.opponent.is_idle() {
            let missing = self.missing_slots(&OPPONENT_SLOTS).await;
            result = result.and(self.open_sessions(&missing, &state.opponent).await);
            self.attach_opponent(&state.opponent).await;
        }

        self.calls.run();
        self.events.run().await;
        self.main_board.run().await;
        self.opponent_board.run().await;
        result
    }

    async fn missing_slots(&self, slots: &[SessionSlot]) -> Vec<SessionSlot> {
        let mut missing = Vec::new();
        for &slot in slots {
            if self.pool.get(slot).await.is_none() {
                missing.push(slot);
            }
        }
        missing
    }

    /// Replaces the sessions of `slots`; returns the first failure.
    async fn open_sessions(&self, slots: &[SessionSlot], credential: &Credential) -> Result<(), BridgeError> {
        let mut result = Ok(());
        for &slot in slots {
            if let Err(source) = self.pool.set_token(slot, credential).await {
                error!(slot = %slot, error = %source, "Failed to open session");
                if result.is_ok() {
                    result = Err(BridgeError::Session { slot, source });
                }
            }
        }
        result
    }

    async fn attach_main(&self, credential: &Credential) {
        self.events
            .update_client(self.pool.get(SessionSlot::EventMain).await, credential.clone())
            .await;
        self.main_board
            .update_client(self.pool.get(SessionSlot::BoardMain).await, credential.clone())
            .await;
        self.calls
            .update_main(self.pool.get(SessionSlot::ApiMain).await, credential.clone())
            .await;
    }

    async fn attach_opponent(&self, credential: &Credential) {
        self.opponent_board
            .update_client(self.pool.get(SessionSlot::BoardOpponent).await, credential.clone())
            .await;
        self.calls
            .update_opponent(self.pool.get(SessionSlot::ApiOpponent).await, credential.clone())
            .await;
    }

    async fn stop_all(&self) {
        self.calls.stop().await;
        self.events.stop().await;
        self.main_board.stop().await;
        self.opponent_board.stop().await;
    }
}
