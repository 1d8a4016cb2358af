//! Mock Lichess client for testing.
//!
//! Provides a scriptable implementation of the LichessClient port so workers
//! can be driven without a network.
//!
//! # Features
//!
//! - Push streams fed by the test (`push_board`, `push_event`, keep-alives, errors)
//! - Canned REST responses (account, ongoing games, challenges, tournaments)
//! - Error injection for the next REST call
//! - Call tracking for verification
//!
//! # Panics
//!
//! Methods panic if internal locks are poisoned. This adapter is for tests only.
//!
//! # Example
//!
//! ```ignore
//! let factory = MockClientFactory::new();
//! let main = factory.client_for(&Credential::new("tok1"));
//!
//! main.push_board("abcd1234", json!({"type": "gameState", "status": "started"}));
//! assert!(main.calls().contains(&LichessCall::StreamGame("abcd1234".into())));
//! ```

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::{Credential, GameRef};
use crate::ports::{
    Account, AiChallengeRequest, ArenaTournaments, ChallengeCreated, ChallengeRequest, ChatRoom,
    ClientFactory, ClientHandle, LichessClient, LichessError, LichessStream, OngoingGame,
    SeekRequest, StreamFrame,
};

type FrameSender = mpsc::UnboundedSender<Result<StreamFrame, LichessError>>;

/// A call observed by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum LichessCall {
    StreamEvents,
    StreamGame(String),
    Account,
    OngoingGames,
    Seek(SeekRequest),
    MakeMove { game: String, uci: String },
    Resign(String),
    AbortGame(String),
    ClaimVictory(String),
    DrawOffer { game: String, accept: bool },
    TakebackOffer { game: String, accept: bool },
    PostMessage { game: String, room: ChatRoom, text: String },
    CreateChallenge(ChallengeRequest),
    CreateAiChallenge(AiChallengeRequest),
    AcceptChallenge(String),
    ArenaTournaments,
    JoinArena { id: String, pair_immediately: bool },
    WithdrawArena(String),
}

#[derive(Default)]
struct Feed {
    sender: Option<FrameSender>,
    backlog: Vec<Result<StreamFrame, LichessError>>,
}

impl Feed {
    fn push(&mut self, frame: Result<StreamFrame, LichessError>) {
        if let Some(sender) = &self.sender {
            if sender.send(frame.clone()).is_ok() {
                return;
            }
            self.sender = None;
        }
        self.backlog.push(frame);
    }

    fn open(&mut self) -> LichessStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        for frame in self.backlog.drain(..) {
            let _ = sender.send(frame);
        }
        self.sender = Some(sender);

        Box::pin(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|frame| (frame, receiver))
        }))
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<LichessCall>,
    events: Feed,
    boards: HashMap<String, Feed>,
    failures: VecDeque<LichessError>,
    scheduled: HashMap<usize, LichessError>,
    account: Account,
    ongoing: Vec<OngoingGame>,
    challenge: ChallengeCreated,
    tournaments: ArenaTournaments,
    delay: Duration,
    close_error: Option<LichessError>,
}

/// Scriptable Lichess client.
///
/// Clones share the same script and call log; every `connect` from
/// [`MockClientFactory`] gets its own closed flag, like a fresh session.
#[derive(Clone)]
pub struct MockLichessClient {
    state: Arc<Mutex<MockState>>,
    closed: Arc<AtomicBool>,
}

impl Default for MockLichessClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLichessClient {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn session(&self) -> Self {
        Self {
            state: self.state.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock poisoned")
    }

    // === Script ===

    pub fn with_account(self, account: Account) -> Self {
        self.lock().account = account;
        self
    }

    pub fn with_ongoing_games(self, game_ids: &[&str]) -> Self {
        self.lock().ongoing = game_ids
            .iter()
            .map(|id| OngoingGame {
                game_id: id.to_string(),
            })
            .collect();
        self
    }

    pub fn with_challenge_result(self, created: ChallengeCreated) -> Self {
        self.lock().challenge = created;
        self
    }

    pub fn with_tournaments(self, tournaments: ArenaTournaments) -> Self {
        self.lock().tournaments = tournaments;
        self
    }

    /// Simulated latency of every REST call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    pub fn with_close_error(self, error: LichessError) -> Self {
        self.lock().close_error = Some(error);
        self
    }

    /// The next REST call fails with `error` (after being recorded).
    pub fn fail_next(&self, error: LichessError) {
        self.lock().failures.push_back(error);
    }

    /// The call recorded at position `index` of [`calls`](Self::calls) fails with `error`.
    pub fn fail_call(&self, index: usize, error: LichessError) {
        self.lock().scheduled.insert(index, error);
    }

    // === Stream feeds ===

    /// Pushes a message into the board stream of `game`.
    ///
    /// Messages pushed before the stream is opened are delivered on open.
    pub fn push_board(&self, game: &str, item: Value) {
        self.push_board_frame(game, Ok(Some(item)));
    }

    pub fn push_board_keep_alive(&self, game: &str) {
        self.push_board_frame(game, Ok(None));
    }

    pub fn push_board_error(&self, game: &str, error: LichessError) {
        self.push_board_frame(game, Err(error));
    }

    fn push_board_frame(&self, game: &str, frame: Result<StreamFrame, LichessError>) {
        self.lock()
            .boards
            .entry(game.to_string())
            .or_default()
            .push(frame);
    }

    /// Closes the currently open board stream of `game` from the server side.
    pub fn end_board_stream(&self, game: &str) {
        if let Some(feed) = self.lock().boards.get_mut(game) {
            feed.sender = None;
        }
    }

    pub fn push_event(&self, item: Value) {
        self.lock().events.push(Ok(Some(item)));
    }

    pub fn push_event_keep_alive(&self) {
        self.lock().events.push(Ok(None));
    }

    // === Test Helpers ===

    pub fn calls(&self) -> Vec<LichessCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Calls other than stream opens, in order.
    pub fn rest_calls(&self) -> Vec<LichessCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, LichessCall::StreamEvents | LichessCall::StreamGame(_)))
            .cloned()
            .collect()
    }

    /// How many times the board stream of `game` has been opened.
    pub fn board_stream_opens(&self, game: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, LichessCall::StreamGame(g) if g == game))
            .count()
    }

    pub fn event_stream_opens(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, LichessCall::StreamEvents))
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // === Internals ===

    fn ensure_open(&self) -> Result<(), LichessError> {
        if self.is_closed() {
            return Err(LichessError::Closed);
        }
        Ok(())
    }

    async fn record(&self, call: LichessCall) -> Result<(), LichessError> {
        self.ensure_open()?;
        let (delay, failure) = {
            let mut state = self.lock();
            let index = state.calls.len();
            state.calls.push(call);
            let failure = state
                .failures
                .pop_front()
                .or_else(|| state.scheduled.remove(&index));
            (state.delay, failure)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LichessClient for MockLichessClient {
    async fn stream_incoming_events(&self) -> Result<LichessStream, LichessError> {
        self.ensure_open()?;
        let mut state = self.lock();
        state.calls.push(LichessCall::StreamEvents);
        Ok(state.events.open())
    }

    async fn stream_game_state(&self, game: &GameRef) -> Result<LichessStream, LichessError> {
        self.ensure_open()?;
        let mut state = self.lock();
        state
            .calls
            .push(LichessCall::StreamGame(game.as_str().to_string()));
        Ok(state
            .boards
            .entry(game.as_str().to_string())
            .or_default()
            .open())
    }

    async fn account(&self) -> Result<Account, LichessError> {
        self.record(LichessCall::Account).await?;
        Ok(self.lock().account.clone())
    }

    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, LichessError> {
        self.record(LichessCall::OngoingGames).await?;
        Ok(self.lock().ongoing.clone())
    }

    async fn seek(&self, request: SeekRequest) -> Result<(), LichessError> {
        self.record(LichessCall::Seek(request)).await
    }

    async fn make_move(&self, game: &GameRef, uci: &str) -> Result<(), LichessError> {
        self.record(LichessCall::MakeMove {
            game: game.as_str().to_string(),
            uci: uci.to_string(),
        })
        .await
    }

    async fn resign(&self, game: &GameRef) -> Result<(), LichessError> {
        self.record(LichessCall::Resign(game.as_str().to_string()))
            .await
    }

    async fn abort_game(&self, game: &GameRef) -> Result<(), LichessError> {
        self.record(LichessCall::AbortGame(game.as_str().to_string()))
            .await
    }

    async fn claim_victory(&self, game: &GameRef) -> Result<(), LichessError> {
        self.record(LichessCall::ClaimVictory(game.as_str().to_string()))
            .await
    }

    async fn handle_draw_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError> {
        self.record(LichessCall::DrawOffer {
            game: game.as_str().to_string(),
            accept,
        })
        .await
    }

    async fn handle_takeback_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError> {
        self.record(LichessCall::TakebackOffer {
            game: game.as_str().to_string(),
            accept,
        })
        .await
    }

    async fn post_message(&self, game: &GameRef, room: ChatRoom, text: &str) -> Result<(), LichessError> {
        self.record(LichessCall::PostMessage {
            game: game.as_str().to_string(),
            room,
            text: text.to_string(),
        })
        .await
    }

    async fn create_challenge(&self, request: ChallengeRequest) -> Result<ChallengeCreated, LichessError> {
        self.record(LichessCall::CreateChallenge(request)).await?;
        Ok(self.lock().challenge.clone())
    }

    async fn create_ai_challenge(&self, request: AiChallengeRequest) -> Result<ChallengeCreated, LichessError> {
        self.record(LichessCall::CreateAiChallenge(request)).await?;
        Ok(self.lock().challenge.clone())
    }

    async fn accept_challenge(&self, challenge_id: &str) -> Result<(), LichessError> {
        self.record(LichessCall::AcceptChallenge(challenge_id.to_string()))
            .await
    }

    async fn arena_tournaments(&self) -> Result<ArenaTournaments, LichessError> {
        self.record(LichessCall::ArenaTournaments).await?;
        Ok(self.lock().tournaments.clone())
    }

    async fn join_arena(&self, tournament_id: &str, pair_immediately: bool) -> Result<(), LichessError> {
        self.record(LichessCall::JoinArena {
            id: tournament_id.to_string(),
            pair_immediately,
        })
        .await
    }

    async fn withdraw_arena(&self, tournament_id: &str) -> Result<(), LichessError> {
        self.record(LichessCall::WithdrawArena(tournament_id.to_string()))
            .await
    }

    fn close(&self) -> Result<(), LichessError> {
        self.closed.store(true, Ordering::Release);
        match self.lock().close_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Factory handing out one scripted client per credential.
#[derive(Clone, Default)]
pub struct MockClientFactory {
    clients: Arc<Mutex<HashMap<String, MockLichessClient>>>,
    connects: Arc<AtomicUsize>,
    refuse: Arc<Mutex<Option<LichessError>>>,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The scripted client behind `credential` (created on first use).
    pub fn client_for(&self, credential: &Credential) -> MockLichessClient {
        self.clients
            .lock()
            .expect("factory lock poisoned")
            .entry(credential.expose().to_string())
            .or_default()
            .clone()
    }

    /// Registers a pre-scripted client for `credential`.
    pub fn register(&self, credential: &Credential, client: MockLichessClient) {
        self.clients
            .lock()
            .expect("factory lock poisoned")
            .insert(credential.expose().to_string(), client);
    }

    /// Makes every later `connect` fail.
    pub fn refuse_connections(&self, error: LichessError) {
        *self.refuse.lock().expect("factory lock poisoned") = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ClientFactory for MockClientFactory {
    fn connect(&self, credential: &Credential) -> Result<ClientHandle, LichessError> {
        if let Some(error) = self.refuse.lock().expect("factory lock poisoned").clone() {
            return Err(error);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.client_for(credential).session()))
    }
}
