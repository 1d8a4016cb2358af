//! StreamWorker - owns one consumer of a Lichess push stream.
//!
//! A worker is configured with a client handle, a credential and (for board
//! roles) a game reference. `run()` launches a consumer task bound to the
//! current [`Generation`]; the task republishes stream items until the game
//! ends, the stream closes, a stop is requested, or the worker's live
//! configuration drifts away from the generation it was launched with.
//!
//! ## Cancellation
//!
//! Each launch gets its own `watch` flag. The consumer waits on the flag and
//! the next stream item at the same time, so a stop request unblocks it even
//! when the stream is quiet. If the consumer still does not exit within the
//! join timeout (for example while stuck in a slow publish), board workers
//! post a chat line into the game to force a new item through the stream.
//!
//! ## Staleness
//!
//! Before each item is published the consumer compares its launch generation
//! with the live one while holding the worker lock, so a reconfiguration can
//! never slip between the check and the publish.
//!
//! Every launch is numbered under the same lock. A consumer that exits after
//! a newer launch (possibly for the same generation) neither publishes its end
//! marker nor clears the newer consumer's announcement.

use futures::StreamExt;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkersConfig;
use crate::domain::display;
use crate::domain::{Credential, GameRef, Generation, StreamEvent};
use crate::ports::{ChatRoom, ClientHandle, LichessError, LichessStream, ResponsePublisher};

/// Marker type published when the main board stream ends.
pub const MAIN_STREAM_ENDED: &str = "streamBoardResponse";
/// Marker type published when the opponent board stream ends.
pub const OPPONENT_STREAM_ENDED: &str = "streamBoardResponseOpponent";

/// Which stream a worker consumes and what it forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Board stream of the main player; items are published.
    MainBoard,
    /// Board stream of the opponent credential; only the end marker is published.
    OpponentBoard,
    /// Account-event stream of the main player.
    Events,
}

impl StreamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamRole::MainBoard => "main",
            StreamRole::OpponentBoard => "opponent",
            StreamRole::Events => "event",
        }
    }

    pub fn is_board(&self) -> bool {
        !matches!(self, StreamRole::Events)
    }

    fn end_marker(&self) -> Option<&'static str> {
        match self {
            StreamRole::MainBoard => Some(MAIN_STREAM_ENDED),
            StreamRole::OpponentBoard => Some(OPPONENT_STREAM_ENDED),
            StreamRole::Events => None,
        }
    }

    /// The display payload for an item, or `None` if this role does not forward it.
    fn reduce(&self, game: &GameRef, raw: &Value, event: &StreamEvent) -> Option<Value> {
        match self {
            StreamRole::MainBoard => Some(display::reduce_board(game, raw, event)),
            StreamRole::OpponentBoard => None,
            StreamRole::Events => display::reduce_event(raw, event),
        }
    }

    fn ends_stream(&self, event: &StreamEvent) -> bool {
        self.is_board() && event.ends_game()
    }
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing of [`StreamWorker::stop`].
#[derive(Debug, Clone)]
pub struct StreamWorkerConfig {
    /// How long to wait for the consumer after setting the cancellation flag.
    pub join_timeout: Duration,
    /// How long to wait after the provoke call.
    pub provoke_timeout: Duration,
}

impl Default for StreamWorkerConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
            provoke_timeout: Duration::from_secs(1),
        }
    }
}

impl StreamWorkerConfig {
    /// Board-worker timing from the application config.
    pub fn board(config: &WorkersConfig) -> Self {
        Self {
            join_timeout: config.stream_join_timeout(),
            provoke_timeout: config.provoke_timeout(),
        }
    }

    /// Event-worker timing from the application config.
    pub fn events(config: &WorkersConfig) -> Self {
        Self {
            join_timeout: config.event_join_timeout(),
            provoke_timeout: config.provoke_timeout(),
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_provoke_timeout(mut self, timeout: Duration) -> Self {
        self.provoke_timeout = timeout;
        self
    }
}

/// Configuration the consumer is checked against.
#[derive(Default)]
struct LiveState {
    client: Option<ClientHandle>,
    credential: Credential,
    game: GameRef,
    /// Number of the latest launch.
    launch: u64,
}

impl LiveState {
    fn generation(&self, role: StreamRole) -> Generation {
        match role {
            StreamRole::Events => Generation::for_events(self.credential.clone()),
            _ => Generation::new(self.credential.clone(), self.game.clone()),
        }
    }
}

/// Generation announced by the consumer of one launch.
#[derive(Debug, Clone)]
struct Announcement {
    launch: u64,
    generation: Generation,
}

impl Announcement {
    fn idle() -> Self {
        Self {
            launch: 0,
            generation: Generation::idle(),
        }
    }
}

/// Why a consumer task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Cancelled,
    OpenFailed,
    Closed,
    Failed,
    GameOver,
    GenerationChanged,
}

/// A launched consumer.
struct Consumer {
    generation: Generation,
    client: ClientHandle,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<Exit>,
}

impl Consumer {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Owns at most one consumer of one push stream.
pub struct StreamWorker {
    role: StreamRole,
    config: StreamWorkerConfig,
    publisher: Option<Arc<dyn ResponsePublisher>>,
    live: Arc<Mutex<LiveState>>,
    announced: Arc<watch::Sender<Announcement>>,
    consumer: StdMutex<Option<Consumer>>,
}

impl StreamWorker {
    pub fn new(role: StreamRole, config: StreamWorkerConfig) -> Self {
        let (announced, _) = watch::channel(Announcement::idle());
        Self {
            role,
            config,
            publisher: None,
            live: Arc::new(Mutex::new(LiveState::default())),
            announced: Arc::new(announced),
            consumer: StdMutex::new(None),
        }
    }

    /// Registers the sink for stream items and end markers.
    pub fn with_publisher(mut self, publisher: Arc<dyn ResponsePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Installs the client to read from.
    ///
    /// A different credential stops the running consumer before it is recorded.
    /// Does not start a new consumer.
    pub async fn update_client(&self, client: Option<ClientHandle>, credential: Credential) {
        {
            let mut live = self.live.lock().await;
            live.client = client;
            if live.credential == credential {
                return;
            }
        }

        self.stop().await;

        let mut live = self.live.lock().await;
        info!(role = %self.role, from = %live.credential, to = %credential, "Credential updated");
        live.credential = credential;
    }

    /// Records the game to stream. A different game stops a running board consumer first.
    ///
    /// The event worker only records the value; its generation ignores it.
    pub async fn update_game_ref(&self, game: GameRef) {
        {
            let live = self.live.lock().await;
            if live.game == game {
                return;
            }
        }

        if self.role.is_board() {
            self.stop().await;
        }

        let mut live = self.live.lock().await;
        info!(role = %self.role, from = %live.game, to = %game, "Game updated");
        live.game = game;
    }

    /// Launches a consumer for the current generation.
    ///
    /// No-op without a credential (or, for board roles, without a game), and
    /// when a consumer for the same generation is already running.
    pub async fn run(&self) {
        let mut live = self.live.lock().await;
        let generation = live.generation(self.role);
        let client = live.client.clone();

        if generation.credential.is_idle() || (self.role.is_board() && generation.game.is_idle()) {
            debug!(role = %self.role, generation = %generation, "Nothing to stream");
            return;
        }

        let Some(client) = client else {
            warn!(role = %self.role, generation = %generation, "No client installed, not starting");
            return;
        };

        let mut slot = self.consumer_slot();
        if let Some(current) = slot.as_ref() {
            if current.is_running() && !current.is_cancelled() && current.generation == generation {
                debug!(role = %self.role, generation = %generation, "Already running");
                return;
            }
        }
        if let Some(previous) = slot.take() {
            previous.cancel.send_replace(true);
        }

        live.launch += 1;
        let (cancel, cancel_rx) = watch::channel(false);
        let task = ConsumerTask {
            role: self.role,
            launch: live.launch,
            generation: generation.clone(),
            client: client.clone(),
            publisher: self.publisher.clone(),
            live: self.live.clone(),
            announced: self.announced.clone(),
        };
        info!(role = %self.role, generation = %generation, launch = live.launch, "Starting stream consumer");
        let handle = tokio::spawn(task.run(cancel_rx));

        *slot = Some(Consumer {
            generation,
            client,
            cancel,
            handle,
        });
    }

    /// Requests the consumer to stop and waits for it (bounded).
    ///
    /// Never fails: a consumer that outlives the timeouts is logged and left
    /// to exit on its own once it notices the cancellation flag.
    pub async fn stop(&self) {
        let Some(mut consumer) = self.consumer_slot().take() else {
            return;
        };
        if !consumer.is_running() {
            return;
        }

        info!(role = %self.role, generation = %consumer.generation, "Stopping stream consumer");
        consumer.cancel.send_replace(true);

        if tokio::time::timeout(self.config.join_timeout, &mut consumer.handle)
            .await
            .is_ok()
        {
            info!(role = %self.role, "Stream consumer stopped");
            return;
        }

        warn!(role = %self.role, generation = %consumer.generation, "Stream consumer did not stop in time");
        self.provoke(&consumer).await;

        if tokio::time::timeout(self.config.provoke_timeout, &mut consumer.handle)
            .await
            .is_ok()
        {
            info!(role = %self.role, "Stream consumer stopped after provoke");
            return;
        }

        warn!(role = %self.role, generation = %consumer.generation, "Stream consumer is still running");
        let mut slot = self.consumer_slot();
        if slot.is_none() {
            *slot = Some(consumer);
        }
    }

    /// Returns true while a consumer task exists and has not finished.
    pub fn is_alive(&self) -> bool {
        self.consumer_slot()
            .as_ref()
            .map_or(false, Consumer::is_running)
    }

    /// The generation the consumer announced when it started reading, or idle.
    pub fn announced_generation(&self) -> Generation {
        self.announced.borrow().generation.clone()
    }

    /// The live `(credential, game)` pair.
    pub async fn generation(&self) -> Generation {
        self.live.lock().await.generation(self.role)
    }

    /// Posts a chat line into the game to push a fresh item through the stream.
    async fn provoke(&self, consumer: &Consumer) {
        if !self.role.is_board() {
            return;
        }
        let game = &consumer.generation.game;
        let text = format!("Event on {} board-stream: {}", self.role, game);
        match consumer
            .client
            .post_message(game, ChatRoom::Player, &text)
            .await
        {
            Ok(()) => debug!(role = %self.role, game = %game, "Provoke message posted"),
            Err(e) => warn!(role = %self.role, game = %game, error = %e, "Provoke message failed"),
        }
    }

    fn consumer_slot(&self) -> MutexGuard<'_, Option<Consumer>> {
        self.consumer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a consumer task owns.
struct ConsumerTask {
    role: StreamRole,
    launch: u64,
    generation: Generation,
    client: ClientHandle,
    publisher: Option<Arc<dyn ResponsePublisher>>,
    live: Arc<Mutex<LiveState>>,
    announced: Arc<watch::Sender<Announcement>>,
}

impl ConsumerTask {
    async fn run(self, mut cancel: watch::Receiver<bool>) -> Exit {
        self.announce();

        let opened = tokio::select! {
            biased;
            _ = cancel.changed() => None,
            stream = self.open() => Some(stream),
        };

        let exit = match opened {
            Some(Ok(stream)) => {
                info!(role = %self.role, generation = %self.generation, "Stream opened");
                self.consume(stream, &mut cancel).await
            }
            Some(Err(e)) => {
                error!(role = %self.role, generation = %self.generation, error = %e, "Failed to open stream");
                Exit::OpenFailed
            }
            None => {
                debug!(role = %self.role, "Cancelled before the stream opened");
                Exit::Cancelled
            }
        };

        if let Some(marker) = self.role.end_marker() {
            let live = self.live.lock().await;
            if live.launch == self.launch {
                self.publish(display::stream_ended(marker)).await;
            } else {
                debug!(role = %self.role, launch = self.launch, latest = live.launch, "Superseded, skipping end marker");
            }
        }
        info!(role = %self.role, generation = %self.generation, ?exit, "Stream consumer terminated");
        self.announced.send_if_modified(|announced| {
            if announced.launch != self.launch {
                return false;
            }
            announced.generation = Generation::idle();
            true
        });
        exit
    }

    /// Announces this launch unless a newer one already did.
    fn announce(&self) {
        self.announced.send_if_modified(|announced| {
            if announced.launch > self.launch {
                return false;
            }
            *announced = Announcement {
                launch: self.launch,
                generation: self.generation.clone(),
            };
            true
        });
    }

    async fn open(&self) -> Result<LichessStream, LichessError> {
        match self.role {
            StreamRole::Events => self.client.stream_incoming_events().await,
            _ => self.client.stream_game_state(&self.generation.game).await,
        }
    }

    async fn consume(&self, mut stream: LichessStream, cancel: &mut watch::Receiver<bool>) -> Exit {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.changed() => {
                    info!(role = %self.role, generation = %self.generation, "Stop requested");
                    return Exit::Cancelled;
                }
                frame = stream.next() => frame,
            };

            let item = match frame {
                None => {
                    info!(role = %self.role, generation = %self.generation, "Stream closed by server");
                    return Exit::Closed;
                }
                // The decoder resumes at the next line.
                Some(Err(LichessError::Parse(message))) => {
                    warn!(role = %self.role, generation = %self.generation, error = %message, "Skipping undecodable stream line");
                    continue;
                }
                Some(Err(e)) => {
                    error!(role = %self.role, generation = %self.generation, error = %e, "Stream failed");
                    return Exit::Failed;
                }
                Some(Ok(item)) => item,
            };

            // Held until the item is published so a reconfiguration waits for it.
            let live = self.live.lock().await;
            if *cancel.borrow() {
                info!(role = %self.role, generation = %self.generation, "Stop requested");
                return Exit::Cancelled;
            }
            let current = live.generation(self.role);
            if current != self.generation {
                info!(role = %self.role, launched = %self.generation, live = %current, "Generation changed, terminating stream");
                return Exit::GenerationChanged;
            }

            let Some(item) = item else {
                continue;
            };
            let event = StreamEvent::from_value(&item);
            if let Some(payload) = self.role.reduce(&self.generation.game, &item, &event) {
                debug!(role = %self.role, kind = event.kind(), "Forwarding stream item");
                self.publish(payload).await;
            }
            drop(live);

            if self.role.ends_stream(&event) {
                info!(role = %self.role, generation = %self.generation, kind = event.kind(), "Game over, terminating stream");
                return Exit::GameOver;
            }
        }
    }

    async fn publish(&self, payload: Value) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(e) = publisher.publish(payload.to_string()).await {
            warn!(role = %self.role, error = %e, "Failed to publish stream item");
        }
    }
}
