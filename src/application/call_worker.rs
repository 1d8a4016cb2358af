//! CallWorker - serializes outgoing Lichess API calls through one queue.
//!
//! Callers enqueue raw request JSON and return immediately; a single
//! consumer task decodes and executes requests in arrival order, so at most
//! one API call is in flight at a time. A failing request is logged and the
//! loop moves on to the next one.
//!
//! The queue outlives individual runs: requests left unprocessed by a stop
//! are picked up by the next `run()`. Termination sentinels are tagged with
//! the run they target, so a sentinel left over from an earlier stop never
//! ends a later run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::api_calls::{ApiCallError, ApiCallHandler, CallContext};
use crate::config::WorkersConfig;
use crate::domain::{Credential, GameRef, PendingCall, IDLE};
use crate::ports::{ClientHandle, ResponsePublisher};

/// Payloads that never carry a request.
const REJECTED_PAYLOADS: [&str; 4] = ["", IDLE, "unknown", "unavailable"];

/// Errors returned by [`CallWorker::enqueue`].
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EnqueueError {
    #[error("request payload rejected: {0:?}")]
    Rejected(String),

    #[error("call queue closed")]
    Closed,
}

/// Timing of the call worker.
#[derive(Debug, Clone)]
pub struct CallWorkerConfig {
    /// How long `stop()` waits for the consumer.
    pub join_timeout: Duration,
    /// Timed receive of the queue.
    pub poll_interval: Duration,
}

impl Default for CallWorkerConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl From<&WorkersConfig> for CallWorkerConfig {
    fn from(config: &WorkersConfig) -> Self {
        Self {
            join_timeout: config.call_join_timeout(),
            poll_interval: config.call_poll_interval(),
        }
    }
}

impl CallWorkerConfig {
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug)]
enum CallMessage {
    Request(String),
    /// Ends the run with this number.
    Terminate(u64),
}

struct RunningLoop {
    run: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningLoop {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns the call queue and its consumer task.
pub struct CallWorker {
    config: CallWorkerConfig,
    handler: ApiCallHandler,
    context: Arc<Mutex<CallContext>>,
    sender: mpsc::UnboundedSender<CallMessage>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<CallMessage>>>,
    runs: AtomicU64,
    running: StdMutex<Option<RunningLoop>>,
}

impl CallWorker {
    pub fn new(config: CallWorkerConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            config,
            handler: ApiCallHandler::default(),
            context: Arc::new(Mutex::new(CallContext::default())),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            runs: AtomicU64::new(0),
            running: StdMutex::new(None),
        }
    }

    /// Registers the sink for request responses.
    pub fn with_publisher(mut self, publisher: Arc<dyn ResponsePublisher>) -> Self {
        self.handler = ApiCallHandler::new(Some(publisher));
        self
    }

    /// Appends a raw request to the queue. Never blocks.
    pub fn enqueue(&self, raw: impl Into<String>) -> Result<(), EnqueueError> {
        let raw = raw.into();
        if REJECTED_PAYLOADS.contains(&raw.trim()) {
            warn!(payload = %raw, "Rejected API call payload");
            return Err(EnqueueError::Rejected(raw));
        }
        self.sender
            .send(CallMessage::Request(raw))
            .map_err(|_| EnqueueError::Closed)
    }

    /// Queues a sentinel that ends the current run once everything queued
    /// before it has been executed.
    pub fn terminate_after_queued(&self) {
        let Some(run) = self.slot().as_ref().map(|r| r.run) else {
            return;
        };
        let _ = self.sender.send(CallMessage::Terminate(run));
    }

    pub async fn update_main(&self, client: Option<ClientHandle>, credential: Credential) {
        let mut context = self.context.lock().await;
        context.main = client;
        context.main_credential = credential;
    }

    pub async fn update_opponent(&self, client: Option<ClientHandle>, credential: Credential) {
        let mut context = self.context.lock().await;
        context.opponent = client;
        context.opponent_credential = credential;
    }

    pub async fn update_game_ref(&self, game: GameRef) {
        self.context.lock().await.game = game;
    }

    /// Starts the consumer unless one is already running.
    pub fn run(&self) {
        let mut slot = self.slot();
        if let Some(current) = slot.as_ref() {
            if current.is_running() && !*current.cancel.borrow() {
                debug!(run = current.run, "Call worker already running");
                return;
            }
        }

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let (cancel, cancel_rx) = watch::channel(false);
        let consumer = CallLoop {
            run,
            poll_interval: self.config.poll_interval,
            handler: self.handler.clone(),
            context: self.context.clone(),
            receiver: self.receiver.clone(),
        };
        info!(run, "Starting call worker");
        let handle = tokio::spawn(consumer.run(cancel_rx));

        *slot = Some(RunningLoop {
            run,
            cancel,
            handle,
        });
    }

    /// Sends the sentinel, sets the cancellation flag and waits for the
    /// consumer (bounded). Never fails.
    pub async fn stop(&self) {
        let Some(mut running) = self.slot().take() else {
            return;
        };
        if !running.is_running() {
            return;
        }

        info!(run = running.run, "Stopping call worker");
        let _ = self.sender.send(CallMessage::Terminate(running.run));
        running.cancel.send_replace(true);

        if tokio::time::timeout(self.config.join_timeout, &mut running.handle)
            .await
            .is_ok()
        {
            info!(run = running.run, "Call worker stopped");
            return;
        }

        warn!(run = running.run, "Call worker did not stop in time");
        let mut slot = self.slot();
        if slot.is_none() {
            *slot = Some(running);
        }
    }

    pub fn is_alive(&self) -> bool {
        self.slot().as_ref().map_or(false, RunningLoop::is_running)
    }

    fn slot(&self) -> MutexGuard<'_, Option<RunningLoop>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The consumer task.
struct CallLoop {
    run: u64,
    poll_interval: Duration,
    handler: ApiCallHandler,
    context: Arc<Mutex<CallContext>>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<CallMessage>>>,
}

impl CallLoop {
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        // A straggling earlier run may still own the queue.
        let mut receiver = tokio::select! {
            biased;
            _ = cancel.changed() => return,
            receiver = self.receiver.clone().lock_owned() => receiver,
        };
        info!(run = self.run, "Call worker loop started");

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.changed() => break,
                received = tokio::time::timeout(self.poll_interval, receiver.recv()) => received,
            };

            let message = match received {
                Err(_) => {
                    if *cancel.borrow() {
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(message)) => message,
            };

            match message {
                CallMessage::Terminate(run) if run == self.run => {
                    debug!(run, "Termination sentinel received");
                    break;
                }
                CallMessage::Terminate(run) => {
                    debug!(run, current = self.run, "Ignoring sentinel of an earlier run");
                }
                CallMessage::Request(raw) => {
                    let interrupted = tokio::select! {
                        biased;
                        _ = cancel.changed() => true,
                        _ = self.execute(&raw) => false,
                    };
                    if interrupted {
                        warn!(run = self.run, "API call interrupted by stop");
                        break;
                    }
                }
            }
        }

        info!(run = self.run, "Call worker loop terminated");
    }

    async fn execute(&self, raw: &str) {
        let call = match PendingCall::parse(raw) {
            Ok(call) => call,
            Err(e) => {
                warn!(error = %e, payload = %raw, "Dropping malformed API call");
                return;
            }
        };

        let context = self.context.lock().await.clone();
        info!(request_type = %call.request_type, "Executing API call");
        match self.handler.handle(&context, &call).await {
            Ok(()) => debug!(request_type = %call.request_type, "API call completed"),
            Err(e @ (ApiCallError::RequirementsNotMet { .. } | ApiCallError::Unsupported { .. })) => {
                warn!(request_type = %call.request_type, reason = %e, "API call could not be performed");
            }
            Err(e) => {
                error!(request_type = %call.request_type, error = %e, "API call failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::lichess::{LichessCall, MockLichessClient};
    use crate::adapters::publishing::InMemoryPublisher;
    use crate::ports::LichessError;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast() -> CallWorkerConfig {
        CallWorkerConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_join_timeout(Duration::from_millis(200))
    }

    async fn worker_with_main(main: &MockLichessClient) -> (CallWorker, InMemoryPublisher) {
        let publisher = InMemoryPublisher::new();
        let worker = CallWorker::new(fast()).with_publisher(Arc::new(publisher.clone()));
        worker
            .update_main(Some(Arc::new(main.clone())), Credential::new("tok1"))
            .await;
        worker.update_game_ref(GameRef::new("abcd1234")).await;
        (worker, publisher)
    }

    async fn wait_for_calls(client: &MockLichessClient, count: usize) -> bool {
        tokio::time::timeout(WAIT, async {
            while client.rest_calls().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    #[test]
    fn rejects_sentinel_like_payloads() {
        let worker = CallWorker::new(fast());

        assert_eq!(worker.enqueue(""), Err(EnqueueError::Rejected(String::new())));
        assert_eq!(worker.enqueue("idle"), Err(EnqueueError::Rejected("idle".into())));
        assert!(worker.enqueue("unavailable").is_err());
        assert!(worker.enqueue(r#"{"type":"resign"}"#).is_ok());
    }

    #[tokio::test]
    async fn dispatches_in_fifo_order_despite_failure() {
        let main = MockLichessClient::new();
        main.fail_call(1, LichessError::api(400, "Not your turn"));
        let (worker, _) = worker_with_main(&main).await;

        worker.enqueue(r#"{"type":"makeMove","move":"e2e4"}"#).unwrap();
        worker.enqueue(r#"{"type":"makeMove","move":"d2d4"}"#).unwrap();
        worker.enqueue(r#"{"type":"makeMove","move":"g1f3"}"#).unwrap();
        worker.run();

        assert!(wait_for_calls(&main, 3).await);
        let moves: Vec<String> = main
            .rest_calls()
            .into_iter()
            .filter_map(|c| match c {
                LichessCall::MakeMove { uci, .. } => Some(uci),
                _ => None,
            })
            .collect();
        assert_eq!(moves, vec!["e2e4", "d2d4", "g1f3"]);
        assert!(worker.is_alive());
        worker.stop().await;
    }

    #[tokio::test]
    async fn malformed_request_does_not_stop_loop() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;
        worker.run();

        worker.enqueue("{not json").unwrap();
        worker.enqueue(r#"{"type":"resign"}"#).unwrap();

        assert!(wait_for_calls(&main, 1).await);
        assert_eq!(main.rest_calls(), vec![LichessCall::Resign("abcd1234".into())]);
        worker.stop().await;
    }

    #[tokio::test]
    async fn unmet_requirements_skip_request() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;
        worker.run();

        // no opponent configured
        worker.enqueue(r#"{"type":"resignOpponent"}"#).unwrap();
        worker.enqueue(r#"{"type":"claim-victory"}"#).unwrap();

        assert!(wait_for_calls(&main, 1).await);
        assert_eq!(main.rest_calls(), vec![LichessCall::ClaimVictory("abcd1234".into())]);
        worker.stop().await;
    }

    #[tokio::test]
    async fn sentinel_ends_run_after_queued_requests() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;
        worker.run();

        worker.enqueue(r#"{"type":"abort"}"#).unwrap();
        worker.terminate_after_queued();
        worker.enqueue(r#"{"type":"resign"}"#).unwrap();

        let stopped = tokio::time::timeout(WAIT, async {
            while worker.is_alive() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(stopped.is_ok());
        assert_eq!(main.rest_calls(), vec![LichessCall::AbortGame("abcd1234".into())]);

        // the request behind the sentinel survives for the next run
        worker.run();
        assert!(wait_for_calls(&main, 2).await);
        assert_eq!(main.rest_calls()[1], LichessCall::Resign("abcd1234".into()));
        worker.stop().await;
    }

    #[tokio::test]
    async fn stale_sentinel_does_not_end_next_run() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;
        worker.run();
        worker.stop().await;
        assert!(!worker.is_alive());

        worker.run();
        worker.enqueue(r#"{"type":"resign"}"#).unwrap();

        assert!(wait_for_calls(&main, 1).await);
        assert!(worker.is_alive());
        worker.stop().await;
        assert!(!worker.is_alive());
    }

    #[tokio::test]
    async fn run_twice_keeps_one_loop() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;

        worker.run();
        worker.run();
        worker.enqueue(r#"{"type":"resign"}"#).unwrap();

        assert!(wait_for_calls(&main, 1).await);
        assert_eq!(worker.runs.load(Ordering::SeqCst), 1);
        worker.stop().await;
    }

    #[tokio::test]
    async fn stop_interrupts_long_call() {
        let main = MockLichessClient::new().with_delay(Duration::from_secs(30));
        let (worker, _) = worker_with_main(&main).await;
        worker.run();
        worker.enqueue(r#"{"type":"createGame","opponentname":"random"}"#).unwrap();
        assert!(wait_for_calls(&main, 1).await);

        worker.stop().await;

        assert!(!worker.is_alive());
    }

    #[tokio::test]
    async fn responses_are_published() {
        let main = MockLichessClient::new();
        let (worker, publisher) = worker_with_main(&main).await;
        worker.run();

        worker.enqueue(r#"{"type":"getAccountInfoMain"}"#).unwrap();

        assert!(publisher.wait_for(WAIT, |v| v["type"] == "accountInfoMain").await);
        worker.stop().await;
    }

    #[tokio::test]
    async fn game_change_applies_to_later_requests() {
        let main = MockLichessClient::new();
        let (worker, _) = worker_with_main(&main).await;
        worker.run();

        worker.update_game_ref(GameRef::new("efgh5678")).await;
        worker.enqueue(r#"{"type":"resign"}"#).unwrap();

        assert!(wait_for_calls(&main, 1).await);
        assert_eq!(main.rest_calls(), vec![LichessCall::Resign("efgh5678".into())]);
        worker.stop().await;
    }
}
