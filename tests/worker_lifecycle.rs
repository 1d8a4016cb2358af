//! Integration tests for stream worker lifecycles.
//!
//! These tests drive `StreamWorker` through reconfigurations with a
//! scriptable Lichess client and verify:
//! 1. At most one consumer runs per generation
//! 2. A reconfiguration stops the old consumer before the new one publishes
//! 3. Items still queued on an old stream are never published
//! 4. Stops that outlive the join timeout fall back to a provoke message

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use lichess_board_bridge::adapters::lichess::{LichessCall, MockLichessClient};
use lichess_board_bridge::adapters::publishing::InMemoryPublisher;
use lichess_board_bridge::application::{
    StreamRole, StreamWorker, StreamWorkerConfig, MAIN_STREAM_ENDED,
};
use lichess_board_bridge::domain::{Credential, GameRef, Generation};
use lichess_board_bridge::ports::ChatRoom;

// =============================================================================
// Test Infrastructure
// =============================================================================

const WAIT: Duration = Duration::from_secs(3);

fn config(join_ms: u64) -> StreamWorkerConfig {
    StreamWorkerConfig::default()
        .with_join_timeout(Duration::from_millis(join_ms))
        .with_provoke_timeout(Duration::from_millis(join_ms))
}

async fn main_worker(
    client: &MockLichessClient,
    publisher: &InMemoryPublisher,
    join_ms: u64,
) -> StreamWorker {
    let worker = StreamWorker::new(StreamRole::MainBoard, config(join_ms))
        .with_publisher(Arc::new(publisher.clone()));
    worker
        .update_client(Some(Arc::new(client.clone())), Credential::new("tok1"))
        .await;
    worker
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

fn generation(token: &str, game: &str) -> Generation {
    Generation::new(Credential::new(token), GameRef::new(game))
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn example_scenario_restart_on_game_change() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = main_worker(&client, &publisher, 500).await;

    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;
    assert!(eventually(|| worker.announced_generation() == generation("tok1", "g1")).await);

    worker.update_game_ref(GameRef::new("g2")).await;
    assert!(!worker.is_alive());
    assert!(worker.announced_generation().is_idle());

    worker.run().await;
    assert!(eventually(|| worker.announced_generation() == generation("tok1", "g2")).await);

    client.push_board("g2", json!({"type": "gameState", "moves": "e2e4", "status": "started"}));
    client.push_board("g2", json!({"type": "gameState", "moves": "e2e4 e7e5", "status": "resign", "winner": "white"}));

    assert!(eventually(|| !worker.is_alive()).await);
    let published = publisher.published_json();
    let types: Vec<&str> = published
        .iter()
        .filter_map(|v| v["type"].as_str())
        .collect();
    // g1 marker, g2 started, g2 resign, g2 marker
    assert_eq!(
        types,
        vec![MAIN_STREAM_ENDED, "gameState", "gameState", MAIN_STREAM_ENDED]
    );
    assert_eq!(published[1]["id"], json!("g2"));
    assert_eq!(published[2]["state"], json!("resign"));
    assert_eq!(published[2]["win"], json!("w"));
    assert!(worker.announced_generation().is_idle());
}

#[tokio::test]
async fn idle_credential_never_starts() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = StreamWorker::new(StreamRole::MainBoard, config(100))
        .with_publisher(Arc::new(publisher.clone()));
    worker
        .update_client(Some(Arc::new(client.clone())), Credential::idle())
        .await;
    worker.update_game_ref(GameRef::new("g1")).await;

    worker.run().await;

    assert!(!worker.is_alive());
    assert_eq!(client.board_stream_opens("g1"), 0);
    assert_eq!(publisher.count(), 0);
}

#[tokio::test]
async fn repeated_run_opens_stream_once() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = main_worker(&client, &publisher, 100).await;
    worker.update_game_ref(GameRef::new("g1")).await;

    for _ in 0..5 {
        worker.run().await;
    }
    assert!(eventually(|| client.board_stream_opens("g1") == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.board_stream_opens("g1"), 1);
    worker.stop().await;
}

#[tokio::test]
async fn server_closed_stream_publishes_marker() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = main_worker(&client, &publisher, 100).await;
    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;
    assert!(eventually(|| client.board_stream_opens("g1") == 1).await);

    client.end_board_stream("g1");

    assert!(publisher.wait_for(WAIT, |v| v["type"] == MAIN_STREAM_ENDED).await);
    assert!(eventually(|| !worker.is_alive()).await);
}

#[tokio::test]
async fn stream_error_ends_consumer() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = main_worker(&client, &publisher, 100).await;
    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;

    client.push_board_error(
        "g1",
        lichess_board_bridge::ports::LichessError::network("connection reset"),
    );

    assert!(eventually(|| !worker.is_alive()).await);
    assert_eq!(publisher.published_types(), vec![MAIN_STREAM_ENDED.to_string()]);
}

// =============================================================================
// Staleness
// =============================================================================

#[tokio::test]
async fn queued_item_of_old_game_is_never_published() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new().with_delay(Duration::from_millis(300));
    let worker = main_worker(&client, &publisher, 50).await;
    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;

    client.push_board("g1", json!({"type": "chatLine", "text": "one"}));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The old consumer outlives the stop while it publishes its end marker.
    worker.update_game_ref(GameRef::new("g2")).await;
    client.push_board("g1", json!({"type": "chatLine", "text": "two"}));

    assert!(eventually(|| !worker.is_alive()).await);
    let texts: Vec<String> = publisher
        .published_json()
        .iter()
        .filter_map(|v| v["text"].as_str().map(str::to_string))
        .collect();
    assert_eq!(texts, vec!["one"]);
    assert_eq!(worker.generation().await, generation("tok1", "g2"));
}

#[tokio::test]
async fn slow_stop_provokes_with_launch_game() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new().with_delay(Duration::from_millis(300));
    let worker = main_worker(&client, &publisher, 50).await;
    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;

    client.push_board("g1", json!({"type": "chatLine", "text": "hello"}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    worker.update_game_ref(GameRef::new("g2")).await;

    let provoked = client.rest_calls().into_iter().any(|call| {
        matches!(
            call,
            LichessCall::PostMessage { ref game, room: ChatRoom::Player, ref text }
                if game == "g1" && text.contains("main board-stream")
        )
    });
    assert!(provoked);

    // the straggler must not block a restart for the new game
    worker.run().await;
    assert!(eventually(|| client.board_stream_opens("g2") == 1).await);
    worker.stop().await;
}

#[tokio::test]
async fn event_worker_survives_game_changes() {
    let client = MockLichessClient::new();
    let publisher = InMemoryPublisher::new();
    let worker = StreamWorker::new(StreamRole::Events, config(100))
        .with_publisher(Arc::new(publisher.clone()));
    worker
        .update_client(Some(Arc::new(client.clone())), Credential::new("tok1"))
        .await;
    worker.run().await;
    assert!(eventually(|| client.event_stream_opens() == 1).await);

    worker.update_game_ref(GameRef::new("g1")).await;
    worker.run().await;

    client.push_event_keep_alive();
    client.push_event(json!({"type": "challenge", "challenge": {"id": "ch000001", "status": "created"}}));
    assert!(publisher.wait_for(WAIT, |v| v["type"] == "challenge").await);
    assert_eq!(client.event_stream_opens(), 1);
    assert!(worker.is_alive());

    worker.stop().await;
    assert!(!worker.is_alive());
}
