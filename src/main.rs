//! lichess-board-bridge binary.
//!
//! Reads control messages from stdin, one per line, as `<channel> <payload>`
//! (for example `chessboard/game_id abcd1234`), and writes every published
//! message to stdout as `chessboard/response <json>`.

use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use lichess_board_bridge::adapters::lichess::HttpClientFactory;
use lichess_board_bridge::adapters::publishing::LinePublisher;
use lichess_board_bridge::application::{BoardBridge, ControlEvent};
use lichess_board_bridge::config::AppConfig;
use lichess_board_bridge::telemetry;

const RESPONSE_TOPIC: &str = "chessboard/response";

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = telemetry::init_tracing(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!(base_url = %config.lichess.base_url, "Starting lichess-board-bridge");
    let bridge = BoardBridge::new(
        Arc::new(HttpClientFactory::new(config.lichess.clone())),
        &config.workers,
        Arc::new(LinePublisher::stdout(RESPONSE_TOPIC)),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => apply(&bridge, &line).await,
                Ok(None) => {
                    info!("Control input closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read control input");
                    break;
                }
            },
        }
    }

    bridge.shutdown().await;
    info!("Bridge stopped");
    ExitCode::SUCCESS
}

async fn apply(bridge: &BoardBridge, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (channel, payload) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match ControlEvent::parse(channel, payload) {
        Ok(Some(event)) => {
            debug!(channel = event.channel(), "Control event");
            if let Err(e) = bridge.handle(event).await {
                error!(channel, error = %e, "Failed to apply control event");
            }
        }
        Ok(None) => debug!(channel, "Ignoring placeholder payload"),
        Err(e) => warn!(error = %e, "Dropping control message"),
    }
}
