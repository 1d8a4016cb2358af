//! Response Publisher Port - outbound sink for bridge messages.
//!
//! Each worker is given its own publisher; where the payload ends up
//! (an MQTT topic, a log line, a test buffer) is the adapter's business.

use async_trait::async_trait;

/// Port for publishing one JSON payload.
#[async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, payload: String) -> Result<(), PublishError>;
}

/// Errors that can occur when publishing.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("publisher closed")]
    Closed,
}
