//! Line publisher - writes `<topic> <payload>` lines to an async writer.
//!
//! Used by the binary to emit bridge output on stdout, one line per message,
//! where a supervising process can forward each line to its transport.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::ports::{PublishError, ResponsePublisher};

type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Publisher writing newline-delimited messages tagged with a topic.
///
/// Publishers created with [`LinePublisher::with_topic`] share the writer,
/// so lines from different workers never interleave mid-line.
#[derive(Clone)]
pub struct LinePublisher {
    writer: SharedWriter,
    topic: String,
}

impl LinePublisher {
    pub fn new<W>(writer: W, topic: impl Into<String>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            topic: topic.into(),
        }
    }

    pub fn stdout(topic: impl Into<String>) -> Self {
        Self::new(tokio::io::stdout(), topic)
    }

    /// Another publisher on the same writer.
    pub fn with_topic(&self, topic: impl Into<String>) -> Self {
        Self {
            writer: self.writer.clone(),
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl ResponsePublisher for LinePublisher {
    async fn publish(&self, payload: String) -> Result<(), PublishError> {
        let line = format!("{} {}\n", self.topic, payload.replace('\n', " "));
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn writes_topic_tagged_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let board = LinePublisher::new(client, "board/main");
        let calls = board.with_topic("api/response");

        board.publish("{\"a\":1}".to_string()).await.unwrap();
        calls.publish("multi\nline".to_string()).await.unwrap();
        drop(board);
        drop(calls);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "board/main {\"a\":1}\napi/response multi line\n");
    }
}
