//! Incremental NDJSON decoding for Lichess push streams.
//!
//! Network chunks do not respect line boundaries, so partial lines are
//! buffered until their newline arrives. Blank lines are keep-alives and
//! decode to `None`.

use serde_json::Value;

use crate::ports::{LichessError, StreamFrame};

#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every complete line it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<StreamFrame, LichessError>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            frames.push(decode_line(&line[..pos]));
        }
        frames
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(line: &[u8]) -> Result<StreamFrame, LichessError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Value>(text)
        .map(Some)
        .map_err(|e| LichessError::parse(format!("invalid stream line: {}", e)))
}
