//! Lichess adapters: the reqwest client, its NDJSON decoder and a scriptable mock.

mod http_client;
mod mock;
mod ndjson;

pub use http_client::{HttpClientFactory, HttpLichessClient};
pub use mock::{LichessCall, MockClientFactory, MockLichessClient};
pub use ndjson::NdjsonDecoder;
