//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the worker core to external systems:
//! - `lichess` - Lichess Board API over HTTP, plus a scriptable mock
//! - `publishing` - Output sinks (line-oriented writer, in-memory capture)

pub mod lichess;
pub mod publishing;

pub use lichess::{HttpClientFactory, MockClientFactory, MockLichessClient};
pub use publishing::{InMemoryPublisher, LinePublisher};
