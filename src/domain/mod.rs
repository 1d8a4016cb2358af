//! Domain layer: value types and message decoding, free of I/O.

pub mod api_request;
pub mod display;
pub mod session;
pub mod stream_event;

pub use api_request::{ApiRequest, CreateGame, JoinByName, Opponent, PendingCall, RequestError, Requirement};
pub use session::{Credential, GameRef, Generation, IDLE};
pub use stream_event::StreamEvent;
