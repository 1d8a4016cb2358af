//! Application layer - the session pool, the workers and their orchestration.
//!
//! - `SessionPool` - one authenticated client per logical slot
//! - `StreamWorker` - one consumer of one Lichess push stream
//! - `CallWorker` - serialized execution of API requests
//! - `BoardBridge` - applies control events to all of the above

pub mod api_calls;
pub mod bridge;
pub mod call_worker;
pub mod control;
pub mod session_pool;
pub mod stream_worker;

pub use api_calls::{ApiCallError, ApiCallHandler, CallContext};
pub use bridge::{BoardBridge, BridgeError};
pub use call_worker::{CallWorker, CallWorkerConfig, EnqueueError};
pub use control::{BoardStatus, ControlError, ControlEvent};
pub use session_pool::{SessionPool, SessionSlot};
pub use stream_worker::{
    StreamRole, StreamWorker, StreamWorkerConfig, MAIN_STREAM_ENDED, OPPONENT_STREAM_ENDED,
};
