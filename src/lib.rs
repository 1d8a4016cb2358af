//! Lichess Board Bridge - connects a physical chessboard to the Lichess Board API.
//!
//! The crate owns one consumer per Lichess push stream (account events, the
//! main player's board, the opponent's board) and a single queue through
//! which all outgoing API calls are serialized. Consumers are restarted or
//! torn down whenever the active credential or game changes, and never keep
//! publishing for a configuration they no longer represent.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod telemetry;
