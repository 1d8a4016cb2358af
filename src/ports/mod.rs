//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the worker core and the outside world. Adapters implement these ports.
//!
//! - `LichessClient` - Board API access bound to one credential
//! - `ClientFactory` - Opens authenticated clients for the session pool
//! - `ResponsePublisher` - Outbound sink for stream items and call results

mod lichess_client;
mod response_publisher;

pub use lichess_client::{
    Account, AiChallengeRequest, ArenaTournament, ArenaTournaments, ChallengeCreated,
    ChallengeRequest, ChatRoom, ClientFactory, ClientHandle, LichessClient, LichessError,
    LichessStream, OngoingGame, Perf, SeekRequest, StreamFrame, TournamentClock, GAME_ID_LEN,
};
pub use response_publisher::{PublishError, ResponsePublisher};
