//! ApiCallHandler - executes one decoded request against the Lichess clients.
//!
//! The handler is stateless: the call worker hands it a [`CallContext`]
//! snapshot of the clients and game it holds, and the handler checks the
//! request's requirement class against that snapshot before dispatching.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{
    ApiRequest, CreateGame, Credential, GameRef, JoinByName, Opponent, PendingCall, Requirement,
};
use crate::ports::{
    AiChallengeRequest, ArenaTournament, ArenaTournaments, ChallengeCreated, ChallengeRequest,
    ChatRoom, ClientHandle, LichessError, PublishError, ResponsePublisher, SeekRequest,
    GAME_ID_LEN,
};

const OFFICIAL_CREATOR: &str = "lichess";
const ARENA_SYSTEM: &str = "arena";
const NOT_STARTED: &str = "-";
const SEEK_PENDING: &str = "seek";

/// Errors that can occur when executing a request.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ApiCallError {
    /// Required credential, client or game is missing.
    #[error("'{request_type}' could not be performed: requirements not met")]
    RequirementsNotMet { request_type: String },

    #[error("'{request_type}' could not be performed: unsupported request")]
    Unsupported { request_type: String },

    #[error(transparent)]
    Lichess(#[from] LichessError),

    #[error("failed to publish response: {0}")]
    Publish(#[from] PublishError),
}

/// Snapshot of what the call worker holds when a request is dispatched.
#[derive(Clone, Default)]
pub struct CallContext {
    pub main: Option<ClientHandle>,
    pub main_credential: Credential,
    pub opponent: Option<ClientHandle>,
    pub opponent_credential: Credential,
    pub game: GameRef,
}

impl CallContext {
    fn main_client(&self) -> Option<&ClientHandle> {
        self.main
            .as_ref()
            .filter(|_| !self.main_credential.is_idle())
    }

    fn opponent_client(&self) -> Option<&ClientHandle> {
        self.opponent
            .as_ref()
            .filter(|_| !self.opponent_credential.is_idle())
    }

    /// Opponent credential and client are either both set or both absent.
    fn opponent_consistent(&self) -> bool {
        self.opponent_credential.is_idle() == self.opponent.is_none()
    }

    fn has_game(&self) -> bool {
        !self.game.is_idle()
    }

    pub fn satisfies(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Main => self.main_client().is_some(),
            Requirement::MainWithConsistentOpponent => {
                self.main_client().is_some() && self.opponent_consistent()
            }
            Requirement::MainAndGame => self.main_client().is_some() && self.has_game(),
            Requirement::OpponentAndGame => self.opponent_client().is_some() && self.has_game(),
        }
    }
}

/// Executes requests and publishes their responses.
#[derive(Clone, Default)]
pub struct ApiCallHandler {
    publisher: Option<Arc<dyn ResponsePublisher>>,
}

impl ApiCallHandler {
    pub fn new(publisher: Option<Arc<dyn ResponsePublisher>>) -> Self {
        Self { publisher }
    }

    /// Executes `call` if the context satisfies its requirement class.
    ///
    /// Requests that produce a response (account info, game creation,
    /// tournament joins) publish it before returning.
    pub async fn handle(&self, context: &CallContext, call: &PendingCall) -> Result<(), ApiCallError> {
        let Some(requirement) = call.request.requirement() else {
            return Err(ApiCallError::Unsupported {
                request_type: call.request_type.clone(),
            });
        };
        if !context.satisfies(requirement) {
            return Err(ApiCallError::RequirementsNotMet {
                request_type: call.request_type.clone(),
            });
        }

        debug!(request_type = %call.request_type, "Dispatching API call");
        if let Some(response) = self.dispatch(context, call).await? {
            self.publish(response).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, context: &CallContext, call: &PendingCall) -> Result<Option<Value>, ApiCallError> {
        let main = context.main.as_ref();
        let opponent = context.opponent.as_ref();
        let game = &context.game;

        let response = match (&call.request, main, opponent) {
            (ApiRequest::GetAccountInfoMain, Some(main), _) => Some(account_info(main).await?),
            (ApiRequest::AbortRunningGames, Some(main), _) => {
                abort_running_games(main).await?;
                None
            }
            (ApiRequest::WithdrawTournament { id }, Some(main), _) => {
                info!(tournament = %id, "Withdrawing from tournament");
                main.withdraw_arena(id).await?;
                None
            }
            (ApiRequest::JoinTournamentByName(request), Some(main), _) => {
                Some(join_tournament_by_name(main, request, Utc::now()).await?)
            }
            (ApiRequest::JoinTournamentById { id }, Some(main), _) => {
                Some(join_tournament_by_id(main, id).await?)
            }
            (ApiRequest::CreateGame(request), Some(main), _) => {
                Some(create_game(main, opponent, request).await?)
            }
            (ApiRequest::Abort, Some(main), _) => {
                main.abort_game(game).await?;
                None
            }
            (ApiRequest::Resign, Some(main), _) => {
                main.resign(game).await?;
                None
            }
            (ApiRequest::ClaimVictory, Some(main), _) => {
                main.claim_victory(game).await?;
                None
            }
            (ApiRequest::MakeMove { uci }, Some(main), _) => {
                info!(game = %game, uci = %uci, "Move");
                main.make_move(game, uci).await?;
                None
            }
            (ApiRequest::Draw { parameter }, Some(main), _) => {
                main.handle_draw_offer(game, *parameter).await?;
                None
            }
            (ApiRequest::Takeback { parameter }, Some(main), _) => {
                main.handle_takeback_offer(game, *parameter).await?;
                None
            }
            (ApiRequest::WriteChatMessage { text }, Some(main), _) => {
                main.post_message(game, ChatRoom::Player, text).await?;
                None
            }
            (ApiRequest::MakeMoveOpponent { uci }, _, Some(opponent)) => {
                info!(game = %game, uci = %uci, "Opponent move");
                opponent.make_move(game, uci).await?;
                None
            }
            (ApiRequest::ResignOpponent, _, Some(opponent)) => {
                opponent.resign(game).await?;
                None
            }
            (ApiRequest::DrawOpponent { parameter }, _, Some(opponent)) => {
                opponent.handle_draw_offer(game, *parameter).await?;
                None
            }
            _ => {
                return Err(ApiCallError::RequirementsNotMet {
                    request_type: call.request_type.clone(),
                })
            }
        };
        Ok(response)
    }

    async fn publish(&self, response: Value) -> Result<(), PublishError> {
        match &self.publisher {
            Some(publisher) => publisher.publish(response.to_string()).await,
            None => Ok(()),
        }
    }
}

async fn account_info(main: &ClientHandle) -> Result<Value, LichessError> {
    let account = main.account().await?;
    info!(username = %account.username, "Account info");
    Ok(json!({
        "type": "accountInfoMain",
        "name": account.username,
        "blitz": account.rating("blitz"),
        "rapid": account.rating("rapid"),
        "classical": account.rating("classical"),
    }))
}

/// Aborts every ongoing game; a failed abort does not keep the others running.
async fn abort_running_games(main: &ClientHandle) -> Result<(), LichessError> {
    let games = main.ongoing_games().await?;
    info!(count = games.len(), "Aborting running games");
    for ongoing in games {
        let game = GameRef::new(ongoing.game_id);
        if let Err(e) = main.abort_game(&game).await {
            warn!(game = %game, error = %e, "Failed to abort game");
        }
    }
    Ok(())
}

/// The official arena matching the requested name and clock.
fn find_official_arena<'a>(
    tournaments: &'a ArenaTournaments,
    request: &JoinByName,
) -> Option<&'a ArenaTournament> {
    tournaments
        .by_status(&request.tournament_status)
        .iter()
        .find(|t| {
            t.full_name == request.tournament_name
                && t.created_by == OFFICIAL_CREATOR
                && t.system == ARENA_SYSTEM
                && request.limit == Some(t.clock.limit)
                && request.increment == Some(t.clock.increment)
        })
}

/// Minutes until `starts_at`, formatted as `12.50min`.
fn starts_in(starts_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match starts_at {
        Some(start) => {
            let minutes = (start - now).num_milliseconds() as f64 / 60_000.0;
            format!("{:.2}min", minutes)
        }
        None => NOT_STARTED.to_string(),
    }
}

fn tournament_response(kind: &str, id: &str, starts_in: &str, success: bool) -> Value {
    json!({
        "type": kind,
        "id": id,
        "starts_in": starts_in,
        "status": if success { "success" } else { "failed" },
    })
}

async fn join_tournament_by_name(
    main: &ClientHandle,
    request: &JoinByName,
    now: DateTime<Utc>,
) -> Result<Value, LichessError> {
    const KIND: &str = "tournamentJoinedByName";

    let tournaments = main.arena_tournaments().await?;
    let Some(arena) = find_official_arena(&tournaments, request)
        .filter(|t| t.id.len() == GAME_ID_LEN)
    else {
        info!(name = %request.tournament_name, status = %request.tournament_status, "No matching tournament");
        return Ok(tournament_response(KIND, "", NOT_STARTED, false));
    };

    info!(tournament = %arena.id, name = %arena.full_name, "Joining arena tournament");
    main.join_arena(&arena.id, true).await?;
    Ok(tournament_response(
        KIND,
        &arena.id,
        &starts_in(arena.starts_at, now),
        true,
    ))
}

async fn join_tournament_by_id(main: &ClientHandle, id: &str) -> Result<Value, LichessError> {
    const KIND: &str = "tournamentJoinedById";

    if id.len() != GAME_ID_LEN {
        warn!(tournament = %id, "Tournament id has the wrong length");
        return Ok(tournament_response(KIND, id, NOT_STARTED, false));
    }
    info!(tournament = %id, "Joining arena tournament");
    main.join_arena(id, true).await?;
    Ok(tournament_response(KIND, id, NOT_STARTED, true))
}

fn created_game(id: &str, status: &str, error: &str, request_id: &str) -> Value {
    json!({
        "type": "createdGameId",
        "id": id,
        "status": status,
        "error": error,
        "request_id": request_id,
    })
}

fn created_failed(created: &ChallengeCreated, request_id: &str) -> Value {
    let error = created.error.as_deref().unwrap_or("Failed to create game");
    created_game(crate::domain::IDLE, "failed", error, request_id)
}

/// `random`, `white` or `black`; random maps to no preference.
fn color_preference(color: &Option<String>) -> Option<String> {
    color.clone().filter(|c| c != "random")
}

async fn create_game(
    main: &ClientHandle,
    opponent: Option<&ClientHandle>,
    request: &CreateGame,
) -> Result<Value, LichessError> {
    let request_id = request.request_id.as_str();
    let Some(name) = request.opponentname.as_deref().filter(|n| !n.is_empty()) else {
        return Ok(created_game(
            crate::domain::IDLE,
            "error",
            "No opponent name provided",
            request_id,
        ));
    };

    match Opponent::parse(name) {
        Opponent::Random => {
            info!(minutes = request.time_m, increment = request.increment, "Seeking game");
            main.seek(SeekRequest {
                time_minutes: request.time_m,
                increment_secs: request.increment,
                rated: request.rated,
                color: color_preference(&request.color),
            })
            .await?;
            Ok(created_game(SEEK_PENDING, "success", "", request_id))
        }
        Opponent::Ai(level) => {
            info!(level, seconds = request.time_s, increment = request.increment, "Challenging AI");
            let created = main
                .create_ai_challenge(AiChallengeRequest {
                    level,
                    clock_limit_secs: request.time_s,
                    clock_increment_secs: request.increment,
                    color: color_preference(&request.color),
                })
                .await?;
            Ok(match created.game_id() {
                Some(id) => created_game(id, "success", "", request_id),
                None => created_failed(&created, request_id),
            })
        }
        Opponent::Human(username) => {
            info!(opponent = %username, otb = request.is_otb(), "Challenging user");
            let created = main
                .create_challenge(ChallengeRequest {
                    username,
                    rated: request.rated,
                    clock_limit_secs: request.time_s,
                    clock_increment_secs: request.increment,
                    color: color_preference(&request.color),
                })
                .await?;
            let Some(id) = created.game_id() else {
                return Ok(created_failed(&created, request_id));
            };
            if !request.is_otb() {
                // The opponent accepts on their own device.
                return Ok(created_game(SEEK_PENDING, "success", "", request_id));
            }
            match opponent {
                Some(opponent) => opponent.accept_challenge(id).await?,
                None => info!(challenge = %id, "No opponent session, waiting for the challenge to be accepted"),
            }
            Ok(created_game(id, "success", "", request_id))
        }
    }
}
