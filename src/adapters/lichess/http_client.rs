//! HTTP Lichess client - Implementation of LichessClient over reqwest.
//!
//! # Streaming
//!
//! The account-event and board-state endpoints answer with NDJSON that stays
//! open for the lifetime of the game (or session). The byte stream is cut into
//! lines by [`NdjsonDecoder`] and yielded as [`StreamFrame`]s. These requests
//! carry no timeout; REST calls use the configured request timeout.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::ndjson::NdjsonDecoder;
use crate::config::LichessConfig;
use crate::domain::{Credential, GameRef};
use crate::ports::{
    Account, AiChallengeRequest, ArenaTournaments, ChallengeCreated, ChallengeRequest, ChatRoom,
    ClientFactory, ClientHandle, LichessClient, LichessError, LichessStream, OngoingGame,
    SeekRequest,
};

/// Opens one [`HttpLichessClient`] per credential.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    config: LichessConfig,
}

impl HttpClientFactory {
    pub fn new(config: LichessConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, credential: &Credential) -> Result<ClientHandle, LichessError> {
        let client = HttpLichessClient::new(&self.config, credential)?;
        Ok(Arc::new(client))
    }
}

/// Lichess Board API client bound to one personal access token.
pub struct HttpLichessClient {
    client: Client,
    base_url: String,
    token: Secret<String>,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl HttpLichessClient {
    pub fn new(config: &LichessConfig, credential: &Credential) -> Result<Self, LichessError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| LichessError::network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: Secret::new(credential.expose().to_string()),
            request_timeout: config.request_timeout(),
            closed: AtomicBool::new(false),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_open(&self) -> Result<(), LichessError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LichessError::Closed);
        }
        Ok(())
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.token.expose_secret())
    }

    /// Sends a REST request and checks its status.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, LichessError> {
        self.ensure_open()?;
        let response = self
            .authorized(builder)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await
    }

    async fn post_empty(&self, path: &str) -> Result<(), LichessError> {
        self.send(self.client.post(self.url(path))).await?;
        Ok(())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, LichessError> {
        let response = self.send(self.client.get(self.url(path))).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| LichessError::parse(e.to_string()))
    }

    async fn open_stream(&self, path: &str) -> Result<LichessStream, LichessError> {
        self.ensure_open()?;
        let response = self
            .authorized(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(map_send_error)?;
        let response = check_status(response).await?;

        let stream = response
            .bytes_stream()
            .scan(NdjsonDecoder::new(), |decoder, chunk| {
                let frames = match chunk {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(LichessError::network(format!("Stream error: {}", e)))],
                };
                futures::future::ready(Some(frames))
            })
            .flat_map(stream::iter);

        Ok(Box::pin(stream))
    }

    /// Challenge endpoints answer 400 with `{"error": ..}` when the challenge is refused.
    async fn create(
        &self,
        path: &str,
        form: Vec<(&'static str, String)>,
    ) -> Result<ChallengeCreated, LichessError> {
        self.ensure_open()?;
        let response = self
            .authorized(self.client.post(self.url(path)))
            .timeout(self.request_timeout)
            .form(&form)
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().as_u16() == 400 {
            return response
                .json::<ChallengeCreated>()
                .await
                .map_err(|e| LichessError::parse(e.to_string()));
        }
        let response = check_status(response).await?;
        response
            .json::<ChallengeCreated>()
            .await
            .map_err(|e| LichessError::parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct NowPlaying {
    #[serde(rename = "nowPlaying", default)]
    now_playing: Vec<OngoingGame>,
}

#[async_trait]
impl LichessClient for HttpLichessClient {
    async fn stream_incoming_events(&self) -> Result<LichessStream, LichessError> {
        self.open_stream("/api/stream/event").await
    }

    async fn stream_game_state(&self, game: &GameRef) -> Result<LichessStream, LichessError> {
        self.open_stream(&format!("/api/board/game/stream/{}", game)).await
    }

    async fn account(&self) -> Result<Account, LichessError> {
        self.get_json("/api/account").await
    }

    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, LichessError> {
        let playing: NowPlaying = self.get_json("/api/account/playing").await?;
        Ok(playing.now_playing)
    }

    async fn seek(&self, request: SeekRequest) -> Result<(), LichessError> {
        self.ensure_open()?;
        let mut form = vec![
            ("time", request.time_minutes.to_string()),
            ("increment", request.increment_secs.to_string()),
            ("rated", request.rated.to_string()),
        ];
        if let Some(color) = request.color {
            form.push(("color", color));
        }

        // The seek stays open until it is paired; drain the body to keep it alive.
        let response = self
            .authorized(self.client.post(self.url("/api/board/seek")))
            .form(&form)
            .send()
            .await
            .map_err(map_send_error)?;
        let mut body = Box::pin(check_status(response).await?.bytes_stream());
        while let Some(chunk) = body.next().await {
            chunk.map_err(|e| LichessError::network(format!("Seek stream error: {}", e)))?;
        }
        Ok(())
    }

    async fn make_move(&self, game: &GameRef, uci: &str) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/board/game/{}/move/{}", game, uci))
            .await
    }

    async fn resign(&self, game: &GameRef) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/board/game/{}/resign", game)).await
    }

    async fn abort_game(&self, game: &GameRef) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/board/game/{}/abort", game)).await
    }

    async fn claim_victory(&self, game: &GameRef) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/board/game/{}/claim-victory", game))
            .await
    }

    async fn handle_draw_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/board/game/{}/draw/{}", game, yes_no(accept)))
            .await
    }

    async fn handle_takeback_offer(&self, game: &GameRef, accept: bool) -> Result<(), LichessError> {
        self.post_empty(&format!(
            "/api/board/game/{}/takeback/{}",
            game,
            yes_no(accept)
        ))
        .await
    }

    async fn post_message(&self, game: &GameRef, room: ChatRoom, text: &str) -> Result<(), LichessError> {
        let form = [("room", room.as_str()), ("text", text)];
        self.send(
            self.client
                .post(self.url(&format!("/api/board/game/{}/chat", game)))
                .form(&form),
        )
        .await?;
        Ok(())
    }

    async fn create_challenge(&self, request: ChallengeRequest) -> Result<ChallengeCreated, LichessError> {
        let mut form = vec![
            ("rated", request.rated.to_string()),
            ("clock.limit", request.clock_limit_secs.to_string()),
            ("clock.increment", request.clock_increment_secs.to_string()),
            ("variant", "standard".to_string()),
        ];
        if let Some(color) = request.color {
            form.push(("color", color));
        }
        self.create(&format!("/api/challenge/{}", request.username), form)
            .await
    }

    async fn create_ai_challenge(&self, request: AiChallengeRequest) -> Result<ChallengeCreated, LichessError> {
        let mut form = vec![
            ("level", request.level.to_string()),
            ("clock.limit", request.clock_limit_secs.to_string()),
            ("clock.increment", request.clock_increment_secs.to_string()),
            ("variant", "standard".to_string()),
        ];
        if let Some(color) = request.color {
            form.push(("color", color));
        }
        self.create("/api/challenge/ai", form).await
    }

    async fn accept_challenge(&self, challenge_id: &str) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/challenge/{}/accept", challenge_id))
            .await
    }

    async fn arena_tournaments(&self) -> Result<ArenaTournaments, LichessError> {
        self.get_json("/api/tournament").await
    }

    async fn join_arena(&self, tournament_id: &str, pair_immediately: bool) -> Result<(), LichessError> {
        let form = [("pairMeAsap", pair_immediately.to_string())];
        self.send(
            self.client
                .post(self.url(&format!("/api/tournament/{}/join", tournament_id)))
                .form(&form),
        )
        .await?;
        Ok(())
    }

    async fn withdraw_arena(&self, tournament_id: &str) -> Result<(), LichessError> {
        self.post_empty(&format!("/api/tournament/{}/withdraw", tournament_id))
            .await
    }

    fn close(&self) -> Result<(), LichessError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

fn yes_no(accept: bool) -> &'static str {
    if accept {
        "yes"
    } else {
        "no"
    }
}

fn map_send_error(e: reqwest::Error) -> LichessError {
    if e.is_timeout() {
        LichessError::Timeout
    } else if e.is_connect() {
        LichessError::network(format!("Connection failed: {}", e))
    } else {
        LichessError::network(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, LichessError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(LichessError::AuthenticationFailed),
        429 => Err(LichessError::RateLimited),
        code => Err(LichessError::api(code, body)),
    }
}
