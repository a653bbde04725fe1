//! Connection session: which game we follow, with which credential.
//!
//! DESIGN
//! ======
//! `Session` is the only owner of `ConnectionState`. Connecting starts a
//! fresh `SyncEngine` and a `StandingsRefresher`; disconnecting or switching
//! games stops both and awaits them first, so two engines never publish to
//! the same sink. Action calls are thin pass-throughs that add the game id
//! and credential. A successful roll or proof asks for fresh standings.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::actions::{CreateGameOutcome, ProofOutcome, RegisterOutcome, RollOutcome};
use crate::api::types::{CreateGameRequest, RegisterRequest};
use crate::api::{ApiError, OverlaySource, RemoteStateClient, StateSource};
use crate::config::{ClientConfig, EngineTiming};
use crate::display::{DisplaySink, DisplayState};
use crate::game_state::{GameStateView, TeamStanding};
use crate::image_cache::ImageCache;
use crate::standings::{StandingsHandle, StandingsRefresher, StandingsView};
use crate::sync::{EngineConfig, EngineDeps, EngineHandle, SyncEngine, SystemClock};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to a game")]
    NotConnected,
    #[error("no team credential; register first")]
    NotAuthorized,
    #[error("registration returned no token")]
    MissingToken,
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected { game_id: String },
}

pub struct Session {
    client: RemoteStateClient,
    images: ImageCache,
    sink: Arc<dyn DisplaySink>,
    identity: String,
    timing: EngineTiming,
    auth_token: Option<String>,
    team_name: Option<String>,
    /// Game the credential belongs to.
    token_game_id: Option<String>,
    state: ConnectionState,
    engine: Option<EngineHandle>,
    standings: Option<StandingsHandle>,
}

impl Session {
    #[must_use]
    pub fn new(client: RemoteStateClient, images: ImageCache, sink: Arc<dyn DisplaySink>, config: &ClientConfig) -> Self {
        Self {
            client,
            images,
            sink,
            identity: config.identity.clone(),
            timing: config.timing,
            auth_token: non_blank(config.auth_token.as_deref()),
            team_name: non_blank(config.team_name.as_deref()),
            token_game_id: non_blank(config.game_id.as_deref()),
            state: ConnectionState::Disconnected,
            engine: None,
            standings: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub fn game_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Connected { game_id } => Some(game_id),
            ConnectionState::Disconnected => None,
        }
    }

    #[must_use]
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    #[must_use]
    pub fn team_name(&self) -> Option<&str> {
        self.team_name.as_deref()
    }

    /// Display updates of the running engine, if connected.
    #[must_use]
    pub fn subscribe(&self) -> Option<watch::Receiver<DisplayState>> {
        self.engine.as_ref().map(EngineHandle::subscribe)
    }

    /// Standings updates for the connected game, if connected.
    #[must_use]
    pub fn subscribe_standings(&self) -> Option<watch::Receiver<StandingsView>> {
        self.standings.as_ref().map(StandingsHandle::subscribe)
    }

    /// This session's team in `view`, matched by name.
    #[must_use]
    pub fn my_team<'a>(&self, view: &'a GameStateView) -> Option<&'a TeamStanding> {
        view.find_team(self.team_name.as_deref()?)
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// Follow `game_id`. Blank input is ignored.
    pub async fn connect(&mut self, game_id: &str) {
        let game_id = game_id.trim();
        if game_id.is_empty() {
            debug!("ignoring connect with blank game id");
            return;
        }
        self.stop_engine().await;

        if self.token_game_id.as_deref() != Some(game_id) {
            self.auth_token = None;
            self.team_name = None;
            self.token_game_id = Some(game_id.to_string());
        }

        let deps = EngineDeps {
            source: Arc::new(self.client.clone()) as Arc<dyn OverlaySource>,
            images: self.images.clone(),
            sink: Arc::clone(&self.sink),
            clock: Arc::new(SystemClock),
        };
        let config = EngineConfig {
            game_id: game_id.to_string(),
            identity: self.identity.clone(),
            authorized: self.auth_token.is_some(),
            timing: self.timing,
        };
        self.engine = Some(SyncEngine::start(deps, config));
        self.standings = Some(StandingsRefresher::start(
            Arc::new(self.client.clone()) as Arc<dyn StateSource>,
            game_id,
            self.timing.standings_interval,
        ));
        self.state = ConnectionState::Connected { game_id: game_id.to_string() };
        info!(game_id, "connected");
    }

    /// Stop following the current game. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.stop_engine().await;
        self.state = ConnectionState::Disconnected;
        info!("disconnected");
    }

    async fn stop_engine(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.stop().await;
        }
        if let Some(mut standings) = self.standings.take() {
            standings.stop().await;
        }
    }

    /// Replace the credential. Blank clears it.
    pub fn set_auth_token(&mut self, token: Option<&str>) {
        self.auth_token = non_blank(token);
        if let Some(engine) = &self.engine {
            engine.set_authorized(self.auth_token.is_some());
        }
    }

    // =========================================================================
    // ACTIONS
    // =========================================================================

    /// Create a game. Does not connect to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    pub async fn create_game(&self, request: &CreateGameRequest) -> Result<CreateGameOutcome, SessionError> {
        let body = self.client.create_game(request).await?;
        Ok(CreateGameOutcome::parse(&body))
    }

    /// Join or create a team in the connected game and keep its credential.
    ///
    /// # Errors
    ///
    /// Returns an error if not connected, the call fails, or the response
    /// carries no token.
    pub async fn register(&mut self, team_name: &str, team_password: &str) -> Result<RegisterOutcome, SessionError> {
        let game_id = self.connected_game()?.to_string();
        let request = RegisterRequest {
            team_name: team_name.trim().to_string(),
            team_password: team_password.trim().to_string(),
            rsn: self.identity.trim().to_string(),
        };
        let body = self.client.register(&game_id, &request).await?;
        let outcome = RegisterOutcome::parse(&body);
        let Some(token) = outcome.token.as_deref() else {
            return Err(SessionError::MissingToken);
        };

        self.set_auth_token(Some(token));
        self.team_name = Some(outcome.team_name.clone().unwrap_or(request.team_name));
        info!(game_id = %game_id, team = ?self.team_name, "registered");
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns an error if not connected, no credential is held, or the call
    /// fails.
    pub async fn roll(&self) -> Result<RollOutcome, SessionError> {
        let (game_id, token) = self.authorized_game()?;
        let body = self.client.roll(game_id, token).await?;
        self.refresh_standings();
        Ok(RollOutcome::parse(&body))
    }

    /// # Errors
    ///
    /// Returns an error if not connected, no credential is held, or the call
    /// fails.
    pub async fn submit_proof(&self, proof_url: &str) -> Result<ProofOutcome, SessionError> {
        let (game_id, token) = self.authorized_game()?;
        let body = self.client.submit_proof(game_id, token, proof_url).await?;
        self.refresh_standings();
        Ok(ProofOutcome::parse(&body))
    }

    /// # Errors
    ///
    /// Returns an error if not connected or the call fails.
    pub async fn refresh_state(&self) -> Result<GameStateView, SessionError> {
        let game_id = self.connected_game()?;
        let body = self.client.get_state(game_id).await?;
        Ok(GameStateView::parse(&body))
    }

    fn refresh_standings(&self) {
        if let Some(standings) = &self.standings {
            standings.refresh_now();
        }
    }

    fn connected_game(&self) -> Result<&str, SessionError> {
        self.game_id().ok_or(SessionError::NotConnected)
    }

    fn authorized_game(&self) -> Result<(&str, &str), SessionError> {
        let game_id = self.connected_game()?;
        let token = self.auth_token.as_deref().ok_or(SessionError::NotAuthorized)?;
        Ok((game_id, token))
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
