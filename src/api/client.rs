//! HTTP client for the game backend.
//!
//! ERROR HANDLING
//! ==============
//! `304 Not Modified` is a normal poll outcome, not an error. Action calls
//! return the raw body on 2xx and `ApiError::Status` with the raw body
//! otherwise; interpreting the body is left to the tolerant parsers in
//! `crate::actions`.

use std::time::Duration;

use reqwest::header::{ACCEPT, ETAG, HeaderMap, IF_NONE_MATCH};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;

use super::types::{ActionKind, ApiError, CreateGameRequest, PollResult, ProofRequest, RegisterRequest};
use super::{ImageFetcher, OverlaySource, StateSource};
use crate::config::{ClientConfig, HttpTimeouts};

/// Header the backend reads to post side-channel notifications.
pub const WEBHOOK_HEADER: &str = "x-discord-webhook-url";

#[derive(Clone)]
pub struct RemoteStateClient {
    http: reqwest::Client,
    base_url: Url,
    webhook_url: Option<String>,
}

impl RemoteStateClient {
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, webhook_url: Option<&str>, timeouts: HttpTimeouts) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(trimmed).map_err(|e| ApiError::InvalidUrl(format!("{trimmed}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(trimmed.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        let webhook_url = webhook_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Self { http, base_url, webhook_url })
    }

    /// # Errors
    ///
    /// See [`RemoteStateClient::new`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url, config.webhook_url.as_deref(), config.timeouts)
    }

    // =========================================================================
    // OVERLAY
    // =========================================================================

    /// `GET /games/{game_id}/overlay?rsn={identity}` with `If-None-Match`.
    pub async fn poll_overlay(&self, game_id: &str, identity: &str, prior_revision: Option<&str>) -> PollResult {
        let game_id = game_id.trim();
        if game_id.is_empty() {
            return PollResult::Failure { status: None, message: "blank game id".to_string() };
        }
        match self.try_poll_overlay(game_id, identity, prior_revision).await {
            Ok(result) => result,
            Err(e) => e.into(),
        }
    }

    async fn try_poll_overlay(
        &self,
        game_id: &str,
        identity: &str,
        prior_revision: Option<&str>,
    ) -> Result<PollResult, ApiError> {
        let mut url = self.games_url(&[game_id, "overlay"])?;
        url.query_pairs_mut().append_pair("rsn", identity.trim());

        let mut req = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(tag) = prior_revision.map(str::trim).filter(|t| !t.is_empty()) {
            req = req.header(IF_NONE_MATCH, tag);
        }

        let res = req.send().await.map_err(transport)?;
        let status = res.status();
        let revision = etag(res.headers());
        if status == StatusCode::NOT_MODIFIED {
            return Ok(PollResult::NotModified { revision });
        }
        let body = res.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        Ok(PollResult::Success { body, revision })
    }

    // =========================================================================
    // STATE + ACTIONS
    // =========================================================================

    /// `GET /games/{game_id}/state`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-2xx status.
    pub async fn get_state(&self, game_id: &str) -> Result<String, ApiError> {
        let url = self.game_url(game_id, "state")?;
        let res = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;
        success_body(res).await
    }

    /// Issue a state-changing call and return the raw response body.
    ///
    /// `game_id` is ignored for [`ActionKind::Create`]. Roll and proof calls
    /// carry `auth_token` as a bearer credential.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-2xx status; the status
    /// error keeps the raw body for diagnostics.
    pub async fn post_action<P: Serialize + ?Sized>(
        &self,
        game_id: &str,
        kind: ActionKind,
        auth_token: Option<&str>,
        payload: &P,
    ) -> Result<String, ApiError> {
        let url = match kind.segment() {
            Some(segment) => self.game_url(game_id, segment)?,
            None => self.games_url(&[])?,
        };
        let mut req = self.http.post(url).header(ACCEPT, "application/json").json(payload);
        if kind.requires_auth() {
            req = req.bearer_auth(auth_token.unwrap_or_default().trim());
        }
        let res = self.with_webhook(req).send().await.map_err(transport)?;
        success_body(res).await
    }

    /// # Errors
    ///
    /// See [`RemoteStateClient::post_action`].
    pub async fn create_game(&self, request: &CreateGameRequest) -> Result<String, ApiError> {
        self.post_action("", ActionKind::Create, None, request).await
    }

    /// # Errors
    ///
    /// See [`RemoteStateClient::post_action`].
    pub async fn register(&self, game_id: &str, request: &RegisterRequest) -> Result<String, ApiError> {
        self.post_action(game_id, ActionKind::Register, None, request).await
    }

    /// # Errors
    ///
    /// See [`RemoteStateClient::post_action`].
    pub async fn roll(&self, game_id: &str, auth_token: &str) -> Result<String, ApiError> {
        self.post_action(game_id, ActionKind::Roll, Some(auth_token), &serde_json::json!({}))
            .await
    }

    /// # Errors
    ///
    /// See [`RemoteStateClient::post_action`].
    pub async fn submit_proof(&self, game_id: &str, auth_token: &str, proof_url: &str) -> Result<String, ApiError> {
        let request = ProofRequest { url: proof_url.trim().to_string() };
        self.post_action(game_id, ActionKind::Proof, Some(auth_token), &request)
            .await
    }

    // =========================================================================
    // IMAGES
    // =========================================================================

    /// Download raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-2xx status.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let url = Url::parse(url.trim()).map_err(|e| ApiError::InvalidUrl(format!("{url}: {e}")))?;
        let res = self
            .http
            .get(url)
            .header(ACCEPT, "image/*")
            .send()
            .await
            .map_err(transport)?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(ApiError::Status { status: status.as_u16(), body });
        }
        let bytes = res.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn game_url(&self, game_id: &str, segment: &str) -> Result<Url, ApiError> {
        let game_id = game_id.trim();
        if game_id.is_empty() {
            return Err(ApiError::InvalidUrl("blank game id".to_string()));
        }
        self.games_url(&[game_id, segment])
    }

    /// `{base}/games/{segments...}`, each segment percent-encoded.
    fn games_url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("games")
            .extend(segments);
        Ok(url)
    }

    fn with_webhook(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.webhook_url {
            Some(hook) => req.header(WEBHOOK_HEADER, hook),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl OverlaySource for RemoteStateClient {
    async fn poll_overlay(&self, game_id: &str, identity: &str, prior_revision: Option<&str>) -> PollResult {
        RemoteStateClient::poll_overlay(self, game_id, identity, prior_revision).await
    }
}

#[async_trait::async_trait]
impl StateSource for RemoteStateClient {
    async fn fetch_state(&self, game_id: &str) -> Result<String, ApiError> {
        self.get_state(game_id).await
    }
}

#[async_trait::async_trait]
impl ImageFetcher for RemoteStateClient {
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        self.download(url).await
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}

fn etag(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn success_body(res: Response) -> Result<String, ApiError> {
    let status = res.status();
    let body = res.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(ApiError::Status { status: status.as_u16(), body });
    }
    Ok(body)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
