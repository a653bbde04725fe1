//! Backend wire types: poll results, action kinds, request payloads, errors.

use serde::Serialize;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by backend calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The request could not be built (bad base URL or path).
    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    /// The request never produced a response (DNS, connect, timeout, body read).
    #[error("request failed: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend responded with status {status}")]
    Status { status: u16, body: String },

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    /// HTTP status, when the backend answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// =============================================================================
// POLL RESULT
// =============================================================================

/// Outcome of one conditional overlay poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The precondition matched; the body is intentionally absent.
    NotModified { revision: Option<String> },
    Success { body: String, revision: Option<String> },
    /// `status` is `None` for transport errors.
    Failure { status: Option<u16>, message: String },
}

impl From<ApiError> for PollResult {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => Self::Failure { status: Some(status), message: body },
            other => Self::Failure { status: None, message: other.to_string() },
        }
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// State-changing backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// `POST /games`
    Create,
    /// `POST /games/{id}/register`
    Register,
    /// `POST /games/{id}/roll`
    Roll,
    /// `POST /games/{id}/proof`
    Proof,
}

impl ActionKind {
    /// Trailing path segment under `/games/{id}`; `None` for create.
    #[must_use]
    pub fn segment(self) -> Option<&'static str> {
        match self {
            Self::Create => None,
            Self::Register => Some("register"),
            Self::Roll => Some("roll"),
            Self::Proof => Some("proof"),
        }
    }

    #[must_use]
    pub fn requires_auth(self) -> bool {
        matches!(self, Self::Roll | Self::Proof)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    pub clan_name: String,
    pub host_password: String,
    pub board_size: u32,
    pub board_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub team_name: String,
    pub team_password: String,
    pub rsn: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProofRequest {
    pub url: String,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
