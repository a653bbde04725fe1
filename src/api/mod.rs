//! Backend API: HTTP exchange with the game backend.
//!
//! DESIGN
//! ======
//! `RemoteStateClient` performs requests and classifies responses; it never
//! interprets business fields. The engine, image cache and standings
//! refresher depend on the `OverlaySource` / `ImageFetcher` / `StateSource`
//! traits, not on the concrete client.

pub mod client;
pub mod types;

pub use client::RemoteStateClient;
pub use types::{ActionKind, ApiError, PollResult};

/// Conditional overlay polling. Enables mocking in tests.
#[async_trait::async_trait]
pub trait OverlaySource: Send + Sync {
    /// Poll the overlay resource, forwarding `prior_revision` as a
    /// precondition. Never fails; errors are folded into
    /// [`PollResult::Failure`].
    async fn poll_overlay(&self, game_id: &str, identity: &str, prior_revision: Option<&str>) -> PollResult;
}

/// Raw image download. Enables mocking in tests.
#[async_trait::async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download the bytes at `url`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or non-success status.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

/// Standings read. Enables mocking in tests.
#[async_trait::async_trait]
pub trait StateSource: Send + Sync {
    /// Raw body of `GET /games/{id}/state`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or non-success status.
    async fn fetch_state(&self, game_id: &str) -> Result<String, ApiError>;
}
