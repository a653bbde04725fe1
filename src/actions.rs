//! Outcomes of state-changing backend calls.
//!
//! Each parser takes the raw 2xx body returned by
//! `RemoteStateClient::post_action` and never fails: missing or mistyped
//! fields fall back to defaults, and the caller decides whether a default
//! (an empty token, for example) means the action did not take.

use serde_json::Value;

use crate::fields;

fn root(raw: &str) -> Value {
    fields::parse_object(raw).map_or(Value::Null, Value::Object)
}

/// Result of `POST /games`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateGameOutcome {
    pub game_id: Option<String>,
}

impl CreateGameOutcome {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let root = root(raw);
        Self { game_id: fields::non_blank(&root, "gameId") }
    }
}

/// Result of `POST /games/{id}/register`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterOutcome {
    /// Bearer credential for roll and proof calls.
    pub token: Option<String>,
    /// Canonical team name; callers fall back to what they submitted.
    pub team_name: Option<String>,
}

impl RegisterOutcome {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let root = root(raw);
        Self {
            token: fields::non_blank(&root, "token"),
            team_name: fields::non_blank(&root, "teamName"),
        }
    }
}

/// Result of `POST /games/{id}/roll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RollOutcome {
    pub roll: i64,
    pub from: i64,
    pub to: i64,
    pub awaiting_proof: bool,
}

impl RollOutcome {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let root = root(raw);
        Self {
            roll: fields::integer(&root, "roll").unwrap_or(0),
            from: fields::integer(&root, "from").unwrap_or(0),
            to: fields::integer(&root, "to").unwrap_or(0),
            awaiting_proof: fields::boolean(&root, "awaitingProof").unwrap_or(false),
        }
    }
}

/// Result of `POST /games/{id}/proof`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProofOutcome {
    /// The proof ended the game.
    pub finished: bool,
    pub winner: Option<String>,
}

impl ProofOutcome {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let root = root(raw);
        Self {
            finished: fields::boolean(&root, "finished").unwrap_or(false),
            winner: fields::non_blank(&root, "winner"),
        }
    }
}

#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;
