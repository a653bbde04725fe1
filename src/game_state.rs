//! Standings view parsed from `GET /games/{id}/state`.

use serde_json::Value;

use crate::fields;

const UNKNOWN: &str = "-";
const EMPTY_TILE_KIND: &str = "empty";

/// One team's row in the standings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamStanding {
    pub name: String,
    pub position: i64,
    pub active_tile_title: String,
    pub active_tile_kind: String,
    pub awaiting_proof: bool,
}

pub const STATUS_AWAITING_PROOF: &str = "Awaiting proof";
pub const STATUS_FINISHED: &str = "Finished";
pub const STATUS_READY: &str = "Ready";
pub const STATUS_SPECTATING: &str = "Spectating";

impl TeamStanding {
    /// `Tile 42 (ladder)`.
    #[must_use]
    pub fn tile_line(&self) -> String {
        format!("Tile {} ({})", self.position, self.active_tile_kind)
    }

    fn from_value(team: &Value) -> Self {
        let empty = Value::Null;
        let tile = fields::object(team, "activeTile").unwrap_or(&empty);
        Self {
            name: fields::non_blank(team, "name").unwrap_or_else(|| UNKNOWN.to_string()),
            position: fields::integer(team, "position").unwrap_or(0),
            active_tile_title: fields::non_blank(tile, "title").unwrap_or_else(|| UNKNOWN.to_string()),
            active_tile_kind: fields::non_blank(tile, "kind").unwrap_or_else(|| EMPTY_TILE_KIND.to_string()),
            awaiting_proof: fields::boolean(team, "awaitingProof").unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameStateView {
    /// `game.status` reads `finished`.
    pub finished: bool,
    pub teams: Vec<TeamStanding>,
}

impl GameStateView {
    /// Parse a state body. Never fails; non-object team entries are skipped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let Some(root) = fields::parse_object(raw).map(Value::Object) else {
            return Self::default();
        };

        let finished = fields::object(&root, "game")
            .and_then(|game| fields::non_blank(game, "status"))
            .is_some_and(|status| status.eq_ignore_ascii_case("finished"));

        let teams = root
            .get("teams")
            .and_then(Value::as_array)
            .map(|teams| {
                teams
                    .iter()
                    .filter(|t| t.is_object())
                    .map(TeamStanding::from_value)
                    .collect()
            })
            .unwrap_or_default();

        Self { finished, teams }
    }

    /// Team whose name matches `name`, ignoring ASCII case.
    #[must_use]
    pub fn find_team(&self, name: &str) -> Option<&TeamStanding> {
        let name = name.trim();
        if name.is_empty() || name == UNKNOWN {
            return None;
        }
        self.teams.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Status line for the player's own team; `None` when not in a team.
    #[must_use]
    pub fn status_for(&self, team: Option<&TeamStanding>) -> &'static str {
        match team {
            Some(t) if t.awaiting_proof => STATUS_AWAITING_PROOF,
            _ if self.finished => STATUS_FINISHED,
            Some(_) => STATUS_READY,
            None => STATUS_SPECTATING,
        }
    }
}

#[cfg(test)]
#[path = "game_state_test.rs"]
mod tests;
