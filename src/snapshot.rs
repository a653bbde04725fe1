//! Overlay snapshot: one immutable view of the remote tile state.
//!
//! DESIGN
//! ======
//! A snapshot is built once per successful poll and never mutated. The engine
//! swaps `Arc<OverlaySnapshot>` values, so readers always see a whole
//! snapshot.
//!
//! ERROR HANDLING
//! ==============
//! Every field has a default and a bad field never fails the rest of the
//! body. `try_parse` rejects a body that is not a JSON object; `parse`
//! turns that case into `OverlaySnapshot::default()`.

use serde_json::Value;
use time::OffsetDateTime;

use crate::fields;

/// Coarse lifecycle stage of a game round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    Prestart,
    #[default]
    Running,
    Ended,
}

impl Phase {
    /// Case-insensitive parse; anything unrecognized is `Running`.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("prestart") => Self::Prestart,
            Some("ended") => Self::Ended,
            _ => Self::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlaySnapshot {
    pub phase: Phase,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub tile_index: u32,
    pub tile_kind: String,
    pub tile_title: String,
    pub tile_description: String,
    pub image_url: Option<String>,
    pub image_cache_key: Option<String>,
    pub awaiting_proof: bool,
    /// `None` when the backend leaves roll eligibility to the client.
    pub can_roll: Option<bool>,
}

impl OverlaySnapshot {
    /// Parse an overlay response body. Never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_default()
    }

    /// Parse a body whose root is a JSON object; `None` for anything else.
    /// Fields inside the object still fall back to defaults.
    #[must_use]
    pub fn try_parse(raw: &str) -> Option<Self> {
        fields::parse_object(raw).map(|map| Self::from_value(&Value::Object(map)))
    }

    #[must_use]
    pub fn from_value(root: &Value) -> Self {
        let empty = Value::Null;
        let tile = fields::object(root, "tile").unwrap_or(&empty);
        let flags = fields::object(root, "flags").unwrap_or(&empty);

        Self {
            phase: Phase::parse(root.get("phase").and_then(Value::as_str)),
            start_time: fields::instant(root, "startTime"),
            end_time: fields::instant(root, "endTime"),
            tile_index: fields::unsigned(tile, "tileIndex").unwrap_or(0),
            tile_kind: fields::string(tile, "kind").unwrap_or_default(),
            tile_title: fields::string(tile, "title").unwrap_or_default(),
            tile_description: fields::string(tile, "description").unwrap_or_default(),
            image_url: fields::non_blank(tile, "imageUrl"),
            image_cache_key: fields::non_blank(tile, "imageCacheKey"),
            awaiting_proof: fields::boolean(flags, "awaitingProof").unwrap_or(false),
            can_roll: fields::boolean(flags, "canRoll"),
        }
    }

    /// Instant the countdown runs towards in the current phase.
    #[must_use]
    pub fn countdown_target(&self) -> Option<OffsetDateTime> {
        match self.phase {
            Phase::Prestart => self.start_time,
            Phase::Running => self.end_time,
            Phase::Ended => None,
        }
    }

    /// Image reference as `(cache_key, url)`, if the tile has an image.
    ///
    /// Without an explicit cache key the key is derived from the tile index
    /// and URL, so a tile that changes image gets a new key.
    #[must_use]
    pub fn image_ref(&self) -> Option<(String, String)> {
        let url = self.image_url.clone()?;
        let key = self
            .image_cache_key
            .clone()
            .unwrap_or_else(|| format!("{}:{url}", self.tile_index));
        Some((key, url))
    }
}

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod tests;
