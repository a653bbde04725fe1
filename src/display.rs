//! Display derivation: pure functions from snapshot + clock to UI text.
//!
//! DESIGN
//! ======
//! The UI never reads engine internals. It receives a complete
//! `DisplayState` value on every poll result and every tick, either through
//! a `DisplaySink` callback or by reading the engine's watch channel.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::image_cache::TileImage;
use crate::snapshot::{OverlaySnapshot, Phase};

pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_DISCONNECTED: &str = "Not connected";
pub const STATUS_AWAITING_PROOF: &str = "Awaiting proof";
pub const STATUS_OFFLINE: &str = "Overlay offline";
pub const OFFLINE_DETAIL: &str = "Overlay endpoint unreachable.";
pub const WAITING_FOR_TILE: &str = "Waiting for tile…";
pub const PROOF_REQUIRED: &str = "Proof required";

// =============================================================================
// DISPLAY STATE
// =============================================================================

/// Everything the UI renders for the overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub status: String,
    pub countdown: String,
    pub tile_summary: String,
    pub tooltip_lines: Vec<String>,
    pub awaiting_proof: bool,
    pub can_roll: bool,
    /// The last poll failed; the rest of the state is last-known-good.
    pub offline: bool,
    pub image: Option<Arc<TileImage>>,
}

impl DisplayState {
    /// State shown while no game is connected.
    #[must_use]
    pub fn disconnected() -> Self {
        Self {
            status: STATUS_DISCONNECTED.to_string(),
            countdown: String::new(),
            tile_summary: String::new(),
            tooltip_lines: vec![STATUS_DISCONNECTED.to_string()],
            awaiting_proof: false,
            can_roll: false,
            offline: false,
            image: None,
        }
    }

    /// State shown after connecting, before the first snapshot arrives.
    #[must_use]
    pub fn connected() -> Self {
        Self {
            status: STATUS_CONNECTED.to_string(),
            tooltip_lines: vec![STATUS_CONNECTED.to_string(), WAITING_FOR_TILE.to_string()],
            ..Self::disconnected()
        }
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// UI capability the engine pushes updates into.
///
/// Called from the engine's driver task; implementations must not block.
pub trait DisplaySink: Send + Sync {
    fn on_display_update(&self, state: &DisplayState);
}

// =============================================================================
// DERIVATION
// =============================================================================

/// Format whole seconds as `H:MM:SS` (an hour or more) or `M:SS`.
#[must_use]
pub fn format_countdown(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 { format!("{h}:{m:02}:{s:02}") } else { format!("{m}:{s:02}") }
}

/// Countdown text for the snapshot's phase target, clamped at zero.
#[must_use]
pub fn countdown_text(snapshot: &OverlaySnapshot, now: OffsetDateTime) -> String {
    let Some(target) = snapshot.countdown_target() else {
        return String::new();
    };
    let remaining = (target - now).whole_seconds().max(0);
    format_countdown(remaining.unsigned_abs())
}

/// Status line. No snapshot yet reads as plain "Connected".
#[must_use]
pub fn status_text(snapshot: Option<&OverlaySnapshot>) -> &'static str {
    let Some(snap) = snapshot else {
        return STATUS_CONNECTED;
    };
    if snap.awaiting_proof {
        return STATUS_AWAITING_PROOF;
    }
    match snap.phase {
        Phase::Prestart => "Waiting for start",
        Phase::Running => "Running",
        Phase::Ended => "Ended",
    }
}

/// Roll eligibility: the backend's explicit flag wins, otherwise derived
/// from the local credential and the snapshot.
#[must_use]
pub fn can_roll(snapshot: &OverlaySnapshot, authorized: bool) -> bool {
    snapshot
        .can_roll
        .unwrap_or(authorized && !snapshot.awaiting_proof && snapshot.phase == Phase::Running)
}

#[must_use]
pub fn tile_summary(snapshot: &OverlaySnapshot) -> String {
    let kind = snapshot.tile_kind.trim();
    if kind.is_empty() {
        format!("Tile {}", snapshot.tile_index)
    } else {
        format!("Tile {} ({kind})", snapshot.tile_index)
    }
}

/// Tooltip lines, status first. Blank lines are dropped.
#[must_use]
pub fn tooltip_lines(status: &str, snapshot: &OverlaySnapshot) -> Vec<String> {
    let mut lines = vec![status.to_string()];
    if snapshot.tile_title.trim().is_empty() {
        lines.push(WAITING_FOR_TILE.to_string());
    } else {
        lines.push(tile_summary(snapshot));
        lines.push(snapshot.tile_title.clone());
        lines.push(snapshot.tile_description.clone());
        if snapshot.awaiting_proof {
            lines.push(PROOF_REQUIRED.to_string());
        }
    }
    lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Full display for a freshly applied snapshot. The image is carried over by
/// the caller.
#[must_use]
pub fn derive(snapshot: &OverlaySnapshot, authorized: bool, now: OffsetDateTime) -> DisplayState {
    let status = status_text(Some(snapshot));
    DisplayState {
        status: status.to_string(),
        countdown: countdown_text(snapshot, now),
        tile_summary: tile_summary(snapshot),
        tooltip_lines: tooltip_lines(status, snapshot),
        awaiting_proof: snapshot.awaiting_proof,
        can_roll: can_roll(snapshot, authorized),
        offline: false,
        image: None,
    }
}

#[cfg(test)]
#[path = "display_test.rs"]
mod tests;
