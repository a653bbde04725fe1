//! Engine state machine, free of timers and I/O.
//!
//! The driver task owns one `EngineState` and feeds it events with explicit
//! timestamps, so every transition is testable without a runtime.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::debug;

use crate::api::PollResult;
use crate::display::{self, DisplayState, OFFLINE_DETAIL, STATUS_OFFLINE};
use crate::image_cache::TileImage;
use crate::snapshot::OverlaySnapshot;

/// Tile image the engine wants rendered next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy)]
struct OutstandingPoll {
    seq: u64,
    started: Instant,
}

pub struct EngineState {
    snapshot: Option<Arc<OverlaySnapshot>>,
    revision: Option<String>,
    authorized: bool,
    display: DisplayState,
    poll_timeout: Duration,
    next_seq: u64,
    outstanding: Option<OutstandingPoll>,
    /// Highest sequence number whose result has been applied.
    latest_completed: u64,
    /// Image key of the current snapshot; late images for other keys are
    /// ignored.
    image_key: Option<String>,
}

impl EngineState {
    #[must_use]
    pub fn new(authorized: bool, poll_timeout: Duration) -> Self {
        Self {
            snapshot: None,
            revision: None,
            authorized,
            display: DisplayState::connected(),
            poll_timeout,
            next_seq: 0,
            outstanding: None,
            latest_completed: 0,
            image_key: None,
        }
    }

    #[must_use]
    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<OverlaySnapshot>> {
        self.snapshot.as_ref()
    }

    #[must_use]
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    // =========================================================================
    // POLL
    // =========================================================================

    /// Sequence number for a new poll, or `None` while a younger poll is
    /// still outstanding. A poll older than `poll_timeout` is abandoned.
    pub fn begin_poll(&mut self, now: Instant) -> Option<u64> {
        if let Some(poll) = self.outstanding {
            let age = now.saturating_duration_since(poll.started);
            if age < self.poll_timeout {
                return None;
            }
            debug!(seq = poll.seq, age_ms = age.as_millis(), "abandoning slow overlay poll");
        }
        self.next_seq += 1;
        self.outstanding = Some(OutstandingPoll { seq: self.next_seq, started: now });
        Some(self.next_seq)
    }

    /// Apply the result of poll `seq`. Returns the image to fetch, if the
    /// result introduced one.
    pub fn apply_poll(&mut self, seq: u64, result: PollResult, now: OffsetDateTime) -> Option<ImageRequest> {
        if self.outstanding.is_some_and(|p| p.seq == seq) {
            self.outstanding = None;
        }
        if seq <= self.latest_completed {
            debug!(seq, latest = self.latest_completed, "discarding stale overlay poll result");
            return None;
        }
        self.latest_completed = seq;

        match result {
            PollResult::NotModified { revision } => {
                self.remember_revision(revision);
                self.clear_offline();
                None
            }
            PollResult::Success { body, revision } => {
                if body.trim().is_empty() {
                    self.remember_revision(revision);
                    self.clear_offline();
                    return None;
                }
                // A body that is not a JSON object (proxy error page, truncated
                // read) is an outage, not a new tile.
                let Some(snapshot) = OverlaySnapshot::try_parse(&body) else {
                    debug!(seq, "overlay body is not a JSON object");
                    self.mark_offline();
                    return None;
                };
                self.remember_revision(revision);
                self.replace_snapshot(snapshot, now)
            }
            PollResult::Failure { status, message } => {
                debug!(seq, ?status, %message, "overlay poll failed");
                self.mark_offline();
                None
            }
        }
    }

    /// Forget the outstanding poll whose result will never arrive.
    pub fn abandon_outstanding(&mut self) {
        if let Some(poll) = self.outstanding.take() {
            debug!(seq = poll.seq, "overlay poll lost");
        }
    }

    /// Keep the snapshot and countdown; swap the status lines for the
    /// offline notice.
    fn mark_offline(&mut self) {
        self.display.offline = true;
        self.display.status = STATUS_OFFLINE.to_string();
        self.display.tooltip_lines = vec![STATUS_OFFLINE.to_string(), OFFLINE_DETAIL.to_string()];
    }

    fn remember_revision(&mut self, revision: Option<String>) {
        if let Some(tag) = revision.filter(|t| !t.trim().is_empty()) {
            self.revision = Some(tag);
        }
    }

    /// Restore the status lines from the stored snapshot after an outage.
    /// The countdown is left to the tick.
    fn clear_offline(&mut self) {
        if !self.display.offline {
            return;
        }
        self.display.offline = false;
        match &self.snapshot {
            Some(snap) => {
                let status = display::status_text(Some(snap));
                self.display.status = status.to_string();
                self.display.tooltip_lines = display::tooltip_lines(status, snap);
            }
            None => {
                let connected = DisplayState::connected();
                self.display.status = connected.status;
                self.display.tooltip_lines = connected.tooltip_lines;
            }
        }
    }

    fn replace_snapshot(&mut self, snapshot: OverlaySnapshot, now: OffsetDateTime) -> Option<ImageRequest> {
        let mut next = display::derive(&snapshot, self.authorized, now);

        let request = match snapshot.image_ref() {
            Some((key, url)) => {
                let same_key = self.image_key.as_deref() == Some(key.as_str());
                if same_key && self.display.image.is_some() {
                    next.image = self.display.image.clone();
                    None
                } else {
                    self.image_key = Some(key.clone());
                    Some(ImageRequest { key, url })
                }
            }
            None => {
                self.image_key = None;
                None
            }
        };

        self.snapshot = Some(Arc::new(snapshot));
        self.display = next;
        request
    }

    // =========================================================================
    // TICK + COMMANDS
    // =========================================================================

    /// Recompute the countdown. Returns whether the display changed.
    ///
    /// The driver publishes a tick only when this returns `true`, so a
    /// snapshot with no countdown (ended, or no target) produces no tick
    /// updates at all.
    pub fn tick(&mut self, now: OffsetDateTime) -> bool {
        let Some(snap) = &self.snapshot else {
            return false;
        };
        let countdown = display::countdown_text(snap, now);
        if countdown == self.display.countdown {
            return false;
        }
        self.display.countdown = countdown;
        true
    }

    /// Record whether a credential is present. Returns whether the display
    /// changed.
    pub fn set_authorized(&mut self, authorized: bool) -> bool {
        self.authorized = authorized;
        let Some(snap) = &self.snapshot else {
            return false;
        };
        let can_roll = display::can_roll(snap, authorized);
        if can_roll == self.display.can_roll {
            return false;
        }
        self.display.can_roll = can_roll;
        true
    }

    /// Attach a fetched image if it still belongs to the current tile.
    pub fn apply_image(&mut self, key: &str, image: Arc<TileImage>) -> bool {
        if self.image_key.as_deref() != Some(key) {
            debug!(key, "ignoring image for a previous tile");
            return false;
        }
        self.display.image = Some(image);
        true
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
