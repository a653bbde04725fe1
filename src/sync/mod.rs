//! Overlay synchronization engine.
//!
//! DESIGN
//! ======
//! One driver task owns all engine state and multiplexes, with
//! `tokio::select!`, a slow poll timer, a fast tick timer, poll completions,
//! image completions and commands from the handle. Polls run as child tasks
//! in a `JoinSet` so the driver never awaits the network. Each published
//! `DisplayState` goes to the `DisplaySink` and to a watch channel.
//!
//! SHUTDOWN
//! ========
//! `EngineHandle::stop` signals the driver and awaits it. Outstanding polls
//! are aborted with the `JoinSet` and image callbacks for this engine land
//! on a closed channel, so nothing reaches the sink once `stop` returns.

pub mod state;

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::api::{OverlaySource, PollResult};
use crate::config::EngineTiming;
use crate::display::{DisplaySink, DisplayState};
use crate::image_cache::{ImageCache, TileImage};
use state::{EngineState, ImageRequest};

const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Wall-clock source for countdowns.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Per-connection engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub game_id: String,
    /// Player handle forwarded as `rsn`.
    pub identity: String,
    /// Whether a credential is present at start.
    pub authorized: bool,
    pub timing: EngineTiming,
}

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub source: Arc<dyn OverlaySource>,
    pub images: ImageCache,
    pub sink: Arc<dyn DisplaySink>,
    pub clock: Arc<dyn Clock>,
}

enum Command {
    SetAuthorized(bool),
}

pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the driver task. The first poll fires immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(deps: EngineDeps, config: EngineConfig) -> EngineHandle {
        let initial = DisplayState::connected();
        let (display_tx, display_rx) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            game_id = %config.game_id,
            poll_ms = config.timing.poll_interval.as_millis(),
            tick_ms = config.timing.tick_interval.as_millis(),
            "overlay engine starting"
        );

        let driver = Driver {
            state: EngineState::new(config.authorized, config.timing.poll_timeout),
            deps,
            display_tx,
            game_id: Arc::from(config.game_id.trim()),
            identity: Arc::from(config.identity.trim()),
        };
        let task = tokio::spawn(driver.run(config.timing, command_rx, stop_rx));

        EngineHandle { commands: command_tx, stop: Some(stop_tx), task: Some(task), display: display_rx }
    }
}

/// Owner's handle on a running engine. Dropping it aborts the driver.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    display: watch::Receiver<DisplayState>,
}

impl EngineHandle {
    /// Tell the engine whether a credential is present.
    pub fn set_authorized(&self, authorized: bool) {
        if let Err(e) = self.commands.try_send(Command::SetAuthorized(authorized)) {
            warn!(error = %e, "engine command dropped");
        }
    }

    /// Receiver that always holds the latest display.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.clone()
    }

    #[must_use]
    pub fn current_display(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the engine and wait for the driver to exit. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "overlay engine task failed");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    state: EngineState,
    deps: EngineDeps,
    display_tx: watch::Sender<DisplayState>,
    game_id: Arc<str>,
    identity: Arc<str>,
}

impl Driver {
    async fn run(
        mut self,
        timing: EngineTiming,
        mut commands: mpsc::Receiver<Command>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut poll_timer = tokio::time::interval(timing.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_timer = tokio::time::interval_at(Instant::now() + timing.tick_interval, timing.tick_interval);
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut polls: JoinSet<(u64, PollResult)> = JoinSet::new();
        let (image_tx, mut image_rx) = mpsc::unbounded_channel::<(String, Arc<TileImage>)>();

        self.publish();

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                command = commands.recv() => match command {
                    Some(Command::SetAuthorized(authorized)) => {
                        if self.state.set_authorized(authorized) {
                            self.publish();
                        }
                    }
                    None => break,
                },
                Some(joined) = polls.join_next() => self.on_poll_joined(joined, &image_tx),
                Some((key, image)) = image_rx.recv() => {
                    if self.state.apply_image(&key, image) {
                        self.publish();
                    }
                }
                _ = poll_timer.tick() => self.spawn_poll(&mut polls),
                _ = tick_timer.tick() => {
                    if self.state.tick(self.deps.clock.now()) {
                        self.publish();
                    }
                }
            }
        }

        polls.shutdown().await;
        self.display_tx.send_replace(DisplayState::disconnected());
        self.deps.sink.on_display_update(&DisplayState::disconnected());
        info!(game_id = %self.game_id, "overlay engine stopped");
    }

    fn spawn_poll(&mut self, polls: &mut JoinSet<(u64, PollResult)>) {
        let Some(seq) = self.state.begin_poll(Instant::now()) else {
            return;
        };
        let source = Arc::clone(&self.deps.source);
        let game_id = Arc::clone(&self.game_id);
        let identity = Arc::clone(&self.identity);
        let revision = self.state.revision().map(str::to_string);
        polls.spawn(async move {
            let result = source.poll_overlay(&game_id, &identity, revision.as_deref()).await;
            (seq, result)
        });
    }

    fn on_poll_joined(
        &mut self,
        joined: Result<(u64, PollResult), JoinError>,
        image_tx: &mpsc::UnboundedSender<(String, Arc<TileImage>)>,
    ) {
        let (seq, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "overlay poll task failed");
                self.state.abandon_outstanding();
                return;
            }
        };
        if let Some(request) = self.state.apply_poll(seq, result, self.deps.clock.now()) {
            self.request_image(request, image_tx);
        }
        self.publish();
    }

    fn request_image(&self, request: ImageRequest, image_tx: &mpsc::UnboundedSender<(String, Arc<TileImage>)>) {
        let tx = image_tx.clone();
        let key = request.key.clone();
        self.deps.images.fetch_async(&request.key, &request.url, move |image| {
            let _ = tx.send((key, image));
        });
    }

    fn publish(&self) {
        let display = self.state.display();
        self.display_tx.send_replace(display.clone());
        self.deps.sink.on_display_update(display);
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
