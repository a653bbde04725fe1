//! Periodic standings refresh for the connected game.
//!
//! DESIGN
//! ======
//! One task per connection reads `GET /games/{id}/state` on a fixed interval
//! (first read immediately) and on demand after actions that move a team.
//! The latest parsed view is published on a watch channel; a failed read is
//! logged and the previous view stays.
//!
//! SHUTDOWN
//! ========
//! `StandingsHandle::stop` works like the engine's: signal, then await the
//! task. A read in progress is dropped, so nothing is published after `stop`
//! returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::StateSource;
use crate::game_state::GameStateView;

/// Latest standings; `None` until the first successful read.
pub type StandingsView = Option<Arc<GameStateView>>;

pub struct StandingsRefresher;

impl StandingsRefresher {
    /// Spawn the refresh task for `game_id`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(source: Arc<dyn StateSource>, game_id: &str, interval: Duration) -> StandingsHandle {
        let (view_tx, view_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let refresh = Arc::new(Notify::new());
        let game_id: Arc<str> = Arc::from(game_id.trim());

        info!(game_id = %game_id, interval_ms = interval.as_millis(), "standings refresh starting");
        let task = tokio::spawn(run(source, game_id, interval, Arc::clone(&refresh), view_tx, stop_rx));

        StandingsHandle { refresh, stop: Some(stop_tx), task: Some(task), view: view_rx }
    }
}

/// Owner's handle on a running refresher. Dropping it aborts the task.
pub struct StandingsHandle {
    refresh: Arc<Notify>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    view: watch::Receiver<StandingsView>,
}

impl StandingsHandle {
    /// Read the standings now instead of waiting for the next interval.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StandingsView> {
        self.view.clone()
    }

    /// Stop refreshing and wait for the task to exit. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "standings task failed");
            }
        }
    }
}

impl Drop for StandingsHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    source: Arc<dyn StateSource>,
    game_id: Arc<str>,
    interval: Duration,
    refresh: Arc<Notify>,
    view_tx: watch::Sender<StandingsView>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            () = refresh.notified() => debug!(game_id = %game_id, "standings refresh requested"),
            _ = timer.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = &mut stop => break,
            result = source.fetch_state(&game_id) => result,
        };
        match result {
            Ok(body) => {
                view_tx.send_replace(Some(Arc::new(GameStateView::parse(&body))));
            }
            Err(e) => warn!(game_id = %game_id, status = ?e.status(), error = %e, "standings refresh failed"),
        }
    }
    debug!(game_id = %game_id, "standings refresh stopped");
}

#[cfg(test)]
#[path = "standings_test.rs"]
mod tests;
