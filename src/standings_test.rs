use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tokio::sync::Semaphore;

use super::*;
use crate::api::ApiError;

// =============================================================================
// MockState
// =============================================================================

/// Replays scripted state reads; the last one repeats.
struct MockState {
    script: Mutex<VecDeque<Result<String, ApiError>>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl MockState {
    fn new(script: Vec<Result<String, ApiError>>) -> Self {
        Self { script: Mutex::new(script.into()), calls: AtomicUsize::new(0), gate: None }
    }

    fn gated(script: Vec<Result<String, ApiError>>) -> Self {
        Self { gate: Some(Semaphore::new(0)), ..Self::new(script) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(100);
        }
    }
}

#[async_trait::async_trait]
impl StateSource for MockState {
    async fn fetch_state(&self, _game_id: &str) -> Result<String, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

fn standings(position: i64) -> Result<String, ApiError> {
    Ok(json!({ "teams": [{ "name": "Iron Squad", "position": position }] }).to_string())
}

fn start(source: &Arc<MockState>, interval: Duration) -> StandingsHandle {
    StandingsRefresher::start(Arc::clone(source) as Arc<dyn StateSource>, " game_1 ", interval)
}

fn position(view: &StandingsView) -> Option<i64> {
    view.as_ref()
        .and_then(|v| v.find_team("iron squad"))
        .map(|t| t.position)
}

async fn wait_for_position(rx: &mut watch::Receiver<StandingsView>, expected: i64) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| position(v) == Some(expected)))
        .await
        .expect("standings not reached in time")
        .expect("refresher dropped its view");
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

const HOUR: Duration = Duration::from_secs(3_600);

// =============================================================================
// refresh
// =============================================================================

#[tokio::test]
async fn first_read_is_immediate() {
    let source = Arc::new(MockState::new(vec![standings(4)]));
    let mut handle = start(&source, HOUR);
    let mut rx = handle.subscribe();

    wait_for_position(&mut rx, 4).await;
    assert_eq!(source.calls(), 1);
    handle.stop().await;
}

#[tokio::test]
async fn reads_repeat_on_the_interval() {
    let source = Arc::new(MockState::new(vec![standings(1), standings(2), standings(3)]));
    let mut handle = start(&source, Duration::from_millis(20));
    let mut rx = handle.subscribe();

    wait_for_position(&mut rx, 3).await;
    assert!(source.calls() >= 3);
    handle.stop().await;
}

#[tokio::test]
async fn refresh_now_reads_before_the_interval() {
    let source = Arc::new(MockState::new(vec![standings(10), standings(15)]));
    let mut handle = start(&source, HOUR);
    let mut rx = handle.subscribe();
    wait_for_position(&mut rx, 10).await;

    handle.refresh_now();
    wait_for_position(&mut rx, 15).await;
    assert_eq!(source.calls(), 2);
    handle.stop().await;
}

#[tokio::test]
async fn failed_read_keeps_previous_view() {
    let down = Err(ApiError::Status { status: 503, body: "down".into() });
    let source = Arc::new(MockState::new(vec![standings(7), down]));
    let mut handle = start(&source, Duration::from_millis(20));
    let rx = handle.subscribe();

    wait_until(|| source.calls() >= 3).await;
    assert_eq!(position(&rx.borrow()), Some(7));
    handle.stop().await;
}

// =============================================================================
// stop
// =============================================================================

#[tokio::test]
async fn stop_halts_reads_and_is_idempotent() {
    let source = Arc::new(MockState::new(vec![standings(1)]));
    let mut handle = start(&source, Duration::from_millis(20));
    wait_until(|| source.calls() >= 2).await;

    handle.stop().await;
    let after_stop = source.calls();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(source.calls(), after_stop);

    handle.stop().await;
}

#[tokio::test]
async fn stop_during_read_publishes_nothing() {
    let source = Arc::new(MockState::gated(vec![standings(9)]));
    let mut handle = start(&source, HOUR);
    let rx = handle.subscribe();
    wait_until(|| source.calls() == 1).await;

    handle.stop().await;
    source.release();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(rx.borrow().is_none());
}
