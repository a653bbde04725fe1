use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

use super::*;
use crate::config::{HttpTimeouts, ImagePoolConfig};

struct NullSink;

impl DisplaySink for NullSink {
    fn on_display_update(&self, _state: &DisplayState) {}
}

async fn register(Path(id): Path<String>, body: String) -> Response {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    if body["teamName"] == "Full" {
        return (StatusCode::CONFLICT, "team full").into_response();
    }
    if body["teamName"] == "Ghost" {
        return axum::Json(json!({})).into_response();
    }
    axum::Json(json!({ "token": format!("tok-{id}"), "teamName": "Iron Squad", "rsn": body["rsn"] })).into_response()
}

async fn roll(headers: HeaderMap) -> Response {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
    if !auth.starts_with("Bearer tok-") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    axum::Json(json!({ "roll": 5, "from": 10, "to": 15, "awaitingProof": true })).into_response()
}

fn router(state_reads: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/games", post(|| async { axum::Json(json!({ "gameId": "game_new" })) }))
        .route(
            "/games/{id}/overlay",
            get(|| async { axum::Json(json!({ "phase": "running", "tile": { "tileIndex": 8, "title": "Task" } })) }),
        )
        .route(
            "/games/{id}/state",
            get(move || {
                state_reads.fetch_add(1, Ordering::SeqCst);
                async {
                    axum::Json(json!({
                        "teams": [{
                            "name": "Iron Squad",
                            "position": 15,
                            "awaitingProof": true,
                            "activeTile": { "title": "Kill a dragon", "kind": "ladder" }
                        }]
                    }))
                }
            }),
        )
        .route("/games/{id}/register", post(register))
        .route("/games/{id}/roll", post(roll))
        .route("/games/{id}/proof", post(|| async { axum::Json(json!({ "finished": true, "winner": "Iron Squad" })) }))
}

async fn session_with(config: ClientConfig) -> Session {
    session_counting_reads(config).await.0
}

/// Session plus a count of state reads the backend served.
async fn session_counting_reads(config: ClientConfig) -> (Session, Arc<AtomicUsize>) {
    let state_reads = Arc::new(AtomicUsize::new(0));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = router(Arc::clone(&state_reads));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let timeouts = HttpTimeouts { request_secs: 5, connect_secs: 2 };
    let client = RemoteStateClient::new(&base, None, timeouts).unwrap();
    let images = ImageCache::new(Arc::new(client.clone()), ImagePoolConfig::default());
    (Session::new(client, images, Arc::new(NullSink), &config), state_reads)
}

fn config() -> ClientConfig {
    let mut config = ClientConfig { identity: "Zezima".into(), ..ClientConfig::default() };
    config.timing.poll_interval = Duration::from_millis(50);
    config.timing.tick_interval = Duration::from_millis(20);
    config
}

async fn session() -> Session {
    session_with(config()).await
}

// =============================================================================
// connection
// =============================================================================

#[tokio::test]
async fn starts_disconnected() {
    let s = session().await;
    assert_eq!(s.state(), &ConnectionState::Disconnected);
    assert!(s.subscribe().is_none());
}

#[tokio::test]
async fn blank_connect_is_noop() {
    let mut s = session().await;
    s.connect("   ").await;
    assert_eq!(s.state(), &ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_starts_engine_that_reaches_backend() {
    let mut s = session().await;
    s.connect(" game_1 ").await;
    assert_eq!(s.game_id(), Some("game_1"));

    let mut rx = s.subscribe().unwrap();
    let shown = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|d| d.tile_summary == "Tile 8"))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(shown.status, "Running");
    s.disconnect().await;
}

#[tokio::test]
async fn disconnect_stops_engine_and_is_idempotent() {
    let mut s = session().await;
    s.connect("game_1").await;
    let rx = s.subscribe().unwrap();

    s.disconnect().await;
    assert_eq!(s.state(), &ConnectionState::Disconnected);
    assert!(s.subscribe().is_none());
    assert_eq!(*rx.borrow(), DisplayState::disconnected());

    s.disconnect().await;
    assert_eq!(s.state(), &ConnectionState::Disconnected);
}

#[tokio::test]
async fn configured_token_survives_connect_to_its_game() {
    let mut s = session_with(ClientConfig {
        game_id: Some("game_1".into()),
        auth_token: Some(" tok-game_1 ".into()),
        ..config()
    })
    .await;
    s.connect("game_1").await;
    assert_eq!(s.auth_token(), Some("tok-game_1"));
    s.disconnect().await;
}

#[tokio::test]
async fn switching_games_clears_credential() {
    let mut s = session().await;
    s.connect("game_1").await;
    s.register("Iron", "pw").await.unwrap();
    assert!(s.auth_token().is_some());

    s.connect("game_2").await;
    assert_eq!(s.auth_token(), None);
    assert_eq!(s.team_name(), None);
    assert!(matches!(s.roll().await, Err(SessionError::NotAuthorized)));
    s.disconnect().await;
}

// =============================================================================
// actions
// =============================================================================

#[tokio::test]
async fn actions_require_connection() {
    let mut s = session().await;
    assert!(matches!(s.roll().await, Err(SessionError::NotConnected)));
    assert!(matches!(s.submit_proof("https://p").await, Err(SessionError::NotConnected)));
    assert!(matches!(s.refresh_state().await, Err(SessionError::NotConnected)));
    assert!(matches!(s.register("a", "b").await, Err(SessionError::NotConnected)));
}

#[tokio::test]
async fn roll_requires_credential() {
    let mut s = session().await;
    s.connect("game_1").await;
    assert!(matches!(s.roll().await, Err(SessionError::NotAuthorized)));
    assert!(matches!(s.submit_proof("https://p").await, Err(SessionError::NotAuthorized)));
    s.disconnect().await;
}

#[tokio::test]
async fn register_stores_token_then_roll_and_proof_succeed() {
    let mut s = session().await;
    s.connect("game_1").await;

    let registered = s.register(" Iron ", "pw").await.unwrap();
    assert_eq!(registered.token.as_deref(), Some("tok-game_1"));
    assert_eq!(s.auth_token(), Some("tok-game_1"));
    assert_eq!(s.team_name(), Some("Iron Squad"));

    let rolled = s.roll().await.unwrap();
    assert_eq!(rolled, RollOutcome { roll: 5, from: 10, to: 15, awaiting_proof: true });

    let proof = s.submit_proof("https://proof.test/1").await.unwrap();
    assert!(proof.finished);
    assert_eq!(proof.winner.as_deref(), Some("Iron Squad"));
    s.disconnect().await;
}

#[tokio::test]
async fn register_without_token_is_rejected() {
    let mut s = session().await;
    s.connect("game_1").await;
    assert!(matches!(s.register("Ghost", "pw").await, Err(SessionError::MissingToken)));
    assert_eq!(s.auth_token(), None);
    s.disconnect().await;
}

#[tokio::test]
async fn register_conflict_surfaces_api_status() {
    let mut s = session().await;
    s.connect("game_1").await;
    let err = s.register("Full", "pw").await.unwrap_err();
    assert!(matches!(err, SessionError::Api(ApiError::Status { status: 409, .. })));
    s.disconnect().await;
}

#[tokio::test]
async fn blank_token_clears_credential() {
    let mut s = session().await;
    s.connect("game_1").await;
    s.set_auth_token(Some("tok-game_1"));
    assert!(s.roll().await.is_ok());
    s.set_auth_token(Some("  "));
    assert_eq!(s.auth_token(), None);
    s.disconnect().await;
}

#[tokio::test]
async fn refresh_state_parses_standings() {
    let mut s = session().await;
    s.connect("game_1").await;
    let view = s.refresh_state().await.unwrap();
    assert_eq!(view.find_team("iron squad").map(|t| t.position), Some(15));
    s.disconnect().await;
}

#[tokio::test]
async fn create_game_needs_no_connection() {
    let s = session().await;
    let request = CreateGameRequest {
        clan_name: "Clan".into(),
        host_password: "pw".into(),
        board_size: 100,
        board_url: String::new(),
    };
    let outcome = s.create_game(&request).await.unwrap();
    assert_eq!(outcome.game_id.as_deref(), Some("game_new"));
    assert_eq!(s.state(), &ConnectionState::Disconnected);
}

// =============================================================================
// standings
// =============================================================================

async fn wait_for_view(rx: &mut watch::Receiver<StandingsView>) -> Arc<GameStateView> {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(Option::is_some))
        .await
        .expect("standings not reached in time")
        .expect("refresher dropped its view")
        .clone()
        .unwrap()
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

#[tokio::test]
async fn connect_refreshes_standings_and_finds_own_team() {
    let mut s = session().await;
    assert!(s.subscribe_standings().is_none());
    s.connect("game_1").await;
    s.register("Iron", "pw").await.unwrap();

    let view = wait_for_view(&mut s.subscribe_standings().unwrap()).await;
    let mine = s.my_team(&view).unwrap();
    assert_eq!(mine.tile_line(), "Tile 15 (ladder)");
    assert_eq!(mine.active_tile_title, "Kill a dragon");
    assert_eq!(view.status_for(Some(mine)), "Awaiting proof");
    s.disconnect().await;
}

#[tokio::test]
async fn configured_team_name_is_found_without_register() {
    let mut s = session_with(ClientConfig {
        game_id: Some("game_1".into()),
        team_name: Some(" iron squad ".into()),
        ..config()
    })
    .await;
    s.connect("game_1").await;
    let view = s.refresh_state().await.unwrap();
    assert_eq!(s.my_team(&view).map(|t| t.position), Some(15));
    s.disconnect().await;
}

#[tokio::test]
async fn spectator_has_no_team() {
    let mut s = session().await;
    s.connect("game_1").await;
    let view = s.refresh_state().await.unwrap();
    assert!(s.my_team(&view).is_none());
    assert_eq!(view.status_for(None), "Spectating");
    s.disconnect().await;
}

#[tokio::test]
async fn standings_refresh_periodically() {
    let mut config = config();
    config.timing.standings_interval = Duration::from_millis(30);
    let (mut s, reads) = session_counting_reads(config).await;
    s.connect("game_1").await;

    wait_until(|| reads.load(Ordering::SeqCst) >= 3).await;
    s.disconnect().await;
}

#[tokio::test]
async fn roll_and_proof_refresh_standings() {
    let (mut s, reads) = session_counting_reads(config()).await;
    s.connect("game_1").await;
    s.register("Iron", "pw").await.unwrap();
    wait_for_view(&mut s.subscribe_standings().unwrap()).await;
    let initial = reads.load(Ordering::SeqCst);

    s.roll().await.unwrap();
    wait_until(|| reads.load(Ordering::SeqCst) > initial).await;
    let after_roll = reads.load(Ordering::SeqCst);

    s.submit_proof("https://proof.test/1").await.unwrap();
    wait_until(|| reads.load(Ordering::SeqCst) > after_roll).await;
    s.disconnect().await;
}

#[tokio::test]
async fn disconnect_stops_standings_refresh() {
    let mut config = config();
    config.timing.standings_interval = Duration::from_millis(20);
    let (mut s, reads) = session_counting_reads(config).await;
    s.connect("game_1").await;
    let mut rx = s.subscribe_standings().unwrap();
    wait_until(|| reads.load(Ordering::SeqCst) >= 2).await;

    s.disconnect().await;
    assert!(s.subscribe_standings().is_none());
    let after = reads.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(reads.load(Ordering::SeqCst), after);

    // The refresher's sender is gone.
    let closed = tokio::time::timeout(Duration::from_secs(1), async { while rx.changed().await.is_ok() {} }).await;
    assert!(closed.is_ok());
}
