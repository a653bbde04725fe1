use std::sync::{Arc, Mutex, PoisonError};

use clap::{Parser, Subcommand};
use tilesync::api::RemoteStateClient;
use tilesync::api::types::CreateGameRequest;
use tilesync::config::{ClientConfig, ConfigError, normalize_base_url};
use tilesync::display::{DisplaySink, DisplayState};
use tilesync::game_state::GameStateView;
use tilesync::image_cache::ImageCache;
use tilesync::session::{Session, SessionError};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] tilesync::api::ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("missing game id; pass --game-id or set TILESYNC_GAME_ID")]
    MissingGameId,
    #[error("backend did not return a game id")]
    NoGameCreated,
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "tilesync", about = "Follow and play a tile board game from the terminal")]
struct Cli {
    #[arg(long, env = "TILESYNC_API_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "TILESYNC_GAME_ID")]
    game_id: Option<String>,

    /// Player handle sent with overlay polls and registrations.
    #[arg(long, env = "TILESYNC_PLAYER")]
    player: Option<String>,

    #[arg(long, env = "TILESYNC_AUTH_TOKEN")]
    token: Option<String>,

    /// Team to report as your own in standings.
    #[arg(long, env = "TILESYNC_TEAM")]
    team: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the overlay and standings until Ctrl-C.
    Watch,
    /// Print team standings.
    State,
    Create {
        #[arg(long)]
        clan: String,
        #[arg(long)]
        host_password: String,
        #[arg(long, default_value_t = 100)]
        board_size: u32,
        #[arg(long, default_value = "")]
        board_url: String,
    },
    Register {
        #[arg(long)]
        team: String,
        #[arg(long)]
        password: String,
    },
    Roll,
    Proof {
        url: String,
    },
}

/// Prints a line whenever the visible text changes.
#[derive(Default)]
struct ConsoleSink {
    last: Mutex<Option<(String, String, String)>>,
}

impl DisplaySink for ConsoleSink {
    fn on_display_update(&self, state: &DisplayState) {
        let line = (state.status.clone(), state.countdown.clone(), state.tile_summary.clone());
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&line) {
            return;
        }
        let (status, countdown, tile) = &line;
        let image = state
            .image
            .as_ref()
            .map(|img| format!(" [{}x{}]", img.width(), img.height()))
            .unwrap_or_default();
        println!("{status:<18} {countdown:>8}  {tile}{image}");
        *last = Some(line);
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url.as_deref() {
        config.api_base_url = normalize_base_url(base_url)?;
    }
    if let Some(player) = cli.player {
        config.identity = player.trim().to_string();
    }
    if let Some(game_id) = cli.game_id {
        config.game_id = Some(game_id);
    }
    if let Some(token) = cli.token {
        config.auth_token = Some(token);
    }
    if let Some(team) = cli.team {
        config.team_name = Some(team);
    }

    let client = RemoteStateClient::from_config(&config)?;
    let images = ImageCache::new(Arc::new(client.clone()), config.images);
    let mut session = Session::new(client, images.clone(), Arc::new(ConsoleSink::default()), &config);

    let result = run(&mut session, &config, cli.command).await;
    session.disconnect().await;
    images.shutdown();
    result
}

async fn run(session: &mut Session, config: &ClientConfig, command: Command) -> Result<(), CliError> {
    if let Command::Create { clan, host_password, board_size, board_url } = command {
        let request = CreateGameRequest { clan_name: clan, host_password, board_size, board_url };
        let outcome = session.create_game(&request).await?;
        let game_id = outcome.game_id.ok_or(CliError::NoGameCreated)?;
        println!("game created: {game_id}");
        return Ok(());
    }

    let game_id = config
        .game_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(CliError::MissingGameId)?;
    session.connect(game_id).await;

    match command {
        Command::Watch => watch(session).await?,
        Command::State => {
            let view = session.refresh_state().await?;
            if view.finished {
                println!("game finished");
            }
            for team in &view.teams {
                let marker = if team.awaiting_proof { " (awaiting proof)" } else { "" };
                println!(
                    "{:>4}  {:<24} {} [{}]{marker}",
                    team.position, team.name, team.active_tile_title, team.active_tile_kind
                );
            }
            print_my_team(session, &view);
        }
        Command::Register { team, password } => {
            let outcome = session.register(&team, &password).await?;
            println!("in team: {}", session.team_name().unwrap_or(&team));
            if let Some(token) = outcome.token {
                println!("token: {token}");
            }
        }
        Command::Roll => {
            let roll = session.roll().await?;
            println!("rolled {}: {} -> {}", roll.roll, roll.from, roll.to);
            if roll.awaiting_proof {
                println!("proof required");
            }
            print_my_team(session, &session.refresh_state().await?);
        }
        Command::Proof { url } => {
            let proof = session.submit_proof(&url).await?;
            if proof.finished {
                println!("finished - winner: {}", proof.winner.as_deref().unwrap_or("unknown"));
            } else {
                println!("proof submitted");
            }
            print_my_team(session, &session.refresh_state().await?);
        }
        Command::Create { .. } => {}
    }
    Ok(())
}

/// Wait for Ctrl-C, printing the own-team line whenever standings change.
async fn watch(session: &Session) -> Result<(), CliError> {
    let Some(mut standings) = session.subscribe_standings() else {
        tokio::signal::ctrl_c().await?;
        return Ok(());
    };
    let mut last = None;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                return Ok(());
            }
            changed = standings.changed() => {
                if changed.is_err() {
                    tokio::signal::ctrl_c().await?;
                    return Ok(());
                }
                let Some(view) = standings.borrow_and_update().clone() else {
                    continue;
                };
                let line = my_team_line(session, &view);
                if last.as_ref() != Some(&line) {
                    println!("{line}");
                    last = Some(line);
                }
            }
        }
    }
}

fn print_my_team(session: &Session, view: &GameStateView) {
    println!("{}", my_team_line(session, view));
}

fn my_team_line(session: &Session, view: &GameStateView) -> String {
    let mine = session.my_team(view);
    let status = view.status_for(mine);
    match mine {
        Some(team) => format!("{}: {} - {} - {status}", team.name, team.tile_line(), team.active_tile_title),
        None => match session.team_name() {
            Some(name) => format!("{name}: not in standings - {status}"),
            None => status.to_string(),
        },
    }
}
