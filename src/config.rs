//! Client configuration parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8787";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_STANDINGS_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_IMAGE_WORKERS: usize = 2;
pub const DEFAULT_IMAGE_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid base URL '{0}': expected an http(s) URL")]
    InvalidBaseUrl(String),
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

/// HTTP timeouts for backend requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Timing of the engine's two loops and the standings refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTiming {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    /// An outstanding poll older than this no longer blocks the next one.
    pub poll_timeout: Duration,
    pub standings_interval: Duration,
}

impl Default for EngineTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            standings_interval: Duration::from_millis(DEFAULT_STANDINGS_INTERVAL_MS),
        }
    }
}

/// Image worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for ImagePoolConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_IMAGE_WORKERS, queue_capacity: DEFAULT_IMAGE_QUEUE_CAPACITY }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub webhook_url: Option<String>,
    pub game_id: Option<String>,
    pub auth_token: Option<String>,
    /// Team whose standing the session reports as "mine".
    pub team_name: Option<String>,
    /// Player handle sent as `rsn` on overlay polls.
    pub identity: String,
    pub timeouts: HttpTimeouts,
    pub timing: EngineTiming,
    pub images: ImagePoolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            webhook_url: None,
            game_id: None,
            auth_token: None,
            team_name: None,
            identity: String::new(),
            timeouts: HttpTimeouts {
                request_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
                connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            timing: EngineTiming::default(),
            images: ImagePoolConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build typed config from environment variables.
    ///
    /// All optional:
    /// - `TILESYNC_API_BASE_URL`: default `http://127.0.0.1:8787`
    /// - `TILESYNC_WEBHOOK_URL`, `TILESYNC_GAME_ID`, `TILESYNC_AUTH_TOKEN`,
    ///   `TILESYNC_TEAM`, `TILESYNC_PLAYER`
    /// - `TILESYNC_POLL_INTERVAL_MS` (5000), `TILESYNC_TICK_INTERVAL_MS`
    ///   (1000), `TILESYNC_POLL_TIMEOUT_MS` (10000)
    /// - `TILESYNC_STANDINGS_INTERVAL_MS` (30000)
    /// - `TILESYNC_REQUEST_TIMEOUT_SECS` (15), `TILESYNC_CONNECT_TIMEOUT_SECS` (5)
    /// - `TILESYNC_IMAGE_WORKERS` (2), `TILESYNC_IMAGE_QUEUE` (64)
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not http(s) or a count is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url =
            normalize_base_url(&env_string("TILESYNC_API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()))?;

        let timing = EngineTiming {
            poll_interval: Duration::from_millis(env_parse("TILESYNC_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)),
            tick_interval: Duration::from_millis(env_parse("TILESYNC_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS)),
            poll_timeout: Duration::from_millis(env_parse("TILESYNC_POLL_TIMEOUT_MS", DEFAULT_POLL_TIMEOUT_MS)),
            standings_interval: Duration::from_millis(env_parse(
                "TILESYNC_STANDINGS_INTERVAL_MS",
                DEFAULT_STANDINGS_INTERVAL_MS,
            )),
        };
        if timing.poll_interval.is_zero() {
            return Err(ConfigError::Zero { key: "TILESYNC_POLL_INTERVAL_MS" });
        }
        if timing.tick_interval.is_zero() {
            return Err(ConfigError::Zero { key: "TILESYNC_TICK_INTERVAL_MS" });
        }
        if timing.standings_interval.is_zero() {
            return Err(ConfigError::Zero { key: "TILESYNC_STANDINGS_INTERVAL_MS" });
        }

        let images = ImagePoolConfig {
            workers: env_parse("TILESYNC_IMAGE_WORKERS", DEFAULT_IMAGE_WORKERS),
            queue_capacity: env_parse("TILESYNC_IMAGE_QUEUE", DEFAULT_IMAGE_QUEUE_CAPACITY),
        };
        if images.workers == 0 {
            return Err(ConfigError::Zero { key: "TILESYNC_IMAGE_WORKERS" });
        }
        if images.queue_capacity == 0 {
            return Err(ConfigError::Zero { key: "TILESYNC_IMAGE_QUEUE" });
        }

        Ok(Self {
            api_base_url,
            webhook_url: env_string("TILESYNC_WEBHOOK_URL"),
            game_id: env_string("TILESYNC_GAME_ID"),
            auth_token: env_string("TILESYNC_AUTH_TOKEN"),
            team_name: env_string("TILESYNC_TEAM"),
            identity: env_string("TILESYNC_PLAYER").unwrap_or_default(),
            timeouts: HttpTimeouts {
                request_secs: env_parse("TILESYNC_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("TILESYNC_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            },
            timing,
            images,
        })
    }
}

/// Trim whitespace and trailing slashes; require an http(s) URL.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for anything else.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let parsed = reqwest::Url::parse(trimmed).map_err(|_| ConfigError::InvalidBaseUrl(raw.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Non-blank, trimmed value of `key`.
fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
