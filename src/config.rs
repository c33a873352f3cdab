use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// PostgreSQL database connection URL. When unset the in-memory store is used.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Redis connection URL (catalog cache)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// TMDB API key. When unset, item details come from the local items table.
    #[serde(default)]
    pub tmdb_api_key: Option<String>,

    /// TMDB API base URL
    #[serde(default = "default_tmdb_api_url")]
    pub tmdb_api_url: String,

    /// Prefix prepended to TMDB poster paths
    #[serde(default = "default_tmdb_image_base_url")]
    pub tmdb_image_base_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on a single notification delivery, in milliseconds
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    /// Upper bound on a single HTTP request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts made by an idempotent write before a uniqueness conflict is surfaced
    #[serde(default = "default_conflict_retry_attempts")]
    pub conflict_retry_attempts: u32,

    /// Base backoff between conflict retries, in milliseconds
    #[serde(default = "default_conflict_retry_backoff_ms")]
    pub conflict_retry_backoff_ms: u64,

    /// Largest candidate list a caller may ask for
    #[serde(default = "default_max_candidate_limit")]
    pub max_candidate_limit: usize,

    /// Candidate list size when the caller gives no usable limit
    #[serde(default = "default_candidate_limit")]
    pub default_candidate_limit: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_tmdb_api_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_tmdb_image_base_url() -> String {
    "https://image.tmdb.org/t/p/w500".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_notify_timeout_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_conflict_retry_attempts() -> u32 {
    3
}

fn default_conflict_retry_backoff_ms() -> u64 {
    25
}

fn default_max_candidate_limit() -> usize {
    100
}

fn default_candidate_limit() -> usize {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: default_redis_url(),
            tmdb_api_key: None,
            tmdb_api_url: default_tmdb_api_url(),
            tmdb_image_base_url: default_tmdb_image_base_url(),
            host: default_host(),
            port: default_port(),
            notify_timeout_ms: default_notify_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            conflict_retry_attempts: default_conflict_retry_attempts(),
            conflict_retry_backoff_ms: default_conflict_retry_backoff_ms(),
            max_candidate_limit: default_max_candidate_limit(),
            default_candidate_limit: default_candidate_limit(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn conflict_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_retry_backoff_ms)
    }
}
