mod channels;
mod defaults;


pub use channels::*;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::WoltbotError;
use defaults::*;

/// Environment variable that overrides `telegram.bot_token`.
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Top-level woltbot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub wolt: WoltConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

/// General bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = WoltbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(WoltbotError::Config(format!(
                "unsupported storage backend '{other}': only sqlite is available, \
                 run with `-i sqlite` or set [storage].backend = \"sqlite\""
            ))),
        }
    }
}

/// Storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            db_path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl StorageConfig {
    /// Resolve the configured backend name.
    pub fn backend(&self) -> Result<StorageBackend, WoltbotError> {
        self.backend.parse()
    }
}

/// Poll scheduler config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Upper bound on concurrent platform queries.
    #[serde(default = "default_poll_concurrency")]
    pub max_concurrent: usize,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// How long an entity with zero subscribers survives before cleanup.
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_secs: u64,
    /// How long fully processed notification events are kept.
    #[serde(default = "default_event_retention")]
    pub event_retention_hours: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            max_concurrent: default_poll_concurrency(),
            timeout_secs: default_request_timeout(),
            orphan_grace_secs: default_orphan_grace(),
            event_retention_hours: default_event_retention(),
        }
    }
}

/// Notification dispatcher config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_dispatch_interval")]
    pub interval_secs: u64,
    /// Upper bound on concurrent chat deliveries.
    #[serde(default = "default_dispatch_concurrency")]
    pub max_concurrent: usize,
    /// Attempts per (event, chat) before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_dispatch_interval(),
            max_concurrent: default_dispatch_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl DispatcherConfig {
    /// Delay before retry number `attempts` (1-based), honoring a
    /// server-provided `retry_after` when it is longer.
    pub fn backoff(&self, attempts: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        let secs = self
            .backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_secs);
        let computed = Duration::from_secs(secs);
        match retry_after {
            Some(server) if server > computed => server,
            _ => computed,
        }
    }
}

/// Health signal config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive storage failures before the process reports unhealthy.
    #[serde(default = "default_storage_failure_threshold")]
    pub storage_failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            storage_failure_threshold: default_storage_failure_threshold(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist. The bot token from
/// `TELEGRAM_BOT_TOKEN` wins over the file.
pub fn load(path: &str) -> Result<Config, WoltbotError> {
    let path = Path::new(path);
    let mut config = if !path.exists() {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    } else {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WoltbotError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse(&content)?
    };

    if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
        if !token.trim().is_empty() {
            config.telegram.bot_token = token.trim().to_string();
        }
    }

    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, WoltbotError> {
    toml::from_str(content).map_err(|e| WoltbotError::Config(format!("failed to parse config: {e}")))
}
