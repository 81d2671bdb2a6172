use serde::{Deserialize, Serialize};

use super::defaults::*;

/// Telegram bot config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Telegram user IDs allowed to talk to the bot. Empty = allow all.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

/// Wolt platform config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WoltConfig {
    #[serde(default = "default_wolt_base_url")]
    pub base_url: String,
    /// Search requires a location; results are ranked around it.
    #[serde(default = "default_wolt_lat")]
    pub lat: f64,
    #[serde(default = "default_wolt_lon")]
    pub lon: f64,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for WoltConfig {
    fn default() -> Self {
        Self {
            base_url: default_wolt_base_url(),
            lat: default_wolt_lat(),
            lon: default_wolt_lon(),
            timeout_secs: default_request_timeout(),
        }
    }
}
