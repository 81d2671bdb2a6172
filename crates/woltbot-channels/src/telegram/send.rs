//! Outbound messages, failure classification, and command registration.

use super::types::TgResponse;
use super::TelegramChannel;
use std::time::Duration;
use tracing::{info, warn};
use woltbot_core::error::SendError;

/// Telegram's per-message text limit.
const MAX_MESSAGE_LEN: usize = 4096;

/// Error descriptions meaning the chat will never accept messages again.
const GONE_MARKERS: &[&str] = &[
    "chat not found",
    "user is deactivated",
    "bot was kicked",
    "bot was blocked",
    "bot can't initiate conversation",
    "group chat was upgraded",
];

impl TelegramChannel {
    /// Send a plain-text message, splitting it at Telegram's length limit.
    pub(crate) async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        let url = format!("{}/sendMessage", self.base_url);

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let body = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            let resp = self
                .client
                .post(&url)
                .json(&body)
                .timeout(Duration::from_secs(30))
                .send()
                .await
                .map_err(|e| SendError::Unreachable(format!("telegram send failed: {e}")))?;

            let status = resp.status();
            if status.is_success() {
                continue;
            }

            let parsed: Option<TgResponse<serde_json::Value>> = resp.json().await.ok();
            let (code, description, retry_after) = match parsed {
                Some(r) => (
                    r.error_code.unwrap_or(status.as_u16()),
                    r.description.unwrap_or_default(),
                    r.parameters.and_then(|p| p.retry_after),
                ),
                None => (status.as_u16(), String::new(), None),
            };
            warn!("telegram send to {chat_id} got {code}: {description}");
            return Err(classify_failure(code, &description, retry_after));
        }

        Ok(())
    }

    /// Register bot commands with Telegram so users see an autocomplete menu.
    /// Best-effort: logs failures but does not propagate errors.
    pub(crate) async fn register_commands(&self) {
        let commands = serde_json::json!({
            "commands": [
                { "command": "start", "description": "How to use this bot" },
                { "command": "help", "description": "Show available commands" },
                { "command": "monitor", "description": "Search a restaurant by name and watch it" },
                { "command": "subscribe", "description": "Watch a restaurant by its Wolt slug" },
                { "command": "unsubscribe", "description": "Stop watching a restaurant" },
                { "command": "list", "description": "Restaurants you are watching" },
                { "command": "stats", "description": "Waiting statistics" },
                { "command": "status", "description": "Bot health and your watch count" },
            ]
        });

        let url = format!("{}/setMyCommands", self.base_url);
        match self.client.post(&url).json(&commands).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!("registered Telegram bot commands");
            }
            Ok(resp) => {
                let body = resp.text().await.unwrap_or_default();
                warn!("failed to register Telegram bot commands: {body}");
            }
            Err(e) => {
                warn!("failed to register Telegram bot commands: {e}");
            }
        }
    }
}

/// Map a failed Bot API call to a delivery outcome.
pub(crate) fn classify_failure(
    code: u16,
    description: &str,
    retry_after: Option<u64>,
) -> SendError {
    if code == 429 {
        return SendError::RateLimited {
            retry_after: retry_after.map(Duration::from_secs),
        };
    }

    let lower = description.to_lowercase();
    if code == 403 || GONE_MARKERS.iter().any(|m| lower.contains(m)) {
        return SendError::PermanentlyUnreachable(format!("{code}: {description}"));
    }

    SendError::Unreachable(format!("{code}: {description}"))
}

/// Split a long message into chunks that respect Telegram's limit.
///
/// Prefers breaking after a newline; never splits inside a UTF-8 character.
pub(crate) fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        let break_at = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .map(|i| start + i + 1)
                .unwrap_or(end)
        } else {
            end
        };
        chunks.push(&text[start..break_at]);
        start = break_at;
    }

    chunks
}
