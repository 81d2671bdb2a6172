//! Long-polling update loop and MessagingClient trait implementation.

use super::types::{TgResponse, TgUpdate};
use super::TelegramChannel;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use woltbot_core::{
    error::{SendError, WoltbotError},
    message::InboundMessage,
    traits::MessagingClient,
};

/// Server-side long-poll wait, seconds.
const POLL_TIMEOUT_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 60;

#[async_trait]
impl MessagingClient for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>, WoltbotError> {
        if self.config.bot_token.is_empty() {
            return Err(WoltbotError::Config(
                "telegram bot token is not configured".into(),
            ));
        }
        self.register_commands().await;

        let (tx, rx) = mpsc::channel(64);
        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let allowed_users = self.config.allowed_users.clone();
        let last_update_id = self.last_update_id.clone();

        info!("Telegram channel starting long polling...");

        tokio::spawn(async move {
            let mut backoff_secs: u64 = 1;

            loop {
                let last = last_update_id.lock().await;
                let offset = last.map(|id| id + 1);
                drop(last);

                let mut url = format!("{base_url}/getUpdates?timeout={POLL_TIMEOUT_SECS}");
                if let Some(off) = offset {
                    url.push_str(&format!("&offset={off}"));
                }

                let resp = match client
                    .get(&url)
                    .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 5))
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        error!("telegram poll error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                };

                let body: TgResponse<Vec<TgUpdate>> = match resp.json().await {
                    Ok(b) => b,
                    Err(e) => {
                        error!("telegram parse error (retry in {backoff_secs}s): {e}");
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                };

                if !body.ok {
                    error!(
                        "telegram API error (retry in {backoff_secs}s): {}",
                        body.description.unwrap_or_default()
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }

                // Successful poll -- reset backoff.
                backoff_secs = 1;

                let updates = body.result.unwrap_or_default();

                if let Some(last_update) = updates.last() {
                    *last_update_id.lock().await = Some(last_update.update_id);
                }

                for update in updates {
                    let Some(inbound) = to_inbound(update, &allowed_users) else {
                        continue;
                    };
                    if tx.send(inbound).await.is_err() {
                        info!("telegram channel receiver dropped, stopping poll");
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        let chat_id: i64 = chat_id.parse().map_err(|e| {
            SendError::PermanentlyUnreachable(format!("invalid telegram chat_id '{chat_id}': {e}"))
        })?;
        self.send_message(chat_id, text).await
    }

    async fn stop(&self) -> Result<(), WoltbotError> {
        info!("Telegram channel stopped");
        Ok(())
    }
}

/// Convert an update into an inbound message.
///
/// Drops non-text updates and senders outside `allowed_users` (when set).
pub(crate) fn to_inbound(update: TgUpdate, allowed_users: &[i64]) -> Option<InboundMessage> {
    let msg = update.message?;
    let text = msg.text?;
    let user = msg.from?;

    if !allowed_users.is_empty() && !allowed_users.contains(&user.id) {
        warn!("ignoring message from unauthorized user {}", user.id);
        return None;
    }
    debug!("telegram: message from {} in chat {}", user.id, msg.chat.id);

    Some(InboundMessage::new(
        &msg.chat.id.to_string(),
        &user.id.to_string(),
        &text,
    ))
}
