use serde::{Deserialize, Serialize};

/// An inbound chat message that may carry a bot command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Destination for replies and notifications (e.g. Telegram chat_id).
    pub chat_id: String,
    /// Platform-specific user ID.
    pub sender_id: String,
    /// Raw message text.
    pub text: String,
}

impl InboundMessage {
    pub fn new(chat_id: &str, sender_id: &str, text: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
        }
    }
}
