use crate::{
    error::{PlatformError, SendError, WoltbotError},
    message::InboundMessage,
    model::{Observation, VenueMatch},
};
use async_trait::async_trait;

/// Delivery platform client: where venue state comes from.
///
/// Implementations must be time-bounded; callers add their own timeout on
/// top as a second guard.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Human-readable platform name.
    fn name(&self) -> &str;

    /// Fetch the current state of the venue identified by `slug`.
    async fn fetch_state(&self, slug: &str) -> Result<Observation, PlatformError>;

    /// Free-text venue search.
    async fn search(&self, query: &str) -> Result<Vec<VenueMatch>, PlatformError>;
}

/// Messaging client: how commands arrive and notifications leave.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for inbound messages.
    /// Returns a bounded receiver that yields them in arrival order.
    async fn start(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<InboundMessage>, WoltbotError>;

    /// Send `text` to `chat_id`.
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SendError>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), WoltbotError> {
        Ok(())
    }
}
