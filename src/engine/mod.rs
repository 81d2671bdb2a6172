//! Engine: wires the poller, the dispatcher, and command handling together.
//!
//! Three independent consumers share the store:
//! - the poll scheduler (`scheduler.rs`) queries the platform per watched venue
//! - the notification dispatcher (`dispatcher.rs`) drains the event queue
//! - inbound chat commands, each handled on its own task

mod dispatcher;
pub(crate) mod health;
mod scheduler;


use crate::commands::{self, Command, CommandContext};
use health::Health;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use woltbot_core::{
    config::Config,
    message::InboundMessage,
    model::VenueMatch,
    traits::{MessagingClient, PlatformClient},
};
use woltbot_store::Store;

/// Upper bound on commands handled at the same time.
const COMMAND_WORKERS: usize = 16;

/// The central engine.
pub struct Engine {
    pub(crate) store: Store,
    pub(crate) platform: Arc<dyn PlatformClient>,
    pub(crate) messenger: Arc<dyn MessagingClient>,
    pub(crate) config: Config,
    pub(crate) health: Health,
    pub(crate) uptime: Instant,
    /// Wakes the dispatcher as soon as the poller commits a change.
    pub(super) wakeup: Notify,
    /// Entities with an outstanding platform query.
    pub(super) in_flight: std::sync::Mutex<HashSet<i64>>,
    /// Last multi-hit `/monitor` search per chat, awaiting a numbered pick.
    pub(crate) searches: Mutex<HashMap<String, Vec<VenueMatch>>>,
    poll_permits: Arc<Semaphore>,
    dispatch_permits: Arc<Semaphore>,
    command_permits: Arc<Semaphore>,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Store,
        platform: Arc<dyn PlatformClient>,
        messenger: Arc<dyn MessagingClient>,
    ) -> Self {
        let health = Health::new(config.health.storage_failure_threshold);
        let poll_permits = Arc::new(Semaphore::new(config.poller.max_concurrent.max(1)));
        let dispatch_permits = Arc::new(Semaphore::new(config.dispatcher.max_concurrent.max(1)));
        Self {
            store,
            platform,
            messenger,
            config,
            health,
            uptime: Instant::now(),
            wakeup: Notify::new(),
            in_flight: std::sync::Mutex::new(HashSet::new()),
            searches: Mutex::new(HashMap::new()),
            poll_permits,
            dispatch_permits,
            command_permits: Arc::new(Semaphore::new(COMMAND_WORKERS)),
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(
            "woltbot engine running | platform: {} | messenger: {} | poll every {}s",
            self.platform.name(),
            self.messenger.name(),
            self.config.poller.interval_secs,
        );

        // A crash mid-send leaves rows in `sending`; never re-send those.
        let recovered = self.store.recover_interrupted_deliveries().await;
        self.health.record(&recovered);
        if let Err(e) = recovered {
            error!("failed to recover interrupted deliveries: {e}");
        }

        let mut rx = self
            .messenger
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start {}: {e}", self.messenger.name()))?;
        info!("Messenger started: {}", self.messenger.name());

        let poll_handle = tokio::spawn(self.clone().poll_loop());
        let dispatch_handle = tokio::spawn(self.clone().dispatch_loop());

        loop {
            tokio::select! {
                Some(incoming) = rx.recv() => {
                    let engine = self.clone();
                    let Ok(permit) = self.command_permits.clone().acquire_owned().await else {
                        break;
                    };
                    tokio::spawn(async move {
                        let _permit = permit;
                        engine.handle_message(incoming).await;
                    });
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.shutdown(&[poll_handle, dispatch_handle]).await;
        Ok(())
    }

    /// Stop background loops. Pending deliveries stay queued for the next start.
    async fn shutdown(&self, handles: &[JoinHandle<()>]) {
        info!("Shutting down...");
        for handle in handles {
            handle.abort();
        }
        if let Err(e) = self.messenger.stop().await {
            warn!("failed to stop {}: {e}", self.messenger.name());
        }
        info!("Shutdown complete.");
    }

    /// Handle one inbound chat message and reply if it was a command.
    pub(crate) async fn handle_message(&self, incoming: InboundMessage) {
        let Some(cmd) = Command::parse(&incoming.text) else {
            debug!("ignoring free text from chat {}", incoming.chat_id);
            return;
        };
        debug!(
            "command {cmd:?} from user {} in chat {}",
            incoming.sender_id, incoming.chat_id
        );

        let ctx = CommandContext {
            store: &self.store,
            platform: self.platform.as_ref(),
            health: &self.health,
            searches: &self.searches,
            chat_id: &incoming.chat_id,
            text: &incoming.text,
            uptime: &self.uptime,
            timeout: Duration::from_secs(self.config.poller.timeout_secs.max(1)),
        };
        let reply = commands::handle(cmd, &ctx).await;
        self.reply(&incoming.chat_id, &reply).await;
    }

    /// Best-effort direct reply to a command.
    async fn reply(&self, chat_id: &str, text: &str) {
        let timeout = Duration::from_secs(self.config.dispatcher.send_timeout_secs.max(1));
        match tokio::time::timeout(timeout, self.messenger.send(chat_id, text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to reply to chat {chat_id}: {e}"),
            Err(_) => warn!("reply to chat {chat_id} timed out"),
        }
    }
}
