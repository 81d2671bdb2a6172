//! Notification dispatcher: drains the event queue into chat deliveries.
//!
//! Each entity contributes only its oldest unprocessed event per round, so
//! transitions of one venue reach chats in commit order. Deliveries of one
//! event run concurrently, bounded by the dispatcher's permit pool.

use super::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use woltbot_core::{
    error::WoltbotError,
    model::{sql_time, EntityStatus, NotificationEvent},
};
use woltbot_store::DeliveryStatus;

impl Engine {
    /// Background task: dispatch on every tick, or as soon as the poller
    /// commits a change.
    pub(super) async fn dispatch_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.dispatcher.interval_secs.max(1));
        loop {
            self.dispatch_tick().await;
            tokio::select! {
                _ = self.wakeup.notified() => {}
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    /// Process queue heads until a round completes no event.
    pub(crate) async fn dispatch_tick(self: &Arc<Self>) {
        loop {
            let heads = self.store.pending_heads().await;
            self.health.record(&heads);
            let heads = match heads {
                Ok(h) => h,
                Err(e) => {
                    error!("dispatch: failed to read event queue: {e}");
                    return;
                }
            };
            if heads.is_empty() {
                return;
            }

            let mut events = JoinSet::new();
            for event in heads {
                let engine = self.clone();
                events.spawn(async move { engine.process_event(event).await });
            }

            let mut progressed = false;
            while let Some(done) = events.join_next().await {
                progressed |= done.unwrap_or(false);
            }
            if !progressed {
                return;
            }
        }
    }

    /// Fan out (first pickup only), attempt every due delivery, and complete
    /// the event once all deliveries are terminal. Returns whether it completed.
    async fn process_event(self: Arc<Self>, event: NotificationEvent) -> bool {
        let fanned = self.store.fan_out(&event).await;
        self.health.record(&fanned);
        match fanned {
            Ok(0) => {}
            Ok(n) => debug!("event {} fanned out to {n} chat(s)", event.id),
            Err(e) => {
                error!("dispatch: fan-out of event {} failed: {e}", event.id);
                return false;
            }
        }

        let due = self.store.due_deliveries(event.id, &sql_time(Utc::now())).await;
        self.health.record(&due);
        let due = match due {
            Ok(d) => d,
            Err(e) => {
                error!("dispatch: failed to load deliveries of event {}: {e}", event.id);
                return false;
            }
        };

        let event = Arc::new(event);
        let text: Arc<str> = event.render().into();
        let mut deliveries = JoinSet::new();
        for delivery in due {
            let engine = self.clone();
            let event = event.clone();
            let text = text.clone();
            deliveries.spawn(async move {
                let Ok(_permit) = engine.dispatch_permits.clone().acquire_owned().await else {
                    return;
                };
                engine.deliver_one(&event, &delivery.chat_id, &text).await;
            });
        }
        while deliveries.join_next().await.is_some() {}

        let completed = self.store.complete_event_if_done(event.id).await;
        self.health.record(&completed);
        match completed {
            Ok(true) => {
                info!(
                    "event {} ({} v{}) fully processed",
                    event.id, event.slug, event.version
                );
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("dispatch: failed to complete event {}: {e}", event.id);
                false
            }
        }
    }

    /// One attempt for one (event, chat) pair.
    async fn deliver_one(&self, event: &NotificationEvent, chat_id: &str, text: &str) {
        // Subscribers are snapshotted at fan-out; honor later unsubscribes.
        let subscribed = self.store.is_subscribed(chat_id, event.entity_id).await;
        self.health.record(&subscribed);
        match subscribed {
            Ok(true) => {}
            Ok(false) => {
                debug!("chat {chat_id} unsubscribed from {}, cancelling", event.slug);
                self.finish(event, chat_id, DeliveryStatus::Cancelled, None)
                    .await;
                return;
            }
            Err(e) => {
                warn!("dispatch: subscription check for {chat_id} failed: {e}");
                return;
            }
        }

        // Marked `sending` before the call: a crash from here on never re-sends.
        let attempt = match self.store.begin_attempt(event.id, chat_id).await {
            Ok(Some(n)) => {
                self.health.record_ok();
                n
            }
            Ok(None) => return,
            Err(e) => {
                self.health.record_failure(&e);
                warn!("dispatch: failed to claim delivery to {chat_id}: {e}");
                return;
            }
        };

        let timeout = Duration::from_secs(self.config.dispatcher.send_timeout_secs.max(1));
        let sent = match tokio::time::timeout(timeout, self.messenger.send(chat_id, text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let retry_after = e.retry_after();
                Err((WoltbotError::from(e), retry_after))
            }
            Err(_) => Err((
                WoltbotError::Transient(format!("send timed out after {}s", timeout.as_secs())),
                None,
            )),
        };

        match sent {
            Ok(()) => {
                info!("notified chat {chat_id}: {text}");
                self.finish(event, chat_id, DeliveryStatus::Delivered, None)
                    .await;
                self.track_wait(event, chat_id).await;
            }
            Err((WoltbotError::Permanent(reason), _)) => {
                warn!("chat {chat_id} is gone ({reason}), removing its subscriptions");
                self.finish(event, chat_id, DeliveryStatus::Unreachable, Some(reason.as_str()))
                    .await;
                self.drop_chat(chat_id).await;
            }
            Err((e, _)) if attempt >= self.config.dispatcher.max_attempts => {
                warn!("giving up on chat {chat_id} after {attempt} attempt(s): {e}");
                let reason = e.to_string();
                self.finish(event, chat_id, DeliveryStatus::Exhausted, Some(reason.as_str()))
                    .await;
            }
            Err((e, retry_after)) => {
                let delay = self.config.dispatcher.backoff(attempt, retry_after);
                debug!(
                    "delivery to {chat_id} failed (attempt {attempt}), retry in {}s: {e}",
                    delay.as_secs()
                );
                let next = Utc::now()
                    + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero());
                let scheduled = self
                    .store
                    .schedule_retry(event.id, chat_id, &sql_time(next), &e.to_string())
                    .await;
                self.health.record(&scheduled);
                if let Err(e) = scheduled {
                    error!("dispatch: failed to schedule retry for {chat_id}: {e}");
                }
            }
        }
    }

    async fn finish(
        &self,
        event: &NotificationEvent,
        chat_id: &str,
        status: DeliveryStatus,
        error: Option<&str>,
    ) {
        let finished = self
            .store
            .finish_delivery(event.id, chat_id, status, error)
            .await;
        self.health.record(&finished);
        if let Err(e) = finished {
            error!("dispatch: failed to record {status} for {chat_id}: {e}");
        }
    }

    /// A delivered "closed" starts a wait; a delivered "open" ends it.
    async fn track_wait(&self, event: &NotificationEvent, chat_id: &str) {
        let result = match event.to_status {
            EntityStatus::Open => self.store.finish_wait(chat_id, &event.slug, true).await,
            EntityStatus::Closed => {
                self.store
                    .start_wait(chat_id, &event.slug, &event.label)
                    .await
            }
        };
        if let Err(e) = result {
            warn!("failed to update wait statistics for {chat_id}: {e}");
        }
    }

    /// Remove every subscription of a permanently unreachable chat.
    async fn drop_chat(&self, chat_id: &str) {
        let removed = self.store.remove_chat(chat_id).await;
        self.health.record(&removed);
        match removed {
            Ok(entities) => {
                for entity in &entities {
                    if let Err(e) = self.store.finish_wait(chat_id, &entity.slug, false).await {
                        warn!("failed to close wait of {chat_id} on {}: {e}", entity.slug);
                    }
                }
                info!("removed {} subscription(s) of chat {chat_id}", entities.len());
            }
            Err(e) => error!("failed to remove subscriptions of {chat_id}: {e}"),
        }
    }
}
