//! Poll scheduler: one platform query per watched venue per tick.

use super::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use woltbot_core::{
    diff::Diff,
    error::WoltbotError,
    model::{sql_time, WatchedEntity},
};

/// Marks an entity as being polled; released on drop, even if the task panics.
struct InFlight {
    engine: Arc<Engine>,
    entity_id: i64,
}

impl InFlight {
    /// `None` when a poll for this entity is still outstanding.
    fn claim(engine: &Arc<Engine>, entity_id: i64) -> Option<Self> {
        let mut set = engine
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        set.insert(entity_id).then(|| Self {
            engine: engine.clone(),
            entity_id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.engine
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.entity_id);
    }
}

impl Engine {
    /// Background task: poll every watched venue on a fixed interval.
    pub(super) async fn poll_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.poller.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            // Polls run detached: the handles are only awaited by tests.
            // An outstanding poll blocks only its own entity.
            drop(self.poll_tick().await);
        }
    }

    /// Run housekeeping, then spawn one poll per entity with subscribers.
    pub(crate) async fn poll_tick(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.housekeeping().await;

        let entities = self.store.polled_entities().await;
        self.health.record(&entities);
        let entities = match entities {
            Ok(e) => e,
            Err(e) => {
                error!("poll: failed to list watched venues: {e}");
                return Vec::new();
            }
        };

        let mut handles = Vec::with_capacity(entities.len());
        for entity in entities {
            let Some(guard) = InFlight::claim(self, entity.id) else {
                debug!("poll: {} still in flight, skipping", entity.slug);
                continue;
            };
            let engine = self.clone();
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                let Ok(_permit) = engine.poll_permits.clone().acquire_owned().await else {
                    return;
                };
                engine.poll_entity(&entity).await;
            }));
        }
        handles
    }

    /// Query one venue and commit the observation.
    async fn poll_entity(&self, entity: &WatchedEntity) {
        let timeout = Duration::from_secs(self.config.poller.timeout_secs.max(1));
        let observation =
            match tokio::time::timeout(timeout, self.platform.fetch_state(&entity.slug)).await {
                Ok(Ok(o)) => o,
                Ok(Err(e)) => {
                    match WoltbotError::from(e) {
                        WoltbotError::UnknownEntity(_) => warn!(
                            "poll: {} no longer exists on {}",
                            entity.slug,
                            self.platform.name()
                        ),
                        e => warn!("poll: {} failed: {e}", entity.slug),
                    }
                    return;
                }
                Err(_) => {
                    warn!("poll: {} timed out after {}s", entity.slug, timeout.as_secs());
                    return;
                }
            };

        let committed = self.store.commit_observation(entity.id, &observation).await;
        self.health.record(&committed);
        match committed {
            Ok(Some(commit)) => {
                match &commit.diff {
                    Diff::Changed { from, to, version } => info!(
                        "{} changed {from} -> {to} (version {version})",
                        entity.slug
                    ),
                    Diff::FirstObservation { .. } => {
                        debug!("{} first observed as {}", entity.slug, observation.status())
                    }
                    Diff::Unchanged => {}
                }
                if commit.diff.should_notify() {
                    self.wakeup.notify_one();
                }
            }
            Ok(None) => debug!("poll: {} removed while polling, discarded", entity.slug),
            Err(e) => error!("poll: failed to commit {}: {e}", entity.slug),
        }
    }

    /// Collect orphaned venues past their grace period and purge old events.
    async fn housekeeping(&self) {
        let now = Utc::now();
        let grace = ChronoDuration::seconds(self.config.poller.orphan_grace_secs as i64);
        let orphans = self.store.collect_orphans(&sql_time(now - grace)).await;
        self.health.record(&orphans);
        if let Err(e) = orphans {
            warn!("orphan cleanup failed: {e}");
        }

        let retention = ChronoDuration::hours(self.config.poller.event_retention_hours as i64);
        match self
            .store
            .purge_processed_events(&sql_time(now - retention))
            .await
        {
            Ok(0) => {}
            Ok(n) => debug!("purged {n} processed event(s)"),
            Err(e) => {
                self.health.record_failure(&e);
                warn!("event purge failed: {e}");
            }
        }
    }
}
