use super::*;
use chrono::Utc;
use woltbot_core::{
    diff::Diff,
    model::{EntityStatus, Observation},
};

/// Create an in-memory store for testing.
async fn test_store() -> Store {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .unwrap();
    Store::run_migrations(&pool).await.unwrap();
    Store { pool }
}

fn observation(slug: &str, online: bool) -> Observation {
    Observation {
        slug: slug.to_string(),
        name: slug.to_string(),
        online,
        delivery_enabled: true,
        estimate_minutes: Some(25),
        observed_at: Utc::now(),
    }
}

const FAR_FUTURE: &str = "2999-01-01 00:00:00";

// --- subscriptions ---

#[tokio::test]
async fn test_subscribe_creates_entity_and_subscription() {
    let store = test_store().await;
    let (sub, created) = store.subscribe("chat1", "burger-bar", "Burger Bar").await.unwrap();
    assert!(created);
    assert_eq!(sub.chat_id, "chat1");
    assert_eq!(sub.entity.slug, "burger-bar");
    assert_eq!(sub.entity.label, "Burger Bar");

    let listed = store.list_for("chat1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, sub.entity.id);
    assert_eq!(
        store.subscribers_of(sub.entity.id).await.unwrap(),
        vec!["chat1".to_string()]
    );
}

#[tokio::test]
async fn test_subscribe_twice_is_noop() {
    let store = test_store().await;
    let (first, created) = store.subscribe("chat1", "burger-bar", "Burger Bar").await.unwrap();
    assert!(created);
    let (second, created) = store.subscribe("chat1", "burger-bar", "Burger Bar").await.unwrap();
    assert!(!created);
    assert_eq!(first.entity.id, second.entity.id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(store.list_for("chat1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_first_subscribe_creates_one_entity() {
    let store = test_store().await;
    let (a, b) = tokio::join!(
        store.subscribe("chat1", "new-venue", "New Venue"),
        store.subscribe("chat2", "new-venue", "New Venue"),
    );
    let (a, _) = a.unwrap();
    let (b, _) = b.unwrap();
    assert_eq!(a.entity.id, b.entity.id);

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM watched_entities WHERE slug = 'new-venue'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
    assert_eq!(store.subscribers_of(a.entity.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unsubscribe_outcomes() {
    let store = test_store().await;
    store.subscribe("chat1", "burger-bar", "Burger Bar").await.unwrap();

    assert!(store.unsubscribe("chat1", "burger-bar").await.unwrap());
    // Entity known, chat no longer subscribed.
    assert!(!store.unsubscribe("chat1", "burger-bar").await.unwrap());
    // Never-resolved reference.
    let err = store.unsubscribe("chat1", "never-seen").await.unwrap_err();
    assert!(matches!(err, WoltbotError::NotFound(_)));
}

#[tokio::test]
async fn test_remove_chat_drops_all_subscriptions() {
    let store = test_store().await;
    store.subscribe("gone", "a-venue", "A").await.unwrap();
    store.subscribe("gone", "b-venue", "B").await.unwrap();
    store.subscribe("stays", "a-venue", "A").await.unwrap();

    let removed = store.remove_chat("gone").await.unwrap();
    let mut slugs: Vec<_> = removed.into_iter().map(|e| e.slug).collect();
    slugs.sort();
    assert_eq!(slugs, vec!["a-venue", "b-venue"]);
    assert!(store.list_for("gone").await.unwrap().is_empty());
    assert_eq!(store.list_for("stays").await.unwrap().len(), 1);
}

// --- entities ---

#[tokio::test]
async fn test_polled_entities_skip_unsubscribed() {
    let store = test_store().await;
    store.subscribe("chat1", "a-venue", "A").await.unwrap();
    store.subscribe("chat1", "b-venue", "B").await.unwrap();
    store.unsubscribe("chat1", "b-venue").await.unwrap();

    let polled = store.polled_entities().await.unwrap();
    assert_eq!(polled.len(), 1);
    assert_eq!(polled[0].slug, "a-venue");
}

#[tokio::test]
async fn test_collect_orphans_respects_grace_period() {
    let store = test_store().await;
    store.subscribe("chat1", "b-venue", "B").await.unwrap();
    store.unsubscribe("chat1", "b-venue").await.unwrap();

    // Cutoff before the orphan mark: still within grace.
    assert_eq!(store.collect_orphans("2000-01-01 00:00:00").await.unwrap(), 0);
    assert!(store.entity_by_slug("b-venue").await.unwrap().is_some());

    assert_eq!(store.collect_orphans(FAR_FUTURE).await.unwrap(), 1);
    assert!(store.entity_by_slug("b-venue").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resubscribe_clears_orphan_mark() {
    let store = test_store().await;
    store.subscribe("chat1", "b-venue", "B").await.unwrap();
    store.unsubscribe("chat1", "b-venue").await.unwrap();
    store.subscribe("chat2", "b-venue", "B").await.unwrap();

    assert_eq!(store.collect_orphans(FAR_FUTURE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_collect_orphans_keeps_entities_with_pending_events() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();
    let id = sub.entity.id;
    store.commit_observation(id, &observation("a-venue", true)).await.unwrap();
    store.commit_observation(id, &observation("a-venue", false)).await.unwrap();
    store.unsubscribe("chat1", "a-venue").await.unwrap();

    assert_eq!(store.collect_orphans(FAR_FUTURE).await.unwrap(), 0);
}

// --- state commits ---

#[tokio::test]
async fn test_first_observation_persists_without_event() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();

    let commit = store
        .commit_observation(sub.entity.id, &observation("a-venue", true))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(commit.diff, Diff::FirstObservation { version: 1 });
    assert!(commit.event_id.is_none());

    let state = store.entity_state(sub.entity.id).await.unwrap().unwrap();
    assert_eq!(state.status, EntityStatus::Open);
    assert_eq!(state.version, 1);
    assert_eq!(store.pending_event_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unchanged_observations_never_enqueue() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();
    for _ in 0..5 {
        store
            .commit_observation(sub.entity.id, &observation("a-venue", true))
            .await
            .unwrap();
    }
    assert_eq!(store.pending_event_count().await.unwrap(), 0);
    let state = store.entity_state(sub.entity.id).await.unwrap().unwrap();
    assert_eq!(state.version, 1);
}

#[tokio::test]
async fn test_change_updates_state_and_enqueues_event() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();
    let id = sub.entity.id;
    store.commit_observation(id, &observation("a-venue", true)).await.unwrap();

    let commit = store
        .commit_observation(id, &observation("a-venue", false))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        commit.diff,
        Diff::Changed {
            from: EntityStatus::Open,
            to: EntityStatus::Closed,
            version: 2,
        }
    );
    assert!(commit.event_id.is_some());

    let state = store.entity_state(id).await.unwrap().unwrap();
    assert_eq!(state.status, EntityStatus::Closed);
    assert_eq!(state.version, 2);

    let heads = store.pending_heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].id, commit.event_id.unwrap());
    assert_eq!(heads[0].label, "A");
    assert_eq!(heads[0].to_status, EntityStatus::Closed);
}

#[tokio::test]
async fn test_commit_for_removed_entity_is_discarded() {
    let store = test_store().await;
    assert!(store
        .commit_observation(9999, &observation("ghost", true))
        .await
        .unwrap()
        .is_none());
}

// --- notification queue ---

async fn store_with_event(chats: &[&str]) -> (Store, woltbot_core::model::NotificationEvent) {
    let store = test_store().await;
    let mut entity_id = 0;
    for chat in chats {
        let (sub, _) = store.subscribe(chat, "a-venue", "A").await.unwrap();
        entity_id = sub.entity.id;
    }
    store.commit_observation(entity_id, &observation("a-venue", true)).await.unwrap();
    store.commit_observation(entity_id, &observation("a-venue", false)).await.unwrap();
    let event = store.pending_heads().await.unwrap().remove(0);
    (store, event)
}

#[tokio::test]
async fn test_fan_out_runs_once() {
    let (store, event) = store_with_event(&["chat1", "chat2"]).await;
    assert_eq!(store.fan_out(&event).await.unwrap(), 2);
    // A late subscriber is not added by a second fan-out.
    store.subscribe("chat3", "a-venue", "A").await.unwrap();
    assert_eq!(store.fan_out(&event).await.unwrap(), 0);
    assert_eq!(store.deliveries_for(event.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delivery_lifecycle_completes_event() {
    let (store, event) = store_with_event(&["chat1", "chat2"]).await;
    store.fan_out(&event).await.unwrap();

    let due = store.due_deliveries(event.id, FAR_FUTURE).await.unwrap();
    assert_eq!(due.len(), 2);

    assert_eq!(store.begin_attempt(event.id, "chat1").await.unwrap(), Some(1));
    // Already claimed.
    assert_eq!(store.begin_attempt(event.id, "chat1").await.unwrap(), None);
    store
        .finish_delivery(event.id, "chat1", DeliveryStatus::Delivered, None)
        .await
        .unwrap();
    assert!(!store.complete_event_if_done(event.id).await.unwrap());

    store.begin_attempt(event.id, "chat2").await.unwrap();
    store
        .schedule_retry(event.id, "chat2", "2100-01-01 00:00:00", "timeout")
        .await
        .unwrap();
    // Backoff not yet elapsed.
    assert!(store
        .due_deliveries(event.id, "2099-12-31 23:59:59")
        .await
        .unwrap()
        .is_empty());
    let retry = store.due_deliveries(event.id, FAR_FUTURE).await.unwrap();
    assert_eq!(retry.len(), 1);
    assert_eq!(retry[0].attempts, 1);
    assert_eq!(retry[0].last_error.as_deref(), Some("timeout"));

    assert_eq!(store.begin_attempt(event.id, "chat2").await.unwrap(), Some(2));
    store
        .finish_delivery(event.id, "chat2", DeliveryStatus::Exhausted, Some("timeout"))
        .await
        .unwrap();
    assert!(store.complete_event_if_done(event.id).await.unwrap());
    assert!(store.pending_heads().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finish_delivery_rejects_non_terminal_status() {
    let (store, event) = store_with_event(&["chat1"]).await;
    store.fan_out(&event).await.unwrap();
    assert!(store
        .finish_delivery(event.id, "chat1", DeliveryStatus::Pending, None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_event_without_subscribers_completes_after_fan_out() {
    let (store, event) = store_with_event(&["chat1"]).await;
    store.unsubscribe("chat1", "a-venue").await.unwrap();
    // Not fanned out yet: cannot complete.
    assert!(!store.complete_event_if_done(event.id).await.unwrap());
    assert_eq!(store.fan_out(&event).await.unwrap(), 0);
    assert!(store.complete_event_if_done(event.id).await.unwrap());
}

#[tokio::test]
async fn test_pending_heads_keep_per_entity_order() {
    let (store, first) = store_with_event(&["chat1"]).await;
    // Second transition for the same venue while the first is in flight.
    store
        .commit_observation(first.entity_id, &observation("a-venue", true))
        .await
        .unwrap();

    let heads = store.pending_heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].id, first.id);

    store.fan_out(&first).await.unwrap();
    store.begin_attempt(first.id, "chat1").await.unwrap();
    store
        .finish_delivery(first.id, "chat1", DeliveryStatus::Delivered, None)
        .await
        .unwrap();
    store.complete_event_if_done(first.id).await.unwrap();

    let heads = store.pending_heads().await.unwrap();
    assert_eq!(heads.len(), 1);
    assert_eq!(heads[0].version, first.version + 1);
    assert_eq!(heads[0].to_status, EntityStatus::Open);
}

#[tokio::test]
async fn test_recover_interrupted_deliveries() {
    let (store, event) = store_with_event(&["chat1", "chat2"]).await;
    store.fan_out(&event).await.unwrap();
    store.begin_attempt(event.id, "chat1").await.unwrap();

    assert_eq!(store.recover_interrupted_deliveries().await.unwrap(), 1);
    let rows = store.deliveries_for(event.id).await.unwrap();
    assert_eq!(rows[0].status, DeliveryStatus::Unknown);
    assert_eq!(rows[1].status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn test_purge_processed_events() {
    let (store, event) = store_with_event(&["chat1"]).await;
    store.fan_out(&event).await.unwrap();
    store.begin_attempt(event.id, "chat1").await.unwrap();
    store
        .finish_delivery(event.id, "chat1", DeliveryStatus::Delivered, None)
        .await
        .unwrap();
    store.complete_event_if_done(event.id).await.unwrap();

    assert_eq!(store.purge_processed_events(FAR_FUTURE).await.unwrap(), 1);
    assert!(store.deliveries_for(event.id).await.unwrap().is_empty());
}

// --- stats ---

#[tokio::test]
async fn test_wait_sessions_open_once() {
    let store = test_store().await;
    assert!(store.start_wait("chat1", "a-venue", "A").await.unwrap());
    assert!(!store.start_wait("chat1", "a-venue", "A").await.unwrap());
    assert!(store.finish_wait("chat1", "a-venue", true).await.unwrap());
    assert!(!store.finish_wait("chat1", "a-venue", true).await.unwrap());
    // A new wait can start after the previous one finished.
    assert!(store.start_wait("chat1", "a-venue", "A").await.unwrap());
}

#[tokio::test]
async fn test_general_stats_empty() {
    let store = test_store().await;
    assert!(store.general_stats().await.unwrap().is_none());
}

async fn insert_session(store: &Store, chat: &str, slug: &str, start: &str, end: &str, opened: bool) {
    sqlx::query(
        "INSERT INTO watch_sessions (chat_id, slug, label, started_at, ended_at, opened) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(chat)
    .bind(slug)
    .bind(slug.to_uppercase())
    .bind(start)
    .bind(end)
    .bind(opened as i64)
    .execute(&store.pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn test_general_and_venue_stats() {
    let store = test_store().await;
    insert_session(&store, "c1", "fast", "2026-01-01 10:00:00", "2026-01-01 10:10:00", true).await;
    insert_session(&store, "c2", "fast", "2026-01-01 11:00:00", "2026-01-01 11:20:00", true).await;
    insert_session(&store, "c1", "fast", "2026-01-02 10:00:00", "2026-01-02 10:05:00", false).await;
    insert_session(&store, "c1", "slow", "2026-01-01 10:00:00", "2026-01-01 12:00:00", true).await;

    let general = store.general_stats().await.unwrap().unwrap();
    assert_eq!(general.usage_count, 4);
    assert_eq!(general.most_popular, "FAST");
    assert_eq!(general.most_popular_requests, 3);
    assert_eq!(general.most_popular_unique_chats, 2);
    assert_eq!(general.slowest, Some(("SLOW".to_string(), 7200)));

    let fast = store.venue_stats("fast").await.unwrap().unwrap();
    assert_eq!(fast.average_wait_secs, 900);
    assert_eq!(fast.samples, 2);
    assert!(store.venue_stats("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_chat_stats_counts_open_sessions_until_now() {
    let store = test_store().await;
    insert_session(&store, "c1", "fast", "2026-01-01 10:00:00", "2026-01-01 10:10:00", true).await;
    sqlx::query(
        "INSERT INTO watch_sessions (chat_id, slug, label, started_at) \
         VALUES ('c1', 'slow', 'SLOW', '2026-01-01 11:00:00')",
    )
    .execute(&store.pool)
    .await
    .unwrap();

    let stats = store.chat_stats("c1", "2026-01-01 11:30:00").await.unwrap();
    assert_eq!(stats.usage_count, 2);
    assert_eq!(stats.total_wait_secs, 600 + 1800);
    assert!(stats.most_watched.is_some());

    let empty = store.chat_stats("nobody", "2026-01-01 11:30:00").await.unwrap();
    assert_eq!(empty.usage_count, 0);
    assert_eq!(empty.total_wait_secs, 0);
    assert!(empty.most_watched.is_none());
}

// --- subscribe-time state ---

#[tokio::test]
async fn test_seed_state_only_fills_missing_state() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();
    let id = sub.entity.id;

    assert!(store.seed_state(id, &observation("a-venue", false)).await.unwrap());
    // A second seed neither overwrites the state nor queues an event.
    assert!(!store.seed_state(id, &observation("a-venue", true)).await.unwrap());

    let state = store.entity_state(id).await.unwrap().unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.status, EntityStatus::Closed);
    assert_eq!(store.pending_event_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_fan_out_skips_chat_already_told_new_status() {
    let store = test_store().await;
    let (sub, _) = store.subscribe("chat1", "a-venue", "A").await.unwrap();
    let id = sub.entity.id;
    store.seed_state(id, &observation("a-venue", false)).await.unwrap();

    // Matches the committed state: nothing to remember.
    assert!(!store.mark_seen("chat1", id, EntityStatus::Closed).await.unwrap());
    store.subscribe("chat2", "a-venue", "A").await.unwrap();
    assert!(store.mark_seen("chat2", id, EntityStatus::Open).await.unwrap());

    store.commit_observation(id, &observation("a-venue", true)).await.unwrap();
    let event = store.pending_heads().await.unwrap().remove(0);
    assert_eq!(store.fan_out(&event).await.unwrap(), 1);
    let deliveries = store.deliveries_for(event.id).await.unwrap();
    assert_eq!(deliveries[0].chat_id, "chat1");
    for d in &deliveries {
        store.begin_attempt(event.id, &d.chat_id).await.unwrap();
        store
            .finish_delivery(event.id, &d.chat_id, DeliveryStatus::Delivered, None)
            .await
            .unwrap();
    }
    assert!(store.complete_event_if_done(event.id).await.unwrap());

    // The next transition reaches chat2 again.
    store.commit_observation(id, &observation("a-venue", false)).await.unwrap();
    let event = store.pending_heads().await.unwrap().remove(0);
    assert_eq!(store.fan_out(&event).await.unwrap(), 2);
}

#[tokio::test]
async fn test_new_reports_io_error_when_data_dir_is_a_file() {
    let file = std::env::temp_dir().join(format!("__woltbot_not_a_dir_{}", std::process::id()));
    std::fs::write(&file, b"x").unwrap();
    let config = StorageConfig {
        backend: "sqlite".into(),
        db_path: file.join("state.db").to_string_lossy().to_string(),
        max_connections: 1,
    };
    let err = Store::new(&config).await.err().unwrap();
    assert!(matches!(err, WoltbotError::Io(_)));
    let _ = std::fs::remove_file(&file);
}
