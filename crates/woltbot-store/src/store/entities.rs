//! Watched venue lookup and orphan cleanup.

use super::Store;
use tracing::info;
use woltbot_core::{error::WoltbotError, model::WatchedEntity};

impl Store {
    /// Entities with at least one subscriber: the poll set for a tick.
    pub async fn polled_entities(&self) -> Result<Vec<WatchedEntity>, WoltbotError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT e.id, e.slug, e.label FROM watched_entities e \
             WHERE EXISTS (SELECT 1 FROM subscriptions s WHERE s.entity_id = e.id) \
             ORDER BY e.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("list polled entities failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, slug, label)| WatchedEntity { id, slug, label })
            .collect())
    }

    /// Look up a watched entity by platform slug.
    pub async fn entity_by_slug(&self, slug: &str) -> Result<Option<WatchedEntity>, WoltbotError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, slug, label FROM watched_entities WHERE slug = ?")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| WoltbotError::Storage(format!("entity lookup failed: {e}")))?;

        Ok(row.map(|(id, slug, label)| WatchedEntity { id, slug, label }))
    }

    /// Delete entities orphaned at or before `cutoff` that have no
    /// subscribers and no unprocessed events. Their state rows go with them.
    pub async fn collect_orphans(&self, cutoff: &str) -> Result<u64, WoltbotError> {
        let removed = sqlx::query(
            "DELETE FROM watched_entities \
             WHERE orphaned_at IS NOT NULL AND orphaned_at <= ? \
             AND NOT EXISTS (SELECT 1 FROM subscriptions s WHERE s.entity_id = watched_entities.id) \
             AND NOT EXISTS (SELECT 1 FROM notification_events n \
                             WHERE n.entity_id = watched_entities.id AND n.processed_at IS NULL)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("orphan cleanup failed: {e}")))?
        .rows_affected();

        if removed > 0 {
            info!("removed {removed} orphaned venue(s)");
        }
        Ok(removed)
    }
}
