//! Subscription registry: who watches which venue.

use super::{now, Store};
use woltbot_core::{
    error::WoltbotError,
    model::{Subscription, WatchedEntity},
};

impl Store {
    /// Subscribe `chat_id` to the venue `slug`, creating the watched entity
    /// on first use.
    ///
    /// Returns the subscription and whether it was newly created. Subscribing
    /// twice is a no-op. The entity upsert and the subscription insert run in
    /// one transaction, so concurrent first subscribers share a single entity.
    pub async fn subscribe(
        &self,
        chat_id: &str,
        slug: &str,
        label: &str,
    ) -> Result<(Subscription, bool), WoltbotError> {
        let now = now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WoltbotError::Storage(format!("subscribe begin failed: {e}")))?;

        let (entity_id, entity_label): (i64, String) = sqlx::query_as(
            "INSERT INTO watched_entities (slug, label, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(slug) DO UPDATE SET orphaned_at = NULL \
             RETURNING id, label",
        )
        .bind(slug)
        .bind(label)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("entity upsert failed: {e}")))?;

        let inserted = sqlx::query(
            "INSERT INTO subscriptions (chat_id, entity_id, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(chat_id, entity_id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(entity_id)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("subscribe failed: {e}")))?
        .rows_affected()
            > 0;

        let (created_at,): (String,) = sqlx::query_as(
            "SELECT created_at FROM subscriptions WHERE chat_id = ? AND entity_id = ?",
        )
        .bind(chat_id)
        .bind(entity_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("subscription read failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| WoltbotError::Storage(format!("subscribe commit failed: {e}")))?;

        let subscription = Subscription {
            chat_id: chat_id.to_string(),
            entity: WatchedEntity {
                id: entity_id,
                slug: slug.to_string(),
                label: entity_label,
            },
            created_at,
        };
        Ok((subscription, inserted))
    }

    /// Remove the (chat, venue) subscription.
    ///
    /// Returns `false` if the chat was not subscribed, and
    /// [`WoltbotError::NotFound`] if no chat ever subscribed to `slug`.
    pub async fn unsubscribe(&self, chat_id: &str, slug: &str) -> Result<bool, WoltbotError> {
        let now = now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WoltbotError::Storage(format!("unsubscribe begin failed: {e}")))?;

        let removed: Option<(i64,)> = sqlx::query_as(
            "DELETE FROM subscriptions \
             WHERE chat_id = ? AND entity_id = (SELECT id FROM watched_entities WHERE slug = ?) \
             RETURNING entity_id",
        )
        .bind(chat_id)
        .bind(slug)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("unsubscribe failed: {e}")))?;

        let Some((entity_id,)) = removed else {
            let known: Option<(i64,)> =
                sqlx::query_as("SELECT id FROM watched_entities WHERE slug = ?")
                    .bind(slug)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| WoltbotError::Storage(format!("entity lookup failed: {e}")))?;
            tx.rollback()
                .await
                .map_err(|e| WoltbotError::Storage(format!("unsubscribe rollback failed: {e}")))?;
            return match known {
                Some(_) => Ok(false),
                None => Err(WoltbotError::NotFound(format!("no watched venue '{slug}'"))),
            };
        };

        mark_orphaned(&mut tx, entity_id, &now).await?;

        tx.commit()
            .await
            .map_err(|e| WoltbotError::Storage(format!("unsubscribe commit failed: {e}")))?;
        Ok(true)
    }

    /// Remove every subscription held by `chat_id` (chat permanently gone).
    /// Returns the venues it was watching.
    pub async fn remove_chat(&self, chat_id: &str) -> Result<Vec<WatchedEntity>, WoltbotError> {
        let now = now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WoltbotError::Storage(format!("remove chat begin failed: {e}")))?;

        let removed: Vec<(i64,)> =
            sqlx::query_as("DELETE FROM subscriptions WHERE chat_id = ? RETURNING entity_id")
                .bind(chat_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| WoltbotError::Storage(format!("remove chat failed: {e}")))?;

        let mut entities = Vec::with_capacity(removed.len());
        for (entity_id,) in removed {
            mark_orphaned(&mut tx, entity_id, &now).await?;
            let (slug, label): (String, String) =
                sqlx::query_as("SELECT slug, label FROM watched_entities WHERE id = ?")
                    .bind(entity_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| WoltbotError::Storage(format!("entity lookup failed: {e}")))?;
            entities.push(WatchedEntity {
                id: entity_id,
                slug,
                label,
            });
        }

        tx.commit()
            .await
            .map_err(|e| WoltbotError::Storage(format!("remove chat commit failed: {e}")))?;
        Ok(entities)
    }

    /// Venues watched by `chat_id`, oldest subscription first.
    pub async fn list_for(&self, chat_id: &str) -> Result<Vec<WatchedEntity>, WoltbotError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT e.id, e.slug, e.label FROM subscriptions s \
             JOIN watched_entities e ON e.id = s.entity_id \
             WHERE s.chat_id = ? ORDER BY s.created_at, e.id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("list subscriptions failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(id, slug, label)| WatchedEntity { id, slug, label })
            .collect())
    }

    /// Chats currently subscribed to the entity.
    pub async fn subscribers_of(&self, entity_id: i64) -> Result<Vec<String>, WoltbotError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT chat_id FROM subscriptions WHERE entity_id = ? ORDER BY created_at, chat_id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("list subscribers failed: {e}")))?;

        Ok(rows.into_iter().map(|(chat,)| chat).collect())
    }

    /// Whether `chat_id` still watches the entity.
    pub async fn is_subscribed(&self, chat_id: &str, entity_id: i64) -> Result<bool, WoltbotError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM subscriptions WHERE chat_id = ? AND entity_id = ?",
        )
        .bind(chat_id)
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("subscription check failed: {e}")))?;

        Ok(row.is_some())
    }
}

/// Stamp the entity as orphaned if its last subscriber just left.
async fn mark_orphaned(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entity_id: i64,
    now: &str,
) -> Result<(), WoltbotError> {
    sqlx::query(
        "UPDATE watched_entities SET orphaned_at = ? \
         WHERE id = ? AND orphaned_at IS NULL \
         AND NOT EXISTS (SELECT 1 FROM subscriptions WHERE entity_id = ?)",
    )
    .bind(now)
    .bind(entity_id)
    .bind(entity_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| WoltbotError::Storage(format!("orphan mark failed: {e}")))?;
    Ok(())
}
