//! Committed venue states and the atomic state + event commit.

use super::{now, Store};
use woltbot_core::{
    diff::{classify, Diff},
    error::WoltbotError,
    model::{sql_time, EntityState, EntityStatus, Observation},
};

/// Result of committing one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub diff: Diff,
    /// Queued notification event, present only for [`Diff::Changed`].
    pub event_id: Option<i64>,
}

impl Store {
    /// Last committed state of an entity.
    pub async fn entity_state(&self, entity_id: i64) -> Result<Option<EntityState>, WoltbotError> {
        let row: Option<(String, String, i64, String)> = sqlx::query_as(
            "SELECT status, fingerprint, version, observed_at FROM entity_states \
             WHERE entity_id = ?",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("state read failed: {e}")))?;

        row.map(|r| state_from_row(entity_id, r)).transpose()
    }

    /// Record `observation` as the first state of an entity that has none.
    ///
    /// An existing state is left alone; detecting changes is the poller's
    /// job. Returns whether a state was inserted.
    pub async fn seed_state(
        &self,
        entity_id: i64,
        observation: &Observation,
    ) -> Result<bool, WoltbotError> {
        let inserted = sqlx::query(
            "INSERT INTO entity_states (entity_id, status, fingerprint, version, observed_at) \
             VALUES (?, ?, ?, 1, ?) ON CONFLICT(entity_id) DO NOTHING",
        )
        .bind(entity_id)
        .bind(observation.status().as_str())
        .bind(observation.fingerprint())
        .bind(sql_time(observation.observed_at))
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("state seed failed: {e}")))?
        .rows_affected();
        Ok(inserted == 1)
    }

    /// Remember that `chat_id` was just told `status` directly.
    ///
    /// Only takes effect when the committed state still says otherwise: the
    /// event that later catches up to `status` then skips this chat.
    pub async fn mark_seen(
        &self,
        chat_id: &str,
        entity_id: i64,
        status: EntityStatus,
    ) -> Result<bool, WoltbotError> {
        let marked = sqlx::query(
            "UPDATE subscriptions SET seen_status = ?1, seen_after_version = \
             (SELECT version FROM entity_states WHERE entity_id = ?2) \
             WHERE chat_id = ?3 AND entity_id = ?2 AND EXISTS \
             (SELECT 1 FROM entity_states WHERE entity_id = ?2 AND status <> ?1)",
        )
        .bind(status.as_str())
        .bind(entity_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("mark seen failed: {e}")))?
        .rows_affected();
        Ok(marked == 1)
    }

    /// Compare `observation` with the committed state and persist the outcome.
    ///
    /// A change overwrites the state row and enqueues a notification event in
    /// the same transaction, so a crash leaves either both or neither.
    /// Returns `None` when the entity was removed while the poll was in flight.
    pub async fn commit_observation(
        &self,
        entity_id: i64,
        observation: &Observation,
    ) -> Result<Option<Commit>, WoltbotError> {
        let polled_at = now();
        let observed_at = sql_time(observation.observed_at);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WoltbotError::Storage(format!("commit begin failed: {e}")))?;

        let touched = sqlx::query("UPDATE watched_entities SET last_polled_at = ? WHERE id = ?")
            .bind(&polled_at)
            .bind(entity_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| WoltbotError::Storage(format!("poll stamp failed: {e}")))?
            .rows_affected();
        if touched == 0 {
            return Ok(None);
        }

        let row: Option<(String, String, i64, String)> = sqlx::query_as(
            "SELECT status, fingerprint, version, observed_at FROM entity_states \
             WHERE entity_id = ?",
        )
        .bind(entity_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("state read failed: {e}")))?;
        let previous = row.map(|r| state_from_row(entity_id, r)).transpose()?;

        let diff = classify(previous.as_ref(), observation);
        let mut event_id = None;

        match &diff {
            Diff::Unchanged => {}
            Diff::FirstObservation { version } => {
                sqlx::query(
                    "INSERT INTO entity_states (entity_id, status, fingerprint, version, observed_at) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(entity_id)
                .bind(observation.status().as_str())
                .bind(observation.fingerprint())
                .bind(*version)
                .bind(&observed_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| WoltbotError::Storage(format!("state insert failed: {e}")))?;
            }
            Diff::Changed { from, to, version } => {
                let updated = sqlx::query(
                    "UPDATE entity_states SET status = ?, fingerprint = ?, version = ?, observed_at = ? \
                     WHERE entity_id = ? AND version = ?",
                )
                .bind(to.as_str())
                .bind(observation.fingerprint())
                .bind(*version)
                .bind(&observed_at)
                .bind(entity_id)
                .bind(*version - 1)
                .execute(&mut *tx)
                .await
                .map_err(|e| WoltbotError::Storage(format!("state update failed: {e}")))?
                .rows_affected();
                if updated != 1 {
                    return Err(WoltbotError::Storage(format!(
                        "state of entity {entity_id} moved past version {} concurrently",
                        *version - 1
                    )));
                }

                let (id,): (i64,) = sqlx::query_as(
                    "INSERT INTO notification_events \
                     (entity_id, version, from_status, to_status, created_at) \
                     VALUES (?, ?, ?, ?, ?) RETURNING id",
                )
                .bind(entity_id)
                .bind(*version)
                .bind(from.as_str())
                .bind(to.as_str())
                .bind(&polled_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| WoltbotError::Storage(format!("event enqueue failed: {e}")))?;
                event_id = Some(id);
            }
        }

        tx.commit()
            .await
            .map_err(|e| WoltbotError::Storage(format!("state commit failed: {e}")))?;

        Ok(Some(Commit { diff, event_id }))
    }
}

fn state_from_row(
    entity_id: i64,
    (status, fingerprint, version, observed_at): (String, String, i64, String),
) -> Result<EntityState, WoltbotError> {
    let status: EntityStatus = status.parse().map_err(WoltbotError::Storage)?;
    Ok(EntityState {
        entity_id,
        status,
        fingerprint,
        version,
        observed_at,
    })
}
