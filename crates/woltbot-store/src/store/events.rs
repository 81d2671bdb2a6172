//! Notification queue and per-chat delivery ledger.
//!
//! A delivery row keyed by (event, chat) is the idempotency key for a
//! notification: its status records whether the chat already got this
//! version transition, so a restarted dispatcher never re-sends it.

use super::{now, Store};
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use woltbot_core::{error::WoltbotError, model::NotificationEvent};

/// Delivery outcome for one (event, chat) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Waiting for its first or next attempt.
    Pending,
    /// Handed to the messaging client; outcome not yet recorded.
    Sending,
    Delivered,
    /// The chat is gone for good.
    Unreachable,
    /// Transient failures used up every attempt.
    Exhausted,
    /// The chat unsubscribed before delivery.
    Cancelled,
    /// Interrupted mid-send by a crash; never retried.
    Unknown,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Delivered => "delivered",
            Self::Unreachable => "unreachable",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Sending)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = WoltbotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "sending" => Self::Sending,
            "delivered" => Self::Delivered,
            "unreachable" => Self::Unreachable,
            "exhausted" => Self::Exhausted,
            "cancelled" => Self::Cancelled,
            "unknown" => Self::Unknown,
            other => {
                return Err(WoltbotError::Storage(format!(
                    "unknown delivery status '{other}'"
                )))
            }
        })
    }
}

/// A row of the delivery ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event_id: i64,
    pub chat_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<String>,
    pub last_error: Option<String>,
}

type EventRow = (i64, i64, String, String, i64, String, String, String);
type DeliveryRow = (i64, String, String, i64, Option<String>, Option<String>);

impl Store {
    /// The oldest unprocessed event of every entity, in commit order.
    ///
    /// Later events of the same entity stay queued until this one is fully
    /// processed, which keeps per-entity notification order.
    pub async fn pending_heads(&self) -> Result<Vec<NotificationEvent>, WoltbotError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT n.id, n.entity_id, e.slug, e.label, n.version, n.from_status, n.to_status, n.created_at \
             FROM notification_events n \
             JOIN watched_entities e ON e.id = n.entity_id \
             WHERE n.processed_at IS NULL \
             AND n.id = (SELECT MIN(m.id) FROM notification_events m \
                         WHERE m.entity_id = n.entity_id AND m.processed_at IS NULL) \
             ORDER BY n.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("pending events query failed: {e}")))?;

        rows.into_iter().map(event_from_row).collect()
    }

    /// Materialize one delivery row per current subscriber of the event's
    /// entity. Runs once per event; returns the number of rows created.
    ///
    /// A chat that was already told the event's new status when it
    /// subscribed (see [`Store::mark_seen`]) gets no row.
    pub async fn fan_out(&self, event: &NotificationEvent) -> Result<u64, WoltbotError> {
        let now = now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WoltbotError::Storage(format!("fan-out begin failed: {e}")))?;

        let claimed = sqlx::query(
            "UPDATE notification_events SET fanned_out_at = ? \
             WHERE id = ? AND fanned_out_at IS NULL",
        )
        .bind(&now)
        .bind(event.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("fan-out claim failed: {e}")))?
        .rows_affected();

        if claimed == 0 {
            tx.rollback()
                .await
                .map_err(|e| WoltbotError::Storage(format!("fan-out rollback failed: {e}")))?;
            return Ok(0);
        }

        let created = sqlx::query(
            "INSERT INTO deliveries (event_id, chat_id, status, attempts, updated_at) \
             SELECT ?, chat_id, 'pending', 0, ? FROM subscriptions WHERE entity_id = ? \
             AND NOT (COALESCE(seen_after_version, -1) = ? AND COALESCE(seen_status, '') = ?)",
        )
        .bind(event.id)
        .bind(&now)
        .bind(event.entity_id)
        .bind(event.version - 1)
        .bind(event.to_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| WoltbotError::Storage(format!("fan-out insert failed: {e}")))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| WoltbotError::Storage(format!("fan-out commit failed: {e}")))?;
        Ok(created)
    }

    /// Pending deliveries of an event whose backoff has elapsed at `now`.
    pub async fn due_deliveries(
        &self,
        event_id: i64,
        now: &str,
    ) -> Result<Vec<Delivery>, WoltbotError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            "SELECT event_id, chat_id, status, attempts, next_attempt_at, last_error \
             FROM deliveries \
             WHERE event_id = ? AND status = 'pending' \
             AND (next_attempt_at IS NULL OR next_attempt_at <= ?) \
             ORDER BY chat_id",
        )
        .bind(event_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("due deliveries query failed: {e}")))?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    /// Every delivery row of an event.
    pub async fn deliveries_for(&self, event_id: i64) -> Result<Vec<Delivery>, WoltbotError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            "SELECT event_id, chat_id, status, attempts, next_attempt_at, last_error \
             FROM deliveries WHERE event_id = ? ORDER BY chat_id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("deliveries query failed: {e}")))?;

        rows.into_iter().map(delivery_from_row).collect()
    }

    /// Claim a pending delivery for one send attempt.
    ///
    /// Returns the attempt number, or `None` if the row is no longer pending.
    pub async fn begin_attempt(
        &self,
        event_id: i64,
        chat_id: &str,
    ) -> Result<Option<u32>, WoltbotError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE deliveries SET status = 'sending', attempts = attempts + 1, updated_at = ? \
             WHERE event_id = ? AND chat_id = ? AND status = 'pending' \
             RETURNING attempts",
        )
        .bind(now())
        .bind(event_id)
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("attempt claim failed: {e}")))?;

        Ok(row.map(|(n,)| n as u32))
    }

    /// Record a terminal outcome for a delivery.
    pub async fn finish_delivery(
        &self,
        event_id: i64,
        chat_id: &str,
        status: DeliveryStatus,
        error: Option<&str>,
    ) -> Result<(), WoltbotError> {
        if !status.is_terminal() {
            return Err(WoltbotError::Storage(format!(
                "finish_delivery called with non-terminal status {status}"
            )));
        }
        sqlx::query(
            "UPDATE deliveries SET status = ?, last_error = COALESCE(?, last_error), \
             next_attempt_at = NULL, updated_at = ? \
             WHERE event_id = ? AND chat_id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(now())
        .bind(event_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("delivery update failed: {e}")))?;
        Ok(())
    }

    /// Put a delivery back in the queue until `next_attempt_at`.
    pub async fn schedule_retry(
        &self,
        event_id: i64,
        chat_id: &str,
        next_attempt_at: &str,
        error: &str,
    ) -> Result<(), WoltbotError> {
        sqlx::query(
            "UPDATE deliveries SET status = 'pending', next_attempt_at = ?, last_error = ?, \
             updated_at = ? \
             WHERE event_id = ? AND chat_id = ?",
        )
        .bind(next_attempt_at)
        .bind(error)
        .bind(now())
        .bind(event_id)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("retry schedule failed: {e}")))?;
        Ok(())
    }

    /// Mark the event processed once every delivery reached a terminal
    /// outcome. Returns whether the event is now processed.
    pub async fn complete_event_if_done(&self, event_id: i64) -> Result<bool, WoltbotError> {
        let done = sqlx::query(
            "UPDATE notification_events SET processed_at = ? \
             WHERE id = ? AND processed_at IS NULL AND fanned_out_at IS NOT NULL \
             AND NOT EXISTS (SELECT 1 FROM deliveries d \
                             WHERE d.event_id = ? AND d.status IN ('pending', 'sending'))",
        )
        .bind(now())
        .bind(event_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("event completion failed: {e}")))?
        .rows_affected();

        Ok(done > 0)
    }

    /// Resolve deliveries left in `sending` by a crash to `unknown`.
    ///
    /// Whether the message reached the chat cannot be known, and re-sending
    /// could notify twice, so these are never retried.
    pub async fn recover_interrupted_deliveries(&self) -> Result<u64, WoltbotError> {
        let recovered = sqlx::query(
            "UPDATE deliveries SET status = 'unknown', updated_at = ?, \
             last_error = 'interrupted during send' \
             WHERE status = 'sending'",
        )
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("delivery recovery failed: {e}")))?
        .rows_affected();

        if recovered > 0 {
            warn!("{recovered} delivery(ies) were interrupted mid-send; not re-sending");
        }
        Ok(recovered)
    }

    /// Drop events processed at or before `cutoff`, with their ledgers.
    pub async fn purge_processed_events(&self, cutoff: &str) -> Result<u64, WoltbotError> {
        let purged = sqlx::query(
            "DELETE FROM notification_events WHERE processed_at IS NOT NULL AND processed_at <= ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("event purge failed: {e}")))?
        .rows_affected();
        Ok(purged)
    }

    /// Number of events not yet fully processed.
    pub async fn pending_event_count(&self) -> Result<i64, WoltbotError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM notification_events WHERE processed_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| WoltbotError::Storage(format!("pending count failed: {e}")))?;
        Ok(count)
    }
}

fn event_from_row(
    (id, entity_id, slug, label, version, from_status, to_status, created_at): EventRow,
) -> Result<NotificationEvent, WoltbotError> {
    Ok(NotificationEvent {
        id,
        entity_id,
        slug,
        label,
        version,
        from_status: from_status.parse().map_err(WoltbotError::Storage)?,
        to_status: to_status.parse().map_err(WoltbotError::Storage)?,
        created_at,
    })
}

fn delivery_from_row(
    (event_id, chat_id, status, attempts, next_attempt_at, last_error): DeliveryRow,
) -> Result<Delivery, WoltbotError> {
    Ok(Delivery {
        event_id,
        chat_id,
        status: status.parse()?,
        attempts: attempts.max(0) as u32,
        next_attempt_at,
        last_error,
    })
}
