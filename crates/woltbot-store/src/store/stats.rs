//! Wait-time statistics.
//!
//! A session opens when a chat starts waiting for a venue (subscribe, or a
//! "now closed" notification) and closes when the chat is told the venue
//! opened, or stops waiting (unsubscribe, unreachable chat).

use super::{now, Store};
use serde::Serialize;
use woltbot_core::error::WoltbotError;

/// Seconds between two stored timestamps.
const WAIT_SECS: &str = "(julianday(ended_at) - julianday(started_at)) * 86400.0";

/// Bot-wide usage numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneralStats {
    pub usage_count: i64,
    pub most_popular: String,
    pub most_popular_requests: i64,
    pub most_popular_unique_chats: i64,
    /// Venue with the longest average wait until opening, in seconds.
    pub slowest: Option<(String, i64)>,
}

/// Usage numbers for one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatStats {
    pub usage_count: i64,
    pub most_watched: Option<String>,
    pub total_wait_secs: i64,
}

/// Average wait for one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VenueStats {
    pub label: String,
    pub average_wait_secs: i64,
    pub samples: i64,
}

impl Store {
    /// Open a wait session unless one is already open for (chat, venue).
    pub async fn start_wait(
        &self,
        chat_id: &str,
        slug: &str,
        label: &str,
    ) -> Result<bool, WoltbotError> {
        let started = sqlx::query(
            "INSERT OR IGNORE INTO watch_sessions (chat_id, slug, label, started_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(chat_id)
        .bind(slug)
        .bind(label)
        .bind(now())
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("start wait failed: {e}")))?
        .rows_affected();
        Ok(started > 0)
    }

    /// Close the open wait session for (chat, venue), if any.
    pub async fn finish_wait(
        &self,
        chat_id: &str,
        slug: &str,
        opened: bool,
    ) -> Result<bool, WoltbotError> {
        let finished = sqlx::query(
            "UPDATE watch_sessions SET ended_at = ?, opened = ? \
             WHERE chat_id = ? AND slug = ? AND ended_at IS NULL",
        )
        .bind(now())
        .bind(opened as i64)
        .bind(chat_id)
        .bind(slug)
        .execute(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("finish wait failed: {e}")))?
        .rows_affected();
        Ok(finished > 0)
    }

    /// Bot-wide statistics, or `None` before the first session.
    pub async fn general_stats(&self) -> Result<Option<GeneralStats>, WoltbotError> {
        let (usage_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM watch_sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WoltbotError::Storage(format!("usage count failed: {e}")))?;
        if usage_count == 0 {
            return Ok(None);
        }

        let popular: Option<(String, i64, i64)> = sqlx::query_as(
            "SELECT MAX(label), COUNT(*) AS requests, COUNT(DISTINCT chat_id) \
             FROM watch_sessions GROUP BY slug \
             ORDER BY requests DESC, MAX(started_at) DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("popular venue query failed: {e}")))?;

        let Some((most_popular, most_popular_requests, most_popular_unique_chats)) = popular
        else {
            return Ok(None);
        };

        let slowest: Option<(String, i64)> = sqlx::query_as(&format!(
            "SELECT MAX(label), CAST(ROUND(AVG({WAIT_SECS})) AS INTEGER) AS wait \
             FROM watch_sessions WHERE opened = 1 AND ended_at IS NOT NULL \
             GROUP BY slug ORDER BY wait DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("slowest venue query failed: {e}")))?;

        Ok(Some(GeneralStats {
            usage_count,
            most_popular,
            most_popular_requests,
            most_popular_unique_chats,
            slowest,
        }))
    }

    /// Statistics for one chat. Open sessions count their wait up to `now`.
    pub async fn chat_stats(&self, chat_id: &str, now: &str) -> Result<ChatStats, WoltbotError> {
        let (usage_count, total_wait_secs): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), \
             COALESCE(CAST(ROUND(SUM((julianday(COALESCE(ended_at, ?)) - julianday(started_at)) * 86400.0)) \
                      AS INTEGER), 0) \
             FROM watch_sessions WHERE chat_id = ?",
        )
        .bind(now)
        .bind(chat_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("chat stats query failed: {e}")))?;

        let most_watched: Option<(String,)> = sqlx::query_as(
            "SELECT MAX(label) FROM watch_sessions WHERE chat_id = ? \
             GROUP BY slug ORDER BY COUNT(*) DESC, MAX(started_at) DESC LIMIT 1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("chat favorite query failed: {e}")))?;

        Ok(ChatStats {
            usage_count,
            most_watched: most_watched.map(|(label,)| label),
            total_wait_secs,
        })
    }

    /// Average wait until opening for a venue, over completed sessions.
    pub async fn venue_stats(&self, slug: &str) -> Result<Option<VenueStats>, WoltbotError> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(&format!(
            "SELECT MAX(label), CAST(ROUND(AVG({WAIT_SECS})) AS INTEGER), COUNT(*) \
             FROM watch_sessions \
             WHERE slug = ? AND opened = 1 AND ended_at IS NOT NULL \
             GROUP BY slug"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| WoltbotError::Storage(format!("venue stats query failed: {e}")))?;

        Ok(row.map(|(label, average_wait_secs, samples)| VenueStats {
            label,
            average_wait_secs,
            samples,
        }))
    }
}
