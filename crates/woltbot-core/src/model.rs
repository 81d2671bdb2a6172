//! Domain records shared by the store, the engine, and the platform clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Observable venue status after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Online and accepting delivery orders.
    Open,
    Closed,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(format!("unknown entity status '{other}'")),
        }
    }
}

/// A venue being monitored on the delivery platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEntity {
    pub id: i64,
    /// Platform reference (Wolt venue slug).
    pub slug: String,
    /// Human-readable label shown in notifications.
    pub label: String,
}

/// Last committed snapshot for a watched entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityState {
    pub entity_id: i64,
    pub status: EntityStatus,
    /// SHA-256 of the normalized observable fields.
    pub fingerprint: String,
    /// Starts at 1, incremented on every committed change.
    pub version: i64,
    pub observed_at: String,
}

/// A (chat, entity) watch relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub chat_id: String,
    pub entity: WatchedEntity,
    pub created_at: String,
}

/// A committed state transition waiting to be fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub id: i64,
    pub entity_id: i64,
    pub slug: String,
    pub label: String,
    pub version: i64,
    pub from_status: EntityStatus,
    pub to_status: EntityStatus,
    pub created_at: String,
}

impl NotificationEvent {
    /// Text delivered to every subscriber.
    pub fn render(&self) -> String {
        match self.to_status {
            EntityStatus::Open => format!("\"{}\" is now open!", self.label),
            EntityStatus::Closed => format!("\"{}\" is now closed.", self.label),
        }
    }
}

/// A validated reading of a venue's state from the delivery platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub slug: String,
    pub name: String,
    pub online: bool,
    pub delivery_enabled: bool,
    /// Delivery estimate. Fluctuates between polls, never part of the diff.
    pub estimate_minutes: Option<u32>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    pub fn status(&self) -> EntityStatus {
        if self.online && self.delivery_enabled {
            EntityStatus::Open
        } else {
            EntityStatus::Closed
        }
    }

    /// Hash of the normalized field subset used to decide changed vs unchanged.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"status=");
        hasher.update(self.status().as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A search hit returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueMatch {
    pub name: String,
    pub slug: String,
}

/// Format a timestamp the way the store persists it (SQLite `datetime` text).
pub fn sql_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
