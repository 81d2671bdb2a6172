//! # woltbot-store
//!
//! Durable state for woltbot (SQLite-backed): watched venues, subscriptions,
//! committed venue states, the notification queue, and wait statistics.

pub mod store;

pub use store::{
    ChatStats, Commit, Delivery, DeliveryStatus, GeneralStats, Store, VenueStats,
};
