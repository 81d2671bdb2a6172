//! # woltbot-platform
//!
//! Delivery-platform clients for woltbot.

pub mod wolt;

pub use wolt::WoltClient;
