//! # woltbot-core
//!
//! Core types, traits, configuration, and error handling for woltbot.

pub mod config;
pub mod diff;
pub mod error;
pub mod message;
pub mod model;
pub mod traits;

pub use config::shellexpand;
