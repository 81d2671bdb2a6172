//! # woltbot-channels
//!
//! Messaging platform integrations for woltbot.

pub mod telegram;

pub use telegram::TelegramChannel;
