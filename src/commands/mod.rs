//! Chat commands: instant responses built from the store and the platform.

mod stats;
mod status;
mod watch;


use crate::engine::health::Health;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use woltbot_core::{model::VenueMatch, traits::PlatformClient};
use woltbot_store::Store;

/// Grouped context for command execution.
pub struct CommandContext<'a> {
    pub store: &'a Store,
    pub platform: &'a dyn PlatformClient,
    pub health: &'a Health,
    pub searches: &'a Mutex<HashMap<String, Vec<VenueMatch>>>,
    pub chat_id: &'a str,
    pub text: &'a str,
    pub uptime: &'a Instant,
    /// Bound on every platform call made while handling a command.
    pub timeout: Duration,
}

/// Known bot commands.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Subscribe(String),
    Unsubscribe(String),
    List,
    Monitor(String),
    /// Bare number answering a multi-hit `/monitor` search.
    Pick(usize),
    Stats(Option<String>),
    Status,
}

impl Command {
    /// Parse a command from message text. The leading `/` is optional.
    /// Returns `None` for free text, which gets no reply.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let mut parts = text.splitn(2, char::is_whitespace);
        let first = parts.next()?;
        let arg = parts.next().map(str::trim).unwrap_or_default();

        if let Ok(n) = first.parse::<usize>() {
            return arg.is_empty().then_some(Self::Pick(n));
        }

        // Strip @botname suffix (e.g. "/help@wolt_bot" → "/help").
        let cmd = first.split('@').next().unwrap_or(first);
        let cmd = cmd.strip_prefix('/').unwrap_or(cmd).to_ascii_lowercase();
        let arg = arg.to_string();

        match cmd.as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "subscribe" | "watch" => Some(Self::Subscribe(arg)),
            "unsubscribe" | "unwatch" => Some(Self::Unsubscribe(arg)),
            "list" => Some(Self::List),
            "monitor" => Some(Self::Monitor(arg)),
            "stats" => Some(Self::Stats((!arg.is_empty()).then_some(arg))),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

/// Handle a command and return the response text.
pub async fn handle(cmd: Command, ctx: &CommandContext<'_>) -> String {
    match cmd {
        Command::Start => status::handle_start(),
        Command::Help => status::handle_help(),
        Command::Subscribe(slug) => watch::handle_subscribe(ctx, &slug).await,
        Command::Unsubscribe(slug) => watch::handle_unsubscribe(ctx, &slug).await,
        Command::List => watch::handle_list(ctx).await,
        Command::Monitor(query) => watch::handle_monitor(ctx, &query).await,
        Command::Pick(n) => watch::handle_pick(ctx, n).await,
        Command::Stats(None) => stats::handle_stats(ctx).await,
        Command::Stats(Some(slug)) => stats::handle_venue_stats(ctx, &slug).await,
        Command::Status => status::handle_status(ctx).await,
    }
}
