//! Informational commands: /start, /help, /status.

use super::stats::format_duration;
use super::CommandContext;

pub(super) fn handle_start() -> String {
    "Hi! I watch Wolt restaurants and tell you when they open for delivery.\n\
     Send /monitor <name> to find a restaurant, or /help for every command."
        .to_string()
}

pub(super) fn handle_help() -> String {
    "Commands:\n\
     /monitor <name> - search a restaurant and watch it\n\
     /subscribe <slug> - watch a restaurant by its Wolt slug or link\n\
     /unsubscribe <slug> - stop watching a restaurant\n\
     /list - restaurants you are watching\n\
     /stats [slug] - waiting statistics\n\
     /status - bot health"
        .to_string()
}

pub(super) async fn handle_status(ctx: &CommandContext<'_>) -> String {
    let uptime = format_duration(ctx.uptime.elapsed().as_secs() as i64);

    let watching = ctx.store.list_for(ctx.chat_id).await;
    ctx.health.record(&watching);
    let watching = watching
        .map(|w| w.len().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let pending = ctx
        .store
        .pending_event_count()
        .await
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let storage = if ctx.health.is_healthy() {
        "healthy".to_string()
    } else {
        format!(
            "unhealthy ({} consecutive failures)",
            ctx.health.consecutive_failures()
        )
    };

    format!(
        "Status\n\
         Uptime: {uptime}\n\
         Platform: {}\n\
         You are watching: {watching}\n\
         Pending notifications: {pending}\n\
         Storage: {storage}",
        ctx.platform.name(),
    )
}
