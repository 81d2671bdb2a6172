//! Waiting statistics: /stats and /stats <slug>.

use super::CommandContext;
use chrono::Utc;
use tracing::warn;
use woltbot_core::model::sql_time;

/// Render seconds as a compact "1h 5m 3s".
pub(super) fn format_duration(total_secs: i64) -> String {
    let total = total_secs.max(0);
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m {s}s"),
        _ => format!("{h}h {m}m {s}s"),
    }
}

pub(super) async fn handle_stats(ctx: &CommandContext<'_>) -> String {
    let general = ctx.store.general_stats().await;
    ctx.health.record(&general);
    let chat = ctx
        .store
        .chat_stats(ctx.chat_id, &sql_time(Utc::now()))
        .await;
    ctx.health.record(&chat);

    let (general, chat) = match (general, chat) {
        (Ok(g), Ok(c)) => (g, c),
        (Err(e), _) | (_, Err(e)) => {
            warn!("stats for {} failed: {e}", ctx.chat_id);
            return "Statistics are unavailable right now.".to_string();
        }
    };

    let Some(general) = general else {
        return "No statistics yet. Watch a restaurant with /monitor <name>.".to_string();
    };

    let mut out = format!(
        "General statistics\n\
         Watches so far: {}\n\
         Most popular: {} ({} requests from {} chats)",
        general.usage_count,
        general.most_popular,
        general.most_popular_requests,
        general.most_popular_unique_chats,
    );
    if let Some((label, wait)) = &general.slowest {
        out.push_str(&format!(
            "\nLongest average wait: {label} ({})",
            format_duration(*wait)
        ));
    }

    out.push_str(&format!(
        "\n\nYour statistics\nWatches so far: {}",
        chat.usage_count
    ));
    if let Some(favorite) = &chat.most_watched {
        out.push_str(&format!("\nMost watched: {favorite}"));
    }
    out.push_str(&format!(
        "\nTotal time spent waiting: {}",
        format_duration(chat.total_wait_secs)
    ));
    out
}

pub(super) async fn handle_venue_stats(ctx: &CommandContext<'_>, slug: &str) -> String {
    let slug = slug.trim().to_ascii_lowercase();
    let venue = ctx.store.venue_stats(&slug).await;
    ctx.health.record(&venue);
    match venue {
        Ok(Some(v)) => format!(
            "{}: average wait until open is {} (over {} wait(s))",
            v.label,
            format_duration(v.average_wait_secs),
            v.samples
        ),
        Ok(None) => format!("No completed waits for '{slug}' yet."),
        Err(e) => {
            warn!("venue stats for {slug} failed: {e}");
            "Statistics are unavailable right now.".to_string()
        }
    }
}
