//! Watch commands: /subscribe, /unsubscribe, /list, /monitor, and numbered picks.

use super::CommandContext;
use tracing::{info, warn};
use woltbot_core::{
    error::WoltbotError,
    model::{EntityStatus, Observation},
};

/// Search hits offered for a numbered pick.
const MAX_CHOICES: usize = 10;

const PLATFORM_DOWN: &str = "Couldn't reach Wolt right now, please try again later.";
const STORAGE_DOWN: &str = "Something went wrong on my side, please try again later.";

/// Accept a bare slug or a venue URL (last path segment).
fn normalize_ref(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let trimmed = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

pub(super) async fn handle_subscribe(ctx: &CommandContext<'_>, raw: &str) -> String {
    let slug = normalize_ref(raw);
    if slug.is_empty() {
        return "Usage: /subscribe <wolt-venue-slug>".to_string();
    }

    let fetched = match tokio::time::timeout(ctx.timeout, ctx.platform.fetch_state(&slug)).await {
        Ok(r) => r.map_err(WoltbotError::from),
        Err(_) => Err(WoltbotError::Transient(format!(
            "validating {slug} timed out"
        ))),
    };
    match fetched {
        Ok(observation) => subscribe_observed(ctx, &slug, &observation).await,
        Err(WoltbotError::UnknownEntity(_)) => format!("Unknown restaurant '{slug}'."),
        Err(e) => {
            warn!("subscribe: validating {slug} failed: {e}");
            PLATFORM_DOWN.to_string()
        }
    }
}

/// Create the subscription for a venue whose existence was just confirmed.
async fn subscribe_observed(
    ctx: &CommandContext<'_>,
    slug: &str,
    observation: &Observation,
) -> String {
    let subscribed = ctx
        .store
        .subscribe(ctx.chat_id, slug, &observation.name)
        .await;
    ctx.health.record(&subscribed);
    let (subscription, created) = match subscribed {
        Ok(s) => s,
        Err(e) => {
            warn!("subscribe {} -> {slug} failed: {e}", ctx.chat_id);
            return STORAGE_DOWN.to_string();
        }
    };
    let label = &subscription.entity.label;

    // Only a brand-new entity takes this fetch as its first state.
    let seeded = ctx
        .store
        .seed_state(subscription.entity.id, observation)
        .await;
    ctx.health.record(&seeded);
    if let Err(e) = seeded {
        warn!("subscribe: failed to record state of {slug}: {e}");
    }

    if !created {
        return format!("You're already watching \"{label}\".");
    }
    info!("chat {} now watches {slug}", ctx.chat_id);

    let marked = ctx
        .store
        .mark_seen(ctx.chat_id, subscription.entity.id, observation.status())
        .await;
    ctx.health.record(&marked);
    if let Err(e) = marked {
        warn!("subscribe: failed to record what {} was told: {e}", ctx.chat_id);
    }

    match observation.status() {
        EntityStatus::Open => {
            format!("\"{label}\" is open right now! I'll let you know if it closes.")
        }
        EntityStatus::Closed => {
            if let Err(e) = ctx.store.start_wait(ctx.chat_id, slug, label).await {
                warn!("failed to start wait statistics for {slug}: {e}");
            }
            format!("Watching \"{label}\". I'll tell you when it opens.")
        }
    }
}

pub(super) async fn handle_unsubscribe(ctx: &CommandContext<'_>, raw: &str) -> String {
    let slug = normalize_ref(raw);
    if slug.is_empty() {
        return "Usage: /unsubscribe <wolt-venue-slug>".to_string();
    }

    let removed = ctx.store.unsubscribe(ctx.chat_id, &slug).await;
    ctx.health.record(&removed);
    match removed {
        Ok(true) => {
            if let Err(e) = ctx.store.finish_wait(ctx.chat_id, &slug, false).await {
                warn!("failed to close wait statistics for {slug}: {e}");
            }
            info!("chat {} stopped watching {slug}", ctx.chat_id);
            format!("Stopped watching '{slug}'.")
        }
        // Nobody ever watched the slug: still just "not watching" for this chat.
        Ok(false) | Err(WoltbotError::NotFound(_)) => format!("You're not watching '{slug}'."),
        Err(e) => {
            warn!("unsubscribe {} -> {slug} failed: {e}", ctx.chat_id);
            STORAGE_DOWN.to_string()
        }
    }
}

pub(super) async fn handle_list(ctx: &CommandContext<'_>) -> String {
    let listed = ctx.store.list_for(ctx.chat_id).await;
    ctx.health.record(&listed);
    match listed {
        Ok(entities) if entities.is_empty() => {
            "You're not watching any restaurants. Try /monitor <name>.".to_string()
        }
        Ok(entities) => {
            let mut out = String::from("You're watching:");
            for e in &entities {
                out.push_str(&format!("\n- {} ({})", e.label, e.slug));
            }
            out
        }
        Err(e) => {
            warn!("list for {} failed: {e}", ctx.chat_id);
            STORAGE_DOWN.to_string()
        }
    }
}

pub(super) async fn handle_monitor(ctx: &CommandContext<'_>, query: &str) -> String {
    let query = query.trim();
    if query.is_empty() {
        return "Usage: /monitor <restaurant name>".to_string();
    }

    let found = match tokio::time::timeout(ctx.timeout, ctx.platform.search(query)).await {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            warn!("search '{query}' failed: {e}");
            return PLATFORM_DOWN.to_string();
        }
        Err(_) => {
            warn!("search '{query}' timed out");
            return PLATFORM_DOWN.to_string();
        }
    };

    match found.len() {
        0 => "No restaurant found.".to_string(),
        1 => handle_subscribe(ctx, &found[0].slug).await,
        _ => {
            let choices: Vec<_> = found.into_iter().take(MAX_CHOICES).collect();
            let mut out = String::from("Which one?");
            for (i, venue) in choices.iter().enumerate() {
                out.push_str(&format!("\n{}. {}", i + 1, venue.name));
            }
            out.push_str("\n\nReply with the number.");
            ctx.searches
                .lock()
                .await
                .insert(ctx.chat_id.to_string(), choices);
            out
        }
    }
}

pub(super) async fn handle_pick(ctx: &CommandContext<'_>, n: usize) -> String {
    let chosen = {
        let mut searches = ctx.searches.lock().await;
        let Some(choices) = searches.get(ctx.chat_id) else {
            return "Nothing to pick from. Search first with /monitor <name>.".to_string();
        };
        if n == 0 || n > choices.len() {
            return format!("Pick a number between 1 and {}.", choices.len());
        }
        let chosen = choices[n - 1].slug.clone();
        searches.remove(ctx.chat_id);
        chosen
    };
    handle_subscribe(ctx, &chosen).await
}
