mod commands;
mod engine;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use woltbot_channels::TelegramChannel;
use woltbot_core::{
    config::{self, Config, BOT_TOKEN_ENV},
    traits::PlatformClient,
};
use woltbot_platform::WoltClient;
use woltbot_store::Store;

#[derive(Parser)]
#[command(
    name = "woltbot",
    version,
    about = "Telegram bot that tells you when a Wolt restaurant opens"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file (credentials included).
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Storage backend, overriding `[storage].backend`.
    #[arg(short = 'i', long = "storage")]
    storage: Option<String>,

    /// Write logs to this file instead of stdout.
    #[arg(short = 'o', long = "log-file")]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot (default).
    Start,
    /// Show storage health and watch statistics.
    Status {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Search Wolt for a restaurant by name.
    Lookup {
        /// Restaurant name.
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(&cli.config)?;
    if let Some(ref backend) = cli.storage {
        cfg.storage.backend = backend.clone();
    }
    // Rejects unsupported backends before anything else starts.
    cfg.storage.backend()?;

    let _log_guard = init_tracing(cli.log_file.as_deref(), &cfg.bot.log_level)?;

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => {
            if cfg.telegram.bot_token.is_empty() {
                anyhow::bail!(
                    "Telegram bot_token is empty. \
                     Set it in {} or the {BOT_TOKEN_ENV} env var.",
                    cli.config
                );
            }

            std::fs::create_dir_all(config::shellexpand(&cfg.bot.data_dir))?;
            let store = Store::new(&cfg.storage).await?;
            let platform = Arc::new(WoltClient::from_config(&cfg.wolt)?);
            let messenger = Arc::new(TelegramChannel::new(cfg.telegram.clone()));

            info!("woltbot starting ({})", cfg.bot.name);
            let engine = Arc::new(engine::Engine::new(cfg, store, platform, messenger));
            engine.run().await?;
        }
        Commands::Status { json } => print_status(&cfg, &cli.config, json).await?,
        Commands::Lookup { query } => {
            if query.is_empty() {
                anyhow::bail!("no name provided. Usage: woltbot lookup <name>");
            }
            let client = WoltClient::from_config(&cfg.wolt)?;
            let found = client.search(&query.join(" ")).await?;
            if found.is_empty() {
                println!("No restaurant found.");
            }
            for venue in found {
                println!("{}  ({})", venue.name, venue.slug);
            }
        }
    }

    Ok(())
}

/// Log to stdout, or to `log_file` through a non-blocking writer.
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// file writer on drop and must live as long as the process.
fn init_tracing(log_file: Option<&str>, level: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let Some(path) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(None);
    };

    let path = Path::new(path);
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let Some(file_name) = path.file_name() else {
        anyhow::bail!("invalid log file path: {}", path.display());
    };
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn print_status(cfg: &Config, config_path: &str, json: bool) -> anyhow::Result<()> {
    let store = Store::new(&cfg.storage).await?;
    let watched = store.polled_entities().await?;
    let pending = store.pending_event_count().await?;
    let general = store.general_stats().await?;

    if json {
        let report = serde_json::json!({
            "watched_venues": watched.len(),
            "pending_events": pending,
            "db_bytes": store.db_size().await?,
            "stats": general,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("woltbot status\n");
    println!("Config: {config_path}");
    println!(
        "Telegram: {}",
        if cfg.telegram.bot_token.is_empty() {
            "missing bot_token"
        } else {
            "configured"
        }
    );
    println!("Storage: {} ({})", cfg.storage.backend, cfg.storage.db_path);
    println!("Watched venues: {}", watched.len());
    for entity in &watched {
        println!("  {} ({})", entity.label, entity.slug);
    }
    println!("Pending notifications: {pending}");
    if let Some(stats) = general {
        println!(
            "Watches so far: {} (most popular: {})",
            stats.usage_count, stats.most_popular
        );
    }
    Ok(())
}
