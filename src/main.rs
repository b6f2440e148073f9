mod bot;
mod config;
mod corrector;
mod platform;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use teloxide::requests::Requester;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Router;
use crate::config::Config;
use crate::corrector::GrammarClient;
use crate::platform::telegram::{self, TelegramMessenger};

/// Telegram bot that relays text to a grammar-correction service.
#[derive(Debug, Parser)]
#[command(name = "grammar-relay", version)]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Default, Subcommand)]
enum Mode {
    /// Receive updates on the webhook server (default)
    #[default]
    Serve,
    /// Receive updates with long polling
    Poll,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Local development keeps its variables (RUST_LOG included) in .env
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grammar_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from: {} and environment", cli.config.display());
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return Err(e.context("Refusing to start without a complete configuration"));
        }
    };

    info!("Configuration loaded successfully");
    info!("  Admin chat: {}", config.telegram.admin_chat_id);
    info!("  Public URL: {}", config.server.public_url);
    info!("  Grammar endpoint: {}", config.grammar.endpoint);
    info!(
        "  Grammar timeout: {:?} (connect {:?})",
        config.grammar.timeout, config.grammar.connect_timeout
    );

    let messenger = Arc::new(TelegramMessenger::new(&config.telegram));
    let grammar = GrammarClient::new(&config.grammar)?;
    let mut router = Router::new(&config, messenger.clone(), grammar);

    // Needed to tell `/start@this_bot` apart from commands meant for other bots
    match messenger.bot().get_me().await {
        Ok(me) => match me.user.username {
            Some(username) => {
                info!("  Bot username: @{}", username);
                router = router.with_bot_username(username);
            }
            None => warn!("Bot account has no username, only bare commands will match"),
        },
        Err(e) => warn!("Failed to fetch bot identity, only bare commands will match: {}", e),
    }
    let router = Arc::new(router);

    match cli.mode.unwrap_or_default() {
        Mode::Serve => webhook::serve(config.server.bind_addr, router)
            .await
            .context("Webhook server stopped with an error")?,
        Mode::Poll => telegram::run_polling(router, messenger.bot()).await?,
    }

    Ok(())
}
