//! perch-bot: plugin-driven IRC bot.
//!
//! Reads `perch.yaml` (or `--config`), connects, and keeps reconnecting
//! until told to quit. Ctrl-C closes plugins and sends QUIT.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use perch_sdk::client::{self, ClientHandle};
use perch_sdk::event::Event;

use perch_bot::bot::Bot;
use perch_bot::config::{BotConfig, DEFAULT_CONFIG_PATH};
use perch_bot::plugin::Messenger;
use perch_bot::plugins::{self, Deps};
use perch_bot::store::Store;

const DEFAULT_LOG_FILTER: &str = "perch_bot=info,perch_sdk=info";

#[derive(Parser)]
#[command(name = "perch-bot", about = "Plugin-driven IRC bot")]
struct Args {
    /// Config file
    #[arg(long, short, env = "PERCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// IRC server address (host:port), overrides the config
    #[arg(long, env = "PERCH_SERVER")]
    server: Option<String>,

    /// Bot nick, overrides the config
    #[arg(long, env = "PERCH_NICK")]
    nick: Option<String>,

    /// Comma-separated channels, overrides the config
    #[arg(long, value_delimiter = ',')]
    channels: Option<Vec<String>>,

    /// Force TLS
    #[arg(long)]
    tls: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

fn load_config(args: &Args) -> Result<BotConfig> {
    let mut config = BotConfig::load(&args.config)?;
    if let Some(server) = &args.server {
        config.server = server.clone();
    }
    if let Some(nick) = &args.nick {
        // An ident derived from the old nick follows the new one.
        if config.username.as_deref() == Some(config.nick.as_str()) {
            config.username = None;
        }
        config.nick = nick.clone();
    }
    if let Some(channels) = &args.channels {
        config.channels = channels.iter().map(|c| c.trim().to_string()).collect();
    }
    config.tls |= args.tls;
    config.normalize();
    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &BotConfig, json: bool) {
    let default = config.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config, args.json);

    let store = match &config.storage {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            Store::open(path)?
        }
        None => Store::in_memory()?,
    };
    let messenger = Messenger::new();
    let deps = Deps {
        messenger: messenger.clone(),
        store: Arc::new(store),
        http: perch_bot::http::build_client(Duration::from_secs(10))
            .context("Failed to build HTTP client")?,
    };

    let mut bot = Bot::new(&config, messenger);
    for plugin in plugins::build_all(&config, &deps)? {
        bot.register(plugin);
    }
    let bot = Arc::new(bot);
    bot.start().await;

    tracing::info!(
        server = %config.server,
        nick = %config.nick,
        channels = ?config.channels,
        plugins = ?bot.plugin_names(),
        "Starting perch-bot"
    );

    let handler_bot = bot.clone();
    let run = client::run_with_reconnect(
        config.connect_config(),
        config.reconnect_config(),
        move |handle: ClientHandle,
              event: Event|
              -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
            let bot = handler_bot.clone();
            Box::pin(async move { bot.handle_event(&handle, &event).await })
        },
    );

    tokio::select! {
        result = run => {
            bot.shutdown().await;
            result?;
            tracing::info!("Quit");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            bot.shutdown().await;
            if let Some(handle) = bot.messenger().handle() {
                let _ = handle.quit(Some("Shutting down")).await;
                // Let the session flush QUIT before the runtime stops.
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
    Ok(())
}
