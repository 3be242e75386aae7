//! Relaybot: a Discord bot that relays prompts to OpenAI models and answers
//! inside threaded conversations.

mod discord;
mod openai;

use clap::Parser;
use discord::{DiscordPlatform, Gateway, GatewayEvent};
use discord::model::ReadyEvent;
use openai::OpenAiClient;
use relaybot_core::commands::builtin_commands;
use relaybot_core::config::{ConfigOverrides, DiscordOverrides};
use relaybot_core::conversation::TiktokenTokenizer;
use relaybot_core::platform::ChannelMessage;
use relaybot_core::{BotConfig, ChatPlatform, LlmClient, Router};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Gateway events buffered before the reader waits on dispatch.
const EVENT_BUFFER: usize = 256;

/// Relaybot: chat with OpenAI models in Discord threads
#[derive(Parser, Debug)]
#[command(name = "relaybot", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Register commands in this guild only
    #[arg(short, long)]
    guild: Option<String>,

    /// Delete the registered commands on shutdown
    #[arg(long)]
    remove_commands: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            discord: DiscordOverrides {
                guild: self.guild.clone(),
                remove_commands: self.remove_commands.then_some(true),
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = directories::ProjectDirs::from("dev", "relaybot", "relaybot")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "relaybot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let config = relaybot_core::load_config(cli.config.as_deref(), Some(&cli.overrides()))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    config.validate()?;

    run(config).await
}

async fn run(config: BotConfig) -> anyhow::Result<()> {
    let platform = Arc::new(DiscordPlatform::new(config.discord.token.clone()));
    let llm: Option<Arc<dyn LlmClient>> = match OpenAiClient::new(&config.openai) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "OpenAI client unavailable");
            None
        }
    };
    let router = Arc::new(Router::new(builtin_commands(
        &config,
        llm,
        Arc::new(TiktokenTokenizer::new()),
    )));
    let guild = config.discord.guild.as_deref();

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let gateway = tokio::spawn(Gateway::new(config.discord.token.clone()).run(tx));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                handle_event(event, &platform, &router, guild).await;
            }
        }
    }

    let gateway_result = if gateway.is_finished() {
        Some(gateway.await)
    } else {
        gateway.abort();
        None
    };

    if config.discord.remove_commands {
        let errors = router.clear_commands(platform.as_ref(), guild).await;
        if errors.is_empty() {
            info!("Removed registered commands");
        }
    }

    match gateway_result {
        Some(Ok(Err(e))) => Err(anyhow::anyhow!("Gateway stopped: {}", e)),
        Some(Err(e)) => Err(anyhow::anyhow!("Gateway task failed: {}", e)),
        _ => Ok(()),
    }
}

async fn handle_event(
    event: GatewayEvent,
    platform: &Arc<DiscordPlatform>,
    router: &Arc<Router>,
    guild: Option<&str>,
) {
    match event {
        GatewayEvent::Ready(ReadyEvent { user, application }) => {
            info!(user = %user.username, application_id = %application.id, "Connected to Discord");
            platform.set_session(application.id, user.id);
            if let Err(e) = router.sync(platform.as_ref(), guild).await {
                error!(error = %e, "Cannot register commands");
            }
        }
        GatewayEvent::InteractionCreate(raw) => {
            let Some(interaction) = raw.into_interaction() else {
                debug!("Ignoring non-command interaction");
                return;
            };
            let platform: Arc<dyn ChatPlatform> = platform.clone();
            let router = router.clone();
            tokio::spawn(async move {
                router.dispatch_interaction(platform, interaction).await;
            });
        }
        GatewayEvent::MessageCreate(raw) => {
            let message = ChannelMessage::from(raw);
            let platform: Arc<dyn ChatPlatform> = platform.clone();
            let router = router.clone();
            tokio::spawn(async move {
                router.dispatch_message(platform, message).await;
            });
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["relaybot", "--guild", "123", "--remove-commands", "-vv"]);
        assert_eq!(cli.verbose, 2);
        let overrides = cli.overrides();
        assert_eq!(overrides.discord.guild.as_deref(), Some("123"));
        assert_eq!(overrides.discord.remove_commands, Some(true));
    }

    #[test]
    fn test_cli_without_flags_overrides_nothing() {
        let cli = Cli::parse_from(["relaybot"]);
        let overrides = cli.overrides();
        assert!(overrides.discord.guild.is_none());
        assert!(overrides.discord.remove_commands.is_none());
    }
}
