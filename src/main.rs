//! connectome-adapter CLI entry point.
//!
//! Parses `--platform`, `--config`, `--adapter-id`, builds the `Config` and
//! the one `PlatformDriver` the chosen platform needs, wires the caches,
//! conversation manager, rate limiter, and the socket.io transport, then
//! runs until a signal or the reconnect policy gives up.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use connectome::attachments::AttachmentStore;
use connectome::cache::{AttachmentCache, MessageCache, UserCache};
use connectome::config::Config;
use connectome::conversation::manager::ConversationManager;
use connectome::error::Result;
use connectome::events::incoming::AdapterIdentity;
use connectome::events::outgoing::OutgoingEventBuilder;
use connectome::events::request::RequestEventBuilder;
use connectome::file_adapter::{FileAdapterCommand, FileAdapterProcessor, FileEventCache, PathValidator};
use connectome::history::HistoryFetcher;
use connectome::platform::discord::DiscordAdapter;
use connectome::platform::discord_webhook::DiscordWebhookAdapter;
use connectome::platform::slack::SlackAdapter;
use connectome::platform::telegram::TelegramAdapter;
use connectome::platform::zulip::ZulipAdapter;
use connectome::platform::PlatformDriver;
use connectome::processors::{IncomingProcessor, OutgoingProcessor};
use connectome::rate_limiter::RateLimiter;
use connectome::shell_adapter::{ShellAdapterCommand, ShellAdapterProcessor, SessionManager};
use connectome::transport::SocketIoTransport;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "connectome-adapter", version)]
#[command(about = "Bridges one upstream chat platform to a socket.io controller")]
struct Cli {
    /// Upstream platform to bridge (discord, discord_webhook, telegram, slack, zulip, file, shell).
    #[arg(long)]
    platform: Option<String>,

    /// Path to a TOML config file. Falls back to environment-only config.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the adapter id from config/environment.
    #[arg(long)]
    adapter_id: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool, data_dir: &std::path::Path) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let log_dir = data_dir.join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "connectome-adapter.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    std::mem::forget(guard);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).compact())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false).compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config::resolve reads CONNECTOME_ADAPTER_TYPE/_ID from the environment
    // and validates credentials against it immediately, so CLI overrides
    // have to land in the environment before loading rather than after.
    if let Some(platform) = &cli.platform {
        std::env::set_var("CONNECTOME_ADAPTER_TYPE", platform);
    }
    if let Some(adapter_id) = &cli.adapter_id {
        std::env::set_var("CONNECTOME_ADAPTER_ID", adapter_id);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    init_tracing(cli.debug, &config.data_dir);
    info!(adapter_type = %config.adapter.adapter_type, adapter_id = %config.adapter.adapter_id, "starting connectome-adapter");

    match config.adapter.adapter_type.as_str() {
        "file" => run_file_adapter(config).await,
        "shell" => run_shell_adapter(config).await,
        _ => run_platform_adapter(config).await,
    }
}

/// `file`/`shell` are not `PlatformDriver`s: no conversation state, no
/// history, no rate limiting, just request/response over the same
/// transport as the messaging adapters.
async fn run_file_adapter(config: Config) -> anyhow::Result<()> {
    let validator = PathValidator::new(&config.file_adapter);
    let event_cache = Arc::new(FileEventCache::new(
        config.file_adapter.backup_directory.clone(),
        config.file_adapter.event_ttl_hours,
        config.file_adapter.max_events_per_file,
    ));
    let processor = Arc::new(FileAdapterProcessor::new(validator, event_cache.clone(), config.file_adapter.max_token_count));

    tokio::spawn({
        let event_cache = event_cache.clone();
        let interval = config.file_adapter.cleanup_interval_hours;
        async move { event_cache.run_maintenance(interval).await }
    });

    let transport = SocketIoTransport::new(
        config.socket_io.url.clone(),
        config.adapter.adapter_type.clone(),
        config.socket_io.reconnect_backoff_ms_base,
        config.socket_io.reconnect_backoff_ms_max,
    );
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    transport.connect(inbound_tx).await?;
    transport.emit_connect().await?;

    while let Some(command) = inbound_rx.recv().await {
        let transport = transport.clone();
        let processor = processor.clone();
        let adapter_type = config.adapter.adapter_type.clone();
        tokio::spawn(async move {
            let request_id = command.request_id.clone().unwrap_or_default();
            match FileAdapterCommand::build(&command.event_type, command.data) {
                Ok(built) => match processor.handle(built).await {
                    Ok(reply) => {
                        let payload = RequestEventBuilder::success(&adapter_type, &request_id, None, &reply.into_reply_payload());
                        let _ = transport.emit_request_success(payload).await;
                    }
                    Err(error) => {
                        warn!(%error, "file adapter command failed");
                        let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                        let _ = transport.emit_request_failed(payload).await;
                    }
                },
                Err(error) => {
                    let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                    let _ = transport.emit_request_failed(payload).await;
                }
            }
        });
    }
    Ok(())
}

async fn run_shell_adapter(config: Config) -> anyhow::Result<()> {
    let manager = SessionManager::new(&config.shell_adapter);
    let processor = Arc::new(ShellAdapterProcessor::new(manager));

    tokio::spawn({
        let processor = processor.clone();
        async move { processor.run_maintenance().await }
    });

    let transport = SocketIoTransport::new(
        config.socket_io.url.clone(),
        config.adapter.adapter_type.clone(),
        config.socket_io.reconnect_backoff_ms_base,
        config.socket_io.reconnect_backoff_ms_max,
    );
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    transport.connect(inbound_tx).await?;
    transport.emit_connect().await?;

    while let Some(command) = inbound_rx.recv().await {
        let transport = transport.clone();
        let processor = processor.clone();
        let adapter_type = config.adapter.adapter_type.clone();
        tokio::spawn(async move {
            let request_id = command.request_id.clone().unwrap_or_default();
            match ShellAdapterCommand::build(&command.event_type, command.data) {
                Ok(built) => match processor.handle(built).await {
                    Ok(reply) => {
                        let payload = RequestEventBuilder::success(&adapter_type, &request_id, None, &reply.into_reply_payload());
                        let _ = transport.emit_request_success(payload).await;
                    }
                    Err(error) => {
                        warn!(%error, "shell adapter command failed");
                        let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                        let _ = transport.emit_request_failed(payload).await;
                    }
                },
                Err(error) => {
                    let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                    let _ = transport.emit_request_failed(payload).await;
                }
            }
        });
    }
    Ok(())
}

/// Either platform is built as its concrete adapter so the incoming
/// listener (where one exists) can be spawned against the real client;
/// the core processors only ever see it through `Arc<dyn PlatformDriver>`.
enum BuiltDriver {
    Discord(Arc<DiscordAdapter>),
    Telegram(Arc<TelegramAdapter>),
    Other(Arc<dyn PlatformDriver>),
}

impl BuiltDriver {
    fn as_dyn(&self) -> Arc<dyn PlatformDriver> {
        match self {
            BuiltDriver::Discord(driver) => driver.clone(),
            BuiltDriver::Telegram(driver) => driver.clone(),
            BuiltDriver::Other(driver) => driver.clone(),
        }
    }
}

fn build_driver(config: &Config) -> Result<BuiltDriver> {
    use connectome::config::ConfigError;
    let creds = &config.credentials;
    let built = match config.adapter.adapter_type.as_str() {
        "discord" => {
            let token = creds.discord_bot_token.clone().ok_or(ConfigError::MissingKey("DISCORD_BOT_TOKEN".into()))?;
            BuiltDriver::Discord(Arc::new(DiscordAdapter::new(token)))
        }
        "discord_webhook" => {
            let url = creds.discord_webhook_url.clone().ok_or(ConfigError::MissingKey("DISCORD_WEBHOOK_URL".into()))?;
            BuiltDriver::Other(Arc::new(DiscordWebhookAdapter::new(url)))
        }
        "telegram" => {
            let token = creds.telegram_bot_token.clone().ok_or(ConfigError::MissingKey("TELEGRAM_BOT_TOKEN".into()))?;
            BuiltDriver::Telegram(Arc::new(TelegramAdapter::new(token, config.adapter.adapter_id.clone())))
        }
        "slack" => {
            let token = creds.slack_bot_token.clone().ok_or(ConfigError::MissingKey("SLACK_BOT_TOKEN".into()))?;
            BuiltDriver::Other(Arc::new(SlackAdapter::new(token)))
        }
        "zulip" => {
            let site = creds.zulip_site.clone().ok_or(ConfigError::MissingKey("ZULIP_SITE".into()))?;
            let email = creds.zulip_email.clone().ok_or(ConfigError::MissingKey("ZULIP_EMAIL".into()))?;
            let api_key = creds.zulip_api_key.clone().ok_or(ConfigError::MissingKey("ZULIP_API_KEY".into()))?;
            BuiltDriver::Other(Arc::new(ZulipAdapter::new(site, email, api_key)))
        }
        other => return Err(ConfigError::Invalid(format!("unsupported adapter_type: {other}")).into()),
    };
    Ok(built)
}

async fn run_platform_adapter(config: Config) -> anyhow::Result<()> {
    let built_driver = build_driver(&config)?;
    let driver = built_driver.as_dyn();
    let adapter_type = config.adapter.adapter_type.clone();

    let message_cache = Arc::new(MessageCache::new(
        config.caching.max_age_hours,
        config.caching.max_messages_per_conversation,
        config.caching.max_total_messages,
    ));
    let attachment_cache = Arc::new(AttachmentCache::new(config.caching.max_age_hours, config.caching.max_attachments));
    let user_cache = Arc::new(UserCache::new(config.caching.max_age_hours, config.caching.max_users));
    let conversation_manager = Arc::new(ConversationManager::new(
        config.adapter.adapter_id.clone(),
        message_cache.clone(),
        attachment_cache.clone(),
        user_cache.clone(),
    ));
    let attachment_store = Arc::new(AttachmentStore::new(
        config.attachments.storage_dir.clone(),
        config.attachments.max_file_size_mb,
        config.attachments.large_file_threshold_mb,
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.buckets.clone()));
    let history_fetcher = Arc::new(HistoryFetcher::new(
        message_cache.clone(),
        conversation_manager.clone(),
        config.adapter.max_history_limit,
        config.adapter.max_pagination_iterations,
        true,
    ));
    let identity = AdapterIdentity {
        adapter_name: config.adapter.adapter_name.clone(),
        adapter_id: config.adapter.adapter_id.clone(),
    };

    let incoming = Arc::new(IncomingProcessor::new(
        conversation_manager.clone(),
        history_fetcher.clone(),
        driver.clone(),
        attachment_store.clone(),
        identity.clone(),
    ));
    let outgoing = Arc::new(OutgoingProcessor::new(
        driver.clone(),
        conversation_manager.clone(),
        rate_limiter.clone(),
        history_fetcher.clone(),
        attachment_store.clone(),
        attachment_cache.clone(),
        identity,
    ));

    let transport = SocketIoTransport::new(
        config.socket_io.url.clone(),
        adapter_type.clone(),
        config.socket_io.reconnect_backoff_ms_base,
        config.socket_io.reconnect_backoff_ms_max,
    );
    let (inbound_tx, mut inbound_rx) = mpsc::channel(256);
    transport.connect(inbound_tx).await?;
    transport.emit_connect().await?;

    let halted = Arc::new(AtomicBool::new(false));
    tokio::spawn(transport.clone().run_connection_monitor(
        driver.clone(),
        std::time::Duration::from_secs(config.adapter.connection_check_interval_secs),
        config.adapter.max_reconnect_attempts,
        halted.clone(),
    ));
    tokio::spawn({
        let message_cache = message_cache.clone();
        let attachment_cache = attachment_cache.clone();
        let user_cache = user_cache.clone();
        let interval = std::time::Duration::from_secs(config.caching.maintenance_interval_secs);
        async move {
            loop {
                tokio::time::sleep(interval).await;
                message_cache.run_maintenance().await;
                attachment_cache.run_maintenance().await;
                user_cache.run_maintenance().await;
            }
        }
    });

    spawn_listener(built_driver, incoming.clone(), transport.clone());

    while let Some(command) = inbound_rx.recv().await {
        if halted.load(Ordering::SeqCst) {
            warn!("dropping outgoing command while the connection is halted");
            continue;
        }
        let transport = transport.clone();
        let outgoing = outgoing.clone();
        let adapter_type = adapter_type.clone();
        tokio::spawn(async move {
            let request_id = command.request_id.clone().unwrap_or_default();
            let _ = transport.emit_request_queued(&request_id).await;
            match OutgoingEventBuilder::build(&command.event_type, command.data) {
                Ok(built) => match outgoing.handle(built).await {
                    Ok(reply) => {
                        let payload = RequestEventBuilder::success(&adapter_type, &request_id, None, &reply);
                        let _ = transport.emit_request_success(payload).await;
                    }
                    Err(error) => {
                        warn!(%error, "outgoing command failed");
                        let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                        let _ = transport.emit_request_failed(payload).await;
                    }
                },
                Err(error) => {
                    let payload = RequestEventBuilder::failed(&adapter_type, &request_id, error.kind(), &error.to_string());
                    let _ = transport.emit_request_failed(payload).await;
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    transport.shutdown().await;
    Ok(())
}

/// Wire the platform's own raw-event listener to the incoming processor and
/// on to the transport. Slack/Zulip/the Discord webhook adapter have no
/// listener loop (Socket Mode / event-queue polling is unimplemented), so
/// outgoing-only operation is all they support for now.
fn spawn_listener(driver: BuiltDriver, incoming: Arc<IncomingProcessor>, transport: Arc<SocketIoTransport>) {
    match driver {
        BuiltDriver::Discord(discord_driver) => {
            let (tx, mut rx) = mpsc::channel(256);
            tokio::spawn(async move {
                if let Err(error) = discord_driver.connect(tx).await {
                    error!(%error, "discord gateway connection failed");
                }
            });
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    for payload in incoming.handle_discord_event(event).await {
                        if let Err(error) = transport.emit_bot_request(&payload).await {
                            warn!(%error, "failed to emit discord-derived bot_request");
                        }
                    }
                }
            });
        }
        BuiltDriver::Telegram(telegram_driver) => {
            let (tx, mut rx) = mpsc::channel(256);
            telegram_driver.spawn_listener(tx);
            tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    for payload in incoming.handle_telegram_update(update).await {
                        if let Err(error) = transport.emit_bot_request(&payload).await {
                            warn!(%error, "failed to emit telegram-derived bot_request");
                        }
                    }
                }
            });
        }
        BuiltDriver::Other(driver) => {
            info!(adapter_type = driver.adapter_type(), "no upstream listener wired for this platform; outgoing-only");
        }
    }
}
