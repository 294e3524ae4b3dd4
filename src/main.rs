use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use photo_relay::channels::{Messenger, TelegramChannel, WebhookState, webhook_routes};
use photo_relay::config::{BotConfig, COLLABORATOR_TIMEOUT, StorageConfig};
use photo_relay::detection::{Detector, HttpDetector};
use photo_relay::dispatch::Dispatcher;
use photo_relay::storage::{HttpObjectStore, LocalObjectStore, ObjectStore};

const LOG_FILE_PREFIX: &str = "photo-relay.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match BotConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC-...");
            std::process::exit(1);
        }
    };

    // Initialize tracing; the guard flushes the file writer on exit
    let _log_guard = init_tracing(&config);

    eprintln!("📷 Photo Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Telegram: {} (allowed: {})",
        if config.app_url.is_some() { "webhook" } else { "long-poll" },
        if config.allowed_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.allowed_users.join(", ")
        }
    );
    eprintln!("   Detection: {} ({:?})", config.detection_url, config.detection_mode);
    eprintln!("   Storage: {:?}\n", config.storage);

    let telegram = Arc::new(TelegramChannel::new(
        config.bot_token.clone(),
        config.allowed_users.clone(),
    ));
    telegram
        .health_check()
        .await
        .context("Telegram is unreachable or the bot token is invalid")?;

    let store: Option<Arc<dyn ObjectStore>> = match &config.storage {
        StorageConfig::Disabled => None,
        StorageConfig::Local(dir) => Some(Arc::new(LocalObjectStore::new(dir.clone()))),
        StorageConfig::Http(url) => Some(Arc::new(HttpObjectStore::new(
            url.clone(),
            COLLABORATOR_TIMEOUT,
        ))),
    };

    let detector: Arc<dyn Detector> = Arc::new(HttpDetector::new(
        config.detection_url.clone(),
        config.detection_mode.clone(),
        COLLABORATOR_TIMEOUT,
    ));

    let messenger: Arc<dyn Messenger> = telegram.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        messenger,
        detector,
        store,
        config.dispatcher.clone(),
    ));

    let state = WebhookState::new(
        Arc::clone(&dispatcher),
        Arc::clone(&telegram),
        config.webhook_secret.clone(),
    );
    let app = webhook_routes(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "HTTP server started");

    match config.webhook_url() {
        Some(url) => {
            telegram
                .set_webhook(&url, &config.webhook_secret)
                .await
                .context("Failed to register the Telegram webhook")?;
        }
        None => {
            telegram
                .delete_webhook()
                .await
                .context("Failed to clear the Telegram webhook")?;
            let mut events = telegram.start_polling();
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        let outcome = dispatcher.handle(event).await;
                        tracing::debug!(?outcome, "Polled event handled");
                    });
                }
            });
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("Shutting down");
    Ok(())
}

fn init_tracing(config: &BotConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
