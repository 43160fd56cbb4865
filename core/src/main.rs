/// Chatsync - opens one conversation and serves it over the messenger API
use chatsync_core::feed::LocalFeed;
use chatsync_core::gate::StaticGate;
use chatsync_core::message_store::SledStore;
use chatsync_core::messenger_api::start_messenger_api;
use chatsync_core::{Backend, Config, ConversationView};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    std::fs::create_dir_all(&config.data_dir)?;
    let feed = LocalFeed::new();
    let store = SledStore::open(&config.data_dir)
        .map_err(|e| anyhow::anyhow!("Store error: {}", e))?
        .with_feed(feed.clone());

    let backend = Backend {
        store: Arc::new(store),
        feed: Arc::new(feed),
        gate: Arc::new(StaticGate::unlocked()),
    };

    info!("🚀 Starting chatsync");
    info!("   Quote request: {}", config.conversation.quote_request_id);
    info!("   Data dir: {}", config.data_dir.display());

    let view = Arc::new(
        ConversationView::open(&backend, &config.conversation, config.participant(), &config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open conversation: {}", e))?,
    );

    tokio::select! {
        result = start_messenger_api(view.clone(), config.api_addr) => {
            if let Err(e) = result {
                error!("Messenger API stopped: {}", e);
            }
        }
        _ = wait_for_shutdown() => {}
    }

    view.close();
    info!("Chatsync stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Ctrl+C received"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("SIGTERM received");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
