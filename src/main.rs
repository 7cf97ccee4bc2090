use anyhow::Context;
use market_data_cache::{
    api, Config, CoinGeckoClient, InMemoryStore, MarketDataService, PersistentStore,
    PrewarmScheduler, SqliteStore, SystemClock,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();
    tracing::info!(
        api_base_url = %config.api_base_url,
        bind_addr = %config.bind_addr,
        prewarm = config.prewarm_enabled,
        "Starting market data cache"
    );

    let provider = Arc::new(
        CoinGeckoClient::new(&config.api_base_url, config.request_timeout)
            .context("failed to build provider client")?,
    );

    let store: Arc<dyn PersistentStore> = match &config.database_path {
        Some(path) => Arc::new(
            SqliteStore::open(path)
                .with_context(|| format!("failed to open persistent cache at {path}"))?,
        ),
        None => {
            tracing::warn!("MARKET_DATA_DB_PATH not set, persistent cache is in-memory only");
            Arc::new(InMemoryStore::new())
        }
    };

    let service = Arc::new(MarketDataService::new(
        provider,
        store,
        Arc::new(SystemClock),
    ));

    let cancel = CancellationToken::new();
    let prewarm = config.prewarm_enabled.then(|| {
        PrewarmScheduler::new(service.clone(), config.prewarm.clone()).spawn(cancel.clone())
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, api::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cancel.cancel();
    if let Some(handle) = prewarm {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Prewarm task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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

    tracing::info!("Shutdown signal received");
}
