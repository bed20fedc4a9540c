//! DEX settlement node
//!
//! Loads the exchange configuration, seeds fee tiers and pools, and serves
//! quotes and cross-chain operation status over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use dex_settlement::api::{self, AppState};
use dex_settlement::config::Settings;
use dex_settlement::engine::Engine;
use dex_settlement::metrics::{self, MetricsServer};
use dex_settlement::state::{MemoryOperationStore, OperationStore, PgOperationStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting DEX settlement node v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        "Loaded configuration for chain {} with {} destinations",
        settings.engine.chain_id,
        settings.destinations.len()
    );

    let store: Arc<dyn OperationStore> = match &settings.database {
        Some(database) => {
            let store = PgOperationStore::new(database)
                .await
                .context("Failed to connect to database")?;
            store.run_migrations().await?;
            info!("Database connection established");
            Arc::new(store)
        }
        None => {
            warn!("No database configured, cross-chain operations are kept in memory");
            Arc::new(MemoryOperationStore::new())
        }
    };

    let engine = Engine::from_settings(&settings, store.clone())?;

    let metrics_server = if settings.metrics.enabled {
        Some(MetricsServer::new(settings.metrics.port))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            router: engine.router.clone(),
            coordinator: engine.coordinator.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = metrics_server.map(|server| {
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Periodic operation report
    let report_handle = tokio::spawn({
        let store = store.clone();
        let interval = settings.engine.report_interval_secs.max(1);
        async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;

                if let Err(e) = store.health_check().await {
                    warn!("Operation store health check failed: {}", e);
                    continue;
                }
                match store.stats().await {
                    Ok(stats) => {
                        metrics::record_pending_operations(stats.pending);
                        if stats.failed > 0 {
                            info!(
                                "{} cross-chain operations await recovery",
                                stats.failed
                            );
                        }
                    }
                    Err(e) => warn!("Failed to read operation stats: {}", e),
                }
            }
        }
    });

    info!("DEX settlement node is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    if engine.router.is_paused() {
        warn!("Router was paused at shutdown");
    }

    api_handle.abort();
    report_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("DEX settlement node stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,dex_settlement=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
