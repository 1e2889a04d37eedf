mod audit;
mod backend;
mod cache;
mod catalog;
mod config;
mod dispatcher;
mod error;
mod interceptor;
mod metrics;
mod rpc;
mod selector;
mod server;
mod telemetry;
mod tracker;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::audit::LogAuditor;
use crate::cache::RedisCache;
use crate::catalog::BackendCatalog;
use crate::config::Settings;
use crate::dispatcher::EthDispatcher;
use crate::error::ProxyError;
use crate::selector::{BackendSelector, EthSyncProbe};
use crate::server::AppState;
use crate::tracker::FinalizationTracker;

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "chainproxy",
    about = "Caching, health-aware reverse proxy for Ethereum JSON-RPC endpoints"
)]
struct Cli {
    /// Path to the TOML config file (default: ~/.chainproxy/chainproxy.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    telemetry::init_tracing(&settings)?;
    metrics::init_metrics()?;

    if settings.use_tls {
        return Err(ProxyError::TlsUnsupported.into());
    }

    // The catalog is read once; the connection is not needed afterwards.
    let backends = {
        let catalog = BackendCatalog::open(&settings.db_url)?;
        catalog.migrate()?;
        catalog.backends()?
    };
    if backends.is_empty() {
        return Err(ProxyError::EmptyCatalog.into());
    }
    info!(count = backends.len(), "loaded backend catalog");
    if backends.iter().any(|b| b.kind == backend::BackendKind::Bitcoin) {
        info!(
            btc_path = %settings.btc_url,
            "bitcoin backends configured; healthchecked but not routed"
        );
    }

    let cacher = Arc::new(RedisCache::connect(&settings.redis).await?);
    let auditor = Arc::new(LogAuditor::open(&settings.log_auditor.log_file)?);

    let selector = Arc::new(BackendSelector::new(
        backends,
        Arc::new(EthSyncProbe::new()),
    )?);
    let tracker = Arc::new(FinalizationTracker::new(Arc::clone(&selector)));
    let dispatcher = Arc::new(EthDispatcher::new(cacher, auditor, Arc::clone(&tracker)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&selector).run(shutdown_rx.clone()));
    tokio::spawn(Arc::clone(&tracker).run(shutdown_rx.clone()));

    let state = AppState {
        selector,
        dispatcher,
    };
    let app = server::build_router(state, &settings.eth_url);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.rpc_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, eth_path = %settings.eth_url, "chainproxy listening");

    let graceful = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            shutdown_signal().await;
            info!("interrupted, shutting down");
            let _ = shutdown_tx.send(true);
        }
    };

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful);

    let mut drain = shutdown_rx.clone();
    tokio::select! {
        res = async { serve.await } => res?,
        _ = async {
            let _ = drain.changed().await;
            tokio::time::sleep(SHUTDOWN_DRAIN).await;
        } => {
            warn!("drain deadline exceeded, exiting");
        }
    }

    info!("goodbye");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
