use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use admission_gateway::config::{Args, StoreKind};
use admission_gateway::routes::router;
use admission_gateway::state::AppState;
use admission_gateway::store::{CounterStore, MemoryCounterStore, RedisCounterStore, WINDOW};
use admission_gateway::AdmissionEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let admission = args.admission_config();
    let api_key_header = args.api_key_header_name()?;

    if admission.freeze_secs <= WINDOW.as_secs() {
        warn!(
            freeze_secs = admission.freeze_secs,
            "Freeze duration does not exceed the window; frozen keys will not be detected"
        );
    }

    let store: Arc<dyn CounterStore> = match args.store {
        // no fail-open mode: an unreachable store stops startup
        StoreKind::Redis => Arc::new(
            RedisCounterStore::connect(args.store_config())
                .await
                .context("failed to connect to the counter store")?,
        ),
        StoreKind::Memory => {
            warn!("Using the in-process counter store; budgets are not shared with other instances");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let engine = AdmissionEngine::new(store, admission);
    let budgets = *engine.config();
    let state = Arc::new(
        AppState::new(engine, api_key_header).with_trusted_proxy_headers(args.trust_proxy_headers),
    );

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!("Gateway running on http://localhost:{}", args.port);
    info!(
        "Budgets: {} requests/s per IP, {} requests/s per API key, freeze {}s",
        budgets.max_requests_ip, budgets.max_requests_api_key, budgets.freeze_secs
    );
    info!("API key header: {}", args.api_key_header);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Gateway stopped");
    Ok(())
}

// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
