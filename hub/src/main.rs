mod auth;
mod bot_config;
mod config;
mod error;
mod reclaim;
mod routes;
mod session;
mod state;
mod subprocess;
mod tenants;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::HubConfig;
use state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    // Initialise tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = HubConfig::from_env();
    let bind = cfg.bind.clone();
    let port = cfg.port;

    let state = AppState::new(cfg);

    if state.config.clear_data_on_startup {
        if let Err(e) = state.sessions.clear_all().await {
            tracing::error!("clearing tenant data failed: {e}");
            std::process::exit(1);
        }
    } else {
        match state.sessions.init().await {
            Ok(reclaimed) if reclaimed > 0 => {
                tracing::info!("reclaimed {reclaimed} tenant directories from a previous run")
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("cannot prepare {}: {e}", state.sessions.root().display());
                std::process::exit(1);
            }
        }
    }

    // Start background reclamation sweeps.
    reclaim::spawn_reclamation(Arc::clone(&state));

    let app = routes::app(Arc::clone(&state));

    let addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("invalid bind address {bind}:{port}: {e}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("cannot bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("Botdeck hub listening on http://{addr}");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("server error: {e}");
    }

    // Leave no worker processes behind.
    for id in state.tenants.tenant_ids() {
        if let Some(sup) = state.tenants.remove(&id) {
            sup.stop_all();
        }
    }
    // Watchers deliver the termination signals.
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, gracefully stopping…");
}
