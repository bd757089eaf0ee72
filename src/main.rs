//! Moloch Steward - governance operator for a token-weighted guild DAO
//!
//! Validates token escrow, sequences the proposal lifecycle against the guild
//! contract and rebuilds membership from the ledger's event log:
//! - Escrow: balance/allowance checks before every call that moves tokens
//! - Dispatch: one ledger call per action, receipts decoded
//! - Orchestration: submit-with-escrow and sponsor-with-allowance-check
//! - Reconciliation: paginated proposals and replayed membership

mod config;
mod error;
mod governance;
mod ledger;
mod models;
mod routes;
mod state;
mod types;

use crate::config::{DaoConfig, Settings};
use crate::error::AppError;
use crate::ledger::InMemoryLedger;
use crate::routes::{create_router, ENDPOINTS};
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Moloch Steward...");

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded (network: {})", settings.dao.network);

    let state = Arc::new(connect_ledger(&settings.dao)?);
    info!("⛓️  Guild at {}", state.ledger_address());
    match state.default_signer() {
        Some(signer) => info!("🔑 Default signer: {}", signer),
        None => warn!("⚠️  No default signer; every mutating request must send X-Steward-Signer"),
    }

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    for (section, endpoints) in ENDPOINTS {
        info!("   ─── {} ───", section);
        for (method, path, description) in *endpoints {
            info!("   {:<4} {:<44} - {}", method, path, description);
        }
        info!("");
    }

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,moloch_steward=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Build the application state on the ledger of the selected network.
///
/// Only `develop` has a transport: the guild is summoned in memory.
fn connect_ledger(dao: &DaoConfig) -> Result<AppState, AppError> {
    let address = dao.ledger_address()?;
    if dao.network != "develop" {
        return Err(AppError::Config(format!(
            "No ledger transport for network '{}' (guild {})",
            dao.network, address
        )));
    }

    let ledger = Arc::new(InMemoryLedger::new(address, dao.simulation.clone())?);
    info!(
        "🧪 Summoned in-memory guild for {} with deposit {} of {}",
        dao.simulation.summoner, dao.simulation.proposal_deposit, dao.simulation.deposit_token
    );
    Ok(AppState::new(dao.clone(), ledger.clone(), ledger))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("⚠️  Failed to listen for Ctrl+C: {}", e);
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
                warn!("⚠️  Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
