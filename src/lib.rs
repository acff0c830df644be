// ============================================================================
// crosslink-server
// ============================================================================
//
// Cross-site identity synchronization: a master installation propagates
// authentication events and account-lifecycle mutations to any number
// of federated slave installations.
//
// - keys:      keyed (HMAC) authentication, global and subject-scoped
// - store:     slave registry + pending-delivery retry queue
// - dispatch:  the single HTTP endpoint and its action map
// - handlers:  registration, account mutations, the login/logout chain
// - chain:     browser-mediated redirect walk construction
// - propagate: server-to-server fan-out of completed mutations
// - retry:     background delivery of the queued failures
// - audit:     append-only security event log
//
// ============================================================================

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;

pub mod audit;
pub mod chain;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod member;
pub mod propagate;
pub mod request;
pub mod retry;
pub mod session;
pub mod store;
pub mod utils;
pub mod wire;

#[cfg(test)]
mod test_support;

use context::AppContext;

/// Serve the sync endpoint on an already-bound listener until ctrl-c.
pub async fn run_server(ctx: Arc<AppContext>, listener: TcpListener) -> Result<()> {
    let app = dispatch::create_router(ctx);

    let addr = listener.local_addr().context("listener has no address")?;
    tracing::info!(addr = %addr, "Sync endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to install ctrl-c handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
