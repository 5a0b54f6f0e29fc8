use anyhow::Context;
use std::net::SocketAddr;
use std::str::FromStr;
use tokio::net::TcpListener;
use tracing::info;

use crate::interfaces::HostError;
use crate::server::api::create_router;
use crate::HostState;

pub mod api;
pub mod auth;

/// Starts the dispatch server.
pub async fn serve(state: HostState) -> anyhow::Result<()> {
    let addr = SocketAddr::from_str(&state.opts.address)
        .map_err(|_| HostError::Config(format!("invalid bind address: {}", state.opts.address)))?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on: {}", listener.local_addr()?);

    crate::sweeper::spawn_sweeps(state.clone());

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server couldn't serve")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received, draining connections");
    }
}
