//! ICAP-facing service binary.
//!
//! Wires the REQMOD/RESPMOD/DLP core to the hook contract, loads
//! `CoreConfig` from `POLIS_CORE_*` env vars, builds the mTLS state-store
//! connection, and serves a `/health` endpoint alongside the stub ICAP
//! transport. Fatal startup errors abort before any traffic is served.

mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use polis_core::hooks::IcapCoreHandler;
use polis_core::{CoreConfig, ManagedConnection, StateStore};

/// Process-level configuration loaded via `envy::prefixed("POLIS_CORE_")`,
/// layered on top of [`CoreConfig`]'s own `POLIS_CORE_*` fields.
#[derive(Debug, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    #[serde(default = "default_health_addr")]
    health_addr: String,
    #[serde(default = "default_valkey_url")]
    valkey_url: String,
    valkey_user: String,
    valkey_pass_file: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:1344".to_string()
}

fn default_health_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_valkey_url() -> String {
    "redis://valkey:6379".to_string()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("polis icap-server starting");

    let server_config: ServerConfig = envy::prefixed("POLIS_CORE_")
        .from_env()
        .context("failed to load server config from POLIS_CORE_* env vars")?;
    let core_config: CoreConfig = envy::prefixed("POLIS_CORE_")
        .from_env()
        .context("failed to load CoreConfig from POLIS_CORE_* env vars")?;

    let store = ManagedConnection::connect(
        &server_config.valkey_url,
        &server_config.valkey_user,
        server_config.valkey_pass_file.clone(),
    )
    .await
    .context("failed to initialise state store connection")?;

    // Leaked to obtain a `'static` borrow for the long-lived handler —
    // the process owns exactly one store for its whole lifetime, and the
    // connection itself serializes concurrent access and reconnects lazily.
    let store: &'static dyn StateStore = Box::leak(Box::new(store));
    let handler = Arc::new(IcapCoreHandler::new(store, &core_config));

    let listener = tokio::net::TcpListener::bind(&server_config.listen_addr)
        .await
        .context("failed to bind ICAP listener")?;
    tracing::info!(addr = %server_config.listen_addr, "icap stub transport listening");

    let icap_task = tokio::spawn(transport::serve(listener, handler));

    let health_router = axum::Router::new().route("/health", axum::routing::get(health));
    let health_listener = tokio::net::TcpListener::bind(&server_config.health_addr)
        .await
        .context("failed to bind health listener")?;
    tracing::info!(addr = %server_config.health_addr, "health endpoint listening");

    tokio::select! {
        result = icap_task => {
            result.context("icap transport task panicked")??;
        }
        result = axum::serve(health_listener, health_router).with_graceful_shutdown(shutdown_signal()) => {
            result.context("health server error")?;
        }
    }

    tracing::info!("polis icap-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    #[allow(clippy::expect_used)]
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl-C handler");
    tracing::info!("received shutdown signal");
}
