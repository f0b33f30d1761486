//! # parley-server
//!
//! Backend for Parley, a two-person direct-message chat.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, conversations and image upload
//! - **Presence relay** over WebSocket: every connect and disconnect pushes
//!   the full online set to all open sockets
//! - **Live delivery** of stored messages to the receiver's current socket
//! - **SQLite persistence** through `parley-store`

mod api;
mod auth;
mod config;
mod error;
mod images;
mod messages;
mod relay;
mod ws;

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::auth::TokenIssuer;
use crate::config::{IdentityMode, ServerConfig};
use crate::images::ImageStore;
use crate::relay::handshake::{ConnectIdentifier, QueryIdentifier, TokenIdentifier};
use crate::relay::{Relay, SupersedePolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");

    let images = Arc::new(
        ImageStore::new(config.image_storage_path.clone(), config.max_image_size).await?,
    );

    let tokens =
        TokenIssuer::from_secret_or_random(config.jwt_secret.as_deref(), config.token_ttl_days);

    let identifier: Arc<dyn ConnectIdentifier> = match config.identity_mode {
        IdentityMode::Query => Arc::new(QueryIdentifier),
        IdentityMode::Token => Arc::new(TokenIdentifier::new(tokens.clone())),
    };

    let relay = Relay::new(SupersedePolicy::from_flag(config.close_superseded));
    info!(
        identity = ?config.identity_mode,
        close_superseded = config.close_superseded,
        "Relay initialized"
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        relay,
        tokens,
        images,
        identifier,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
