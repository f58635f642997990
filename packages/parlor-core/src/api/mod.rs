//! HTTP/SSE API layer.
//!
//! Thin handlers that delegate to the routing services; router construction
//! and server startup live here.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::Config;
use crate::registry::DeviceRegistry;
use crate::services::{AudioRouter, VolumeRouter};
use crate::state::StateBroadcaster;
use crate::webos::{TvPower, WebosLink};

pub mod http;

/// Port used when the configuration does not pin one.
const DEFAULT_PORT: u16 = 3000;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper over the services; all business logic lives in them.
#[derive(Clone)]
pub struct AppState {
    /// The audio output router.
    pub audio: Arc<AudioRouter>,
    /// Sink-aware volume routing.
    pub volume: Arc<VolumeRouter>,
    /// Television wake/power-off lifecycle.
    pub power: Arc<TvPower>,
    /// The television control link (for connection status).
    pub link: Arc<WebosLink>,
    /// Last-known AV state and its subscribers.
    pub state: Arc<StateBroadcaster>,
    /// Device endpoint book.
    pub registry: Arc<DeviceRegistry>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let preferred = state.config.read().preferred_port;
    let port = if preferred == 0 { DEFAULT_PORT } else { preferred };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Server listening on http://0.0.0.0:{port}");
    let app = http::create_router(state);
    axum::serve(listener, app).await?;
    Ok(())
}
