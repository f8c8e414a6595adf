//! Toolify server library.
//!
//! Provides a reusable serve function for the binary and for tests.

#![deny(missing_docs)]

mod health;
mod logger;

use std::net::SocketAddr;

use axum::{Router, routing::get};
use config::{Config, ConfigWatcher};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use logger::init as init_logger;

/// Configuration for serving Toolify.
pub struct ServeConfig {
    /// The socket address the server binds to.
    pub listen_address: SocketAddr,
    /// The deserialized TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Version string logged on startup.
    pub version: String,
    /// Optional sender for the bound address (useful when port 0 was
    /// requested).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Start and run the proxy with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    log::info!("Toolify {version}");

    let watcher = ConfigWatcher::new(config);

    let app = Router::new()
        .route("/health", get(health::health))
        .merge(llm::router(watcher))
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(listen_address).await?;
    let bound_addr = listener.local_addr()?;

    if let Some(sender) = bound_addr_sender {
        let _ = sender.send(bound_addr);
    }

    log::info!("Listening on {bound_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    log::info!("Shutdown complete");
    Ok(())
}
