//! Depot content server binary.
//!
//! Launches a content node: HTTP surface, deployment engine, and the
//! cluster synchronizer.
//!
//! # Usage
//!
//! ```bash
//! # Standalone node with local storage
//! depot-server --storage-root-folder /var/lib/depot --server-port 6969
//!
//! # Clustered node, configured through the environment
//! SERVER_NAME=content-node-1 \
//! CONTENT_SERVERS=http://node-2:6969,http://node-3:6969 \
//! depot-server
//! ```

mod api;
mod bootstrap;
mod config;
mod shutdown;

use std::io::IsTerminal;
use std::net::SocketAddr;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    tracing::info!(
        server_name = %cli.server_name,
        port = cli.server_port,
        storage = %cli.storage_root_folder.display(),
        peers = cli.content_servers.len(),
        "starting depot content server"
    );

    let node = bootstrap::bootstrap(&cli).await?;

    // The synchronizer catches up with the cluster in the background while
    // the HTTP surface comes up.
    let token = CancellationToken::new();
    let sync_token = token.clone();
    let synchronizer = node.synchronizer;
    let sync_handle = tokio::spawn(async move { synchronizer.run(sync_token).await });

    let state = api::AppState { service: node.service };
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.server_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    token.cancel();
    let _ = sync_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Initializes logging from `RUST_LOG` and the configured format.
fn init_logging(cli: &Cli) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = match cli.log_format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}
