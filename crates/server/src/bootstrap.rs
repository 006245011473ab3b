//! Node bootstrap: wires storage, the engine, the blacklist overlay, and
//! the synchronizer from configuration.

use std::sync::Arc;
use std::time::Duration;

use snafu::Snafu;

use depot_core::cluster::{ClusterClient, HardcodedDaoClient, HttpServerApi, ServerApi};
use depot_core::{
    Blacklist, BlacklistedService, ContentService, DeploymentService, HistoryManager,
    StandardAccessChecker, StructuralSignatureValidator, Synchronizer, TracingAnalytics,
};
use depot_storage::{ContentStorage, FileSystemStorage};

use crate::config::Cli;

/// Bootstrap failure.
#[derive(Debug, Snafu)]
pub enum BootstrapError {
    /// Configuration is invalid.
    #[snafu(display("Invalid configuration: {message}"))]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Storage, ledger, or engine construction failed.
    #[snafu(display("Failed to build the engine: {message}"))]
    Engine {
        /// What failed.
        message: String,
    },
}

/// A fully wired node, ready to serve.
pub struct Node {
    /// The blacklist-wrapped service behind the HTTP surface.
    pub service: Arc<dyn ContentService>,
    /// The cluster sync loop, to be spawned by the caller.
    pub synchronizer: Synchronizer,
}

/// Builds a node from configuration.
///
/// # Errors
///
/// Returns [`BootstrapError`] when the configuration is invalid or the
/// storage root / history ledger cannot be opened.
pub async fn bootstrap(cli: &Cli) -> Result<Node, BootstrapError> {
    let config = cli.engine_config().map_err(|message| BootstrapError::Config { message })?;

    let storage = FileSystemStorage::open(cli.storage_root_folder.clone())
        .map_err(|e| BootstrapError::Engine { message: e.to_string() })?;
    let storage_root = storage.root().to_path_buf();
    let storage: Arc<dyn ContentStorage> = Arc::new(storage);

    let history = HistoryManager::open(&storage_root, config.immutable_window_ms)
        .map_err(|e| BootstrapError::Engine { message: e.to_string() })?;

    let sync_interval = Duration::from_millis(config.sync.interval_ms);
    let client_timeout = Duration::from_millis(config.sync.client_timeout_ms);
    let server_name = config.server_name.clone();

    let engine = Arc::new(
        DeploymentService::new(
            config,
            storage,
            history,
            Arc::new(StructuralSignatureValidator),
            Arc::new(StandardAccessChecker::new()),
            Arc::new(TracingAnalytics),
        )
        .await
        .map_err(|e| BootstrapError::Engine { message: e.to_string() })?,
    );

    if let Some(dao_address) = &cli.dao_address {
        tracing::info!(
            dao = %dao_address,
            network = %cli.eth_network,
            "DAO registry configured; membership taken from --content-server until a chain \
             adapter is attached"
        );
    }
    let dao = Arc::new(HardcodedDaoClient::new(cli.content_servers.clone()));
    let api = HttpServerApi::new(client_timeout)
        .map_err(|e| BootstrapError::Engine { message: e.to_string() })?;
    let cluster =
        Arc::new(ClusterClient::new(dao, Arc::new(api) as Arc<dyn ServerApi>, server_name));
    let synchronizer = Synchronizer::new(engine.clone(), cluster, sync_interval);

    let service: Arc<dyn ContentService> =
        Arc::new(BlacklistedService::new(engine, Blacklist::new()));
    Ok(Node { service, synchronizer })
}
