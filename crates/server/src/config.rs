//! Server configuration.
//!
//! Every setting is a CLI flag with an environment variable fallback, so a
//! container deployment configures the node entirely through its
//! environment.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use depot_types::{EngineConfig, SyncConfig, UploadLimits};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text (development).
    Text,
    /// JSON lines (production / log aggregation).
    Json,
    /// JSON when stdout is not a terminal, text otherwise.
    Auto,
}

/// Depot content server.
#[derive(Debug, Parser)]
#[command(name = "depot-server", version, about)]
pub struct Cli {
    /// Root folder of the storage driver.
    #[arg(long, env = "STORAGE_ROOT_FOLDER", default_value = "storage")]
    pub storage_root_folder: PathBuf,

    /// HTTP listen port.
    #[arg(long, env = "SERVER_PORT", default_value_t = 6969)]
    pub server_port: u16,

    /// Name this node announces to the cluster.
    #[arg(long, env = "SERVER_NAME", default_value = "content-node")]
    pub server_name: String,

    /// Synchronizer period in milliseconds.
    #[arg(long, env = "SYNC_WITH_SERVERS_INTERVAL", default_value_t = 5_000)]
    pub sync_with_servers_interval: u64,

    /// How far in the past a deployment timestamp may lie (ms).
    #[arg(long, env = "REQUEST_TTL_BACKWARDS", default_value_t = 600_000)]
    pub request_ttl_backwards: u64,

    /// How far in the future a deployment timestamp may lie (ms).
    #[arg(long, env = "REQUEST_TTL_FORWARDS", default_value_t = 300_000)]
    pub request_ttl_forwards: u64,

    /// Window after which ledger history becomes final (ms).
    #[arg(long, env = "IMMUTABLE_TIME_WINDOW", default_value_t = 600_000)]
    pub immutable_time_window: u64,

    /// Per-type upload caps, `type=MB` pairs separated by commas
    /// (e.g. `scene=15,profile=2,wearable=3`).
    #[arg(long, env = "MAX_UPLOAD_SIZE_PER_TYPE")]
    pub max_upload_size_per_type: Option<String>,

    /// Accept legacy-version entity migrations.
    #[arg(long, env = "ALLOW_LEGACY_ENTITIES", default_value_t = false)]
    pub allow_legacy_entities: bool,

    /// Timeout for peer HTTP calls (ms).
    #[arg(long, env = "CLIENT_TIMEOUT", default_value_t = 30_000)]
    pub client_timeout: u64,

    /// Base URLs of the other content servers. Stands in for the on-chain
    /// registry when `--dao-address` is not wired to a chain adapter.
    #[arg(long = "content-server", env = "CONTENT_SERVERS", value_delimiter = ',')]
    pub content_servers: Vec<String>,

    /// Address of the DAO peer registry contract.
    #[arg(long, env = "DAO_ADDRESS")]
    pub dao_address: Option<String>,

    /// Ethereum network the access-control adapters run against.
    #[arg(long, env = "ETH_NETWORK", default_value = "mainnet")]
    pub eth_network: String,

    /// Land/estate API backend for the access checker.
    #[arg(long, env = "DCL_API_URL")]
    pub dcl_api_url: Option<String>,

    /// ENS ownership backend for the access checker.
    #[arg(long, env = "ENS_OWNER_PROVIDER_URL")]
    pub ens_owner_provider_url: Option<String>,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "auto")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Derives the engine configuration from the flags.
    ///
    /// # Errors
    ///
    /// Returns a message when the upload-limit spec cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        let upload_limits = match &self.max_upload_size_per_type {
            Some(spec) => parse_upload_limits(spec)?,
            None => UploadLimits::default(),
        };
        let config = EngineConfig {
            server_name: self.server_name.clone(),
            request_ttl_backwards_ms: self.request_ttl_backwards,
            request_ttl_forwards_ms: self.request_ttl_forwards,
            immutable_window_ms: self.immutable_time_window,
            allow_legacy_entities: self.allow_legacy_entities,
            upload_limits,
            sync: SyncConfig {
                interval_ms: self.sync_with_servers_interval,
                client_timeout_ms: self.client_timeout,
            },
            ..EngineConfig::default()
        };
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

/// Parses `scene=15,profile=2,wearable=3`-style upload caps. Types left out
/// keep their defaults.
fn parse_upload_limits(spec: &str) -> Result<UploadLimits, String> {
    let mut limits = UploadLimits::default();
    for pair in spec.split(',').filter(|p| !p.trim().is_empty()) {
        let (entity_type, megabytes) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected type=MB, got {pair:?}"))?;
        let megabytes: u64 = megabytes
            .trim()
            .parse()
            .map_err(|e| format!("invalid megabyte value in {pair:?}: {e}"))?;
        match entity_type.trim().to_ascii_lowercase().as_str() {
            "scene" => limits.scene_mb = megabytes,
            "profile" => limits.profile_mb = megabytes,
            "wearable" => limits.wearable_mb = megabytes,
            other => return Err(format!("unknown entity type in upload limits: {other:?}")),
        }
    }
    Ok(limits)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_yield_valid_engine_config() {
        let cli = Cli::parse_from(["depot-server"]);
        let config = cli.engine_config().expect("valid config");
        assert_eq!(config.server_name, "content-node");
        assert_eq!(config.sync.interval_ms, 5_000);
        assert_eq!(config.upload_limits, UploadLimits::default());
    }

    #[test]
    fn parses_upload_limit_spec() {
        let limits = parse_upload_limits("scene=20, profile=1").unwrap();
        assert_eq!(limits.scene_mb, 20);
        assert_eq!(limits.profile_mb, 1);
        assert_eq!(limits.wearable_mb, UploadLimits::default().wearable_mb);
    }

    #[test]
    fn rejects_malformed_upload_limit_spec() {
        assert!(parse_upload_limits("scene:20").is_err());
        assert!(parse_upload_limits("castle=5").is_err());
        assert!(parse_upload_limits("scene=lots").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "depot-server",
            "--server-name",
            "node-7",
            "--sync-with-servers-interval",
            "1000",
            "--allow-legacy-entities",
            "--content-server",
            "http://a:6969,http://b:6969",
        ]);
        assert_eq!(cli.content_servers, vec!["http://a:6969", "http://b:6969"]);
        let config = cli.engine_config().unwrap();
        assert_eq!(config.server_name, "node-7");
        assert_eq!(config.sync.interval_ms, 1_000);
        assert!(config.allow_legacy_entities);
    }
}
