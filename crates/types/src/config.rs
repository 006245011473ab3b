//! Engine configuration with validated defaults.
//!
//! Every knob here can be set from the environment or a config file by the
//! server crate; the structs carry serde defaults so a partial configuration
//! deserializes into a complete one.

use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};

use crate::entity::EntityType;

/// Configuration validation failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A value is outside its accepted range.
    #[snafu(display("Invalid configuration: {message}"))]
    Validation {
        /// What was wrong.
        message: String,
    },
}

/// Per-entity-type upload caps, in megabytes per pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    /// Cap for scenes.
    #[serde(default = "default_scene_mb")]
    pub scene_mb: u64,
    /// Cap for profiles.
    #[serde(default = "default_profile_mb")]
    pub profile_mb: u64,
    /// Cap for wearables.
    #[serde(default = "default_wearable_mb")]
    pub wearable_mb: u64,
}

fn default_scene_mb() -> u64 {
    15
}

fn default_profile_mb() -> u64 {
    2
}

fn default_wearable_mb() -> u64 {
    3
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            scene_mb: default_scene_mb(),
            profile_mb: default_profile_mb(),
            wearable_mb: default_wearable_mb(),
        }
    }
}

impl UploadLimits {
    /// Returns the per-pointer cap in megabytes for an entity type.
    pub const fn for_type(&self, entity_type: EntityType) -> u64 {
        match entity_type {
            EntityType::Scene => self.scene_mb,
            EntityType::Profile => self.profile_mb,
            EntityType::Wearable => self.wearable_mb,
        }
    }
}

/// Cluster synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period between synchronizer ticks, in milliseconds.
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,
    /// Timeout applied to every peer HTTP call, in milliseconds.
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

fn default_sync_interval_ms() -> u64 {
    5_000
}

fn default_client_timeout_ms() -> u64 {
    30_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

/// Configuration for the deployment engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Name this node announces in history events and `/status`.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// How far in the past a deployment timestamp may lie, in milliseconds.
    #[serde(default = "default_ttl_backwards_ms")]
    pub request_ttl_backwards_ms: u64,
    /// How far in the future a deployment timestamp may lie, in milliseconds.
    #[serde(default = "default_ttl_forwards_ms")]
    pub request_ttl_forwards_ms: u64,
    /// Window after which history below the watermark becomes final, in
    /// milliseconds.
    #[serde(default = "default_immutable_window_ms")]
    pub immutable_window_ms: u64,
    /// Whether legacy-version migrations are accepted.
    #[serde(default)]
    pub allow_legacy_entities: bool,
    /// Per-type upload caps.
    #[serde(default)]
    pub upload_limits: UploadLimits,
    /// Maximum entries held by the in-memory entity cache.
    #[serde(default = "default_entity_cache_size")]
    pub entity_cache_size: usize,
    /// Synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_server_name() -> String {
    "content-node".to_string()
}

fn default_ttl_backwards_ms() -> u64 {
    10 * 60 * 1_000
}

fn default_ttl_forwards_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_immutable_window_ms() -> u64 {
    10 * 60 * 1_000
}

fn default_entity_cache_size() -> usize {
    2_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            request_ttl_backwards_ms: default_ttl_backwards_ms(),
            request_ttl_forwards_ms: default_ttl_forwards_ms(),
            immutable_window_ms: default_immutable_window_ms(),
            allow_legacy_entities: false,
            upload_limits: UploadLimits::default(),
            entity_cache_size: default_entity_cache_size(),
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the server name is empty, any
    /// upload cap is zero, the cache size is zero, or the sync interval is
    /// zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.server_name.is_empty(),
            ValidationSnafu { message: "server_name must not be empty".to_string() }
        );
        for entity_type in EntityType::ALL {
            ensure!(
                self.upload_limits.for_type(*entity_type) > 0,
                ValidationSnafu {
                    message: format!("upload limit for {entity_type} must be positive"),
                }
            );
        }
        ensure!(
            self.entity_cache_size > 0,
            ValidationSnafu { message: "entity_cache_size must be at least 1".to_string() }
        );
        ensure!(
            self.sync.interval_ms > 0,
            ValidationSnafu { message: "sync.interval_ms must be positive".to_string() }
        );
        Ok(())
    }
}
