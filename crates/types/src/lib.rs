//! Core domain types for the Depot content server.
//!
//! This crate defines the vocabulary shared by every other crate in the
//! workspace:
//! - [`entity`]: the immutable, content-addressed entity descriptor
//! - [`hash`]: CIDv1 content addressing over SHA-256
//! - [`audit`]: per-deployment audit records and auth chains
//! - [`events`]: deployment history events and failure records
//! - [`config`]: engine configuration with validated defaults

pub mod audit;
pub mod config;
pub mod entity;
pub mod events;
pub mod hash;

pub use audit::{AuditInfo, AuthChain, AuthLink, AuthLinkKind, CURRENT_PROTOCOL_VERSION};
pub use config::{ConfigError, EngineConfig, SyncConfig, UploadLimits};
pub use entity::{ContentMapping, Entity, EntityError, EntityType};
pub use events::{
    DeploymentEvent, FailedDeployment, FailureReason, PartialDeploymentHistory, ServerStatus,
};
pub use hash::{content_cid, is_valid_cid};

/// Milliseconds since the Unix epoch, as supplied by clients and peers.
pub type Timestamp = u64;

/// Content hash string in CIDv1 text form (`b...`).
pub type HashId = String;

/// Entity identifier: the CIDv1 of the canonical entity descriptor file.
pub type EntityId = String;

/// Logical name a node announces to its peers (e.g. `content-node-1`).
pub type ServerName = String;

/// A mutable name (e.g. a land coordinate) resolving to at most one entity.
pub type Pointer = String;

/// Ethereum address in `0x...` hex form, lower-cased for comparisons.
pub type EthAddress = String;
