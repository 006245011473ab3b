//! Audit records proving who deployed an entity and when.
//!
//! Every accepted deployment persists an [`AuditInfo`] under
//! `proofs/<entityId>`. The auth chain is an ordered list of Ethereum-signed
//! statements rooted at a signer address; the cryptographic verification of
//! each link is delegated to the signature validator at the service seam,
//! this module only models the structure.

use serde::{Deserialize, Serialize};

use crate::{EthAddress, Timestamp};

/// Protocol version stamped on locally created deployments.
pub const CURRENT_PROTOCOL_VERSION: &str = "v3";

/// The role of a single link in an auth chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthLinkKind {
    /// The root link carrying the owner address; always first.
    Signer,
    /// A delegation to an ephemeral key.
    EcdsaEphemeral,
    /// The final signature over the entity id.
    EcdsaSignedEntity,
}

/// One signed statement in an auth chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLink {
    /// Link role.
    #[serde(rename = "type")]
    pub kind: AuthLinkKind,
    /// The signed payload; for the root link this is the owner address.
    pub payload: String,
    /// Hex signature, empty for the root link.
    #[serde(default)]
    pub signature: String,
}

/// Ordered chain of signed statements proving authority over an entity id.
pub type AuthChain = Vec<AuthLink>;

/// Returns the owner address a chain is rooted at, if the chain is
/// structurally sound (non-empty, signer first).
pub fn owner_address(chain: &AuthChain) -> Option<EthAddress> {
    match chain.first() {
        Some(link) if link.kind == AuthLinkKind::Signer => {
            Some(link.payload.to_ascii_lowercase())
        },
        _ => None,
    }
}

/// Builds the minimal two-link chain used by simple (non-delegated) signers.
pub fn simple_chain(address: &str, entity_id: &str, signature: &str) -> AuthChain {
    vec![
        AuthLink {
            kind: AuthLinkKind::Signer,
            payload: address.to_string(),
            signature: String::new(),
        },
        AuthLink {
            kind: AuthLinkKind::EcdsaSignedEntity,
            payload: entity_id.to_string(),
            signature: signature.to_string(),
        },
    ]
}

/// Per-deployment audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditInfo {
    /// When this node applied the deployment. Server-assigned for local
    /// deploys, preserved verbatim for synced ones.
    pub deployed_timestamp: Timestamp,
    /// Signature chain over the entity id.
    pub auth_chain: AuthChain,
    /// Protocol version the deployment was created under.
    pub version: String,
    /// Present only on entities migrated from a legacy protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_data: Option<serde_json::Value>,
}

impl AuditInfo {
    /// Audit record for a locally created deployment at `deployed_timestamp`.
    pub fn new(deployed_timestamp: Timestamp, auth_chain: AuthChain) -> Self {
        Self {
            deployed_timestamp,
            auth_chain,
            version: CURRENT_PROTOCOL_VERSION.to_string(),
            migration_data: None,
        }
    }

    /// True when this deployment came from a legacy-version migration.
    pub fn is_legacy(&self) -> bool {
        self.migration_data.is_some()
    }

    /// The `original_version` recorded by the migration, if any.
    pub fn original_version(&self) -> Option<&str> {
        self.migration_data
            .as_ref()
            .and_then(|d| d.get("originalVersion"))
            .and_then(|v| v.as_str())
    }
}
