//! Deployment request types.

use depot_types::{ServerName, Timestamp};

/// One uploaded file in a deployment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentFile {
    /// Logical file name as submitted (e.g. `entity.json`).
    pub name: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
}

impl DeploymentFile {
    /// Builds a file from a name and its bytes.
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self { name: name.into(), content }
    }
}

/// Name of the descriptor file every deployment must contain exactly once.
pub const ENTITY_FILE_NAME: &str = "entity.json";

/// Where a deployment came from, which decides freshness checking and the
/// deployment timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOrigin {
    /// Submitted by a client to this node. Freshness is enforced, validation
    /// failures abort, and the node assigns the deployment timestamp.
    Local {
        /// When true, a previously failed deployment of the same entity is
        /// being re-submitted; its failure record is cleared on success.
        fix: bool,
    },
    /// Replayed from a peer's history. Freshness is skipped, validation
    /// failures are logged but do not abort, and the peer's deployment
    /// timestamp is preserved verbatim.
    Synced {
        /// The node the deployment originated on.
        server_name: ServerName,
        /// The originating deployment timestamp.
        timestamp: Timestamp,
    },
}

impl DeploymentOrigin {
    /// True for locally submitted deployments.
    pub fn is_local(&self) -> bool {
        matches!(self, DeploymentOrigin::Local { .. })
    }
}
