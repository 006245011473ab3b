//! Deployment, pointer-commit, and synchronization engine for the Depot
//! content server.
//!
//! The engine is layered leaves-first:
//! - [`validation`]: pure predicates over a prospective deployment
//! - [`pointers`]: the active-entity-per-pointer map and commit algorithm
//! - [`history`]: the append-only deployment ledger and its watermark
//! - [`failed`]: the failed-deployment registry
//! - [`service`]: the deploy orchestrator and content-service trait
//! - [`blacklist`]: the subtractive read/write overlay
//! - [`cluster`]: DAO registry, active and redirect peer clients
//! - [`synchronizer`]: the periodic history-pull loop
//!
//! Everything is wired explicitly: constructors take their collaborators,
//! there is no module-level state.

pub mod blacklist;
pub mod cache;
pub mod cluster;
pub mod deployment;
pub mod error;
pub mod external;
pub mod failed;
pub mod history;
pub mod pointers;
pub mod service;
pub mod synchronizer;
pub mod time;
pub mod validation;

pub use blacklist::{Blacklist, BlacklistTarget, BlacklistedService};
pub use cluster::{
    ClusterClient, ClusterError, DaoClient, HardcodedDaoClient, HttpServerApi, PeerClient,
    ServerApi,
};
pub use deployment::{DeploymentFile, DeploymentOrigin, ENTITY_FILE_NAME};
pub use error::{Result, ServiceError};
pub use external::{
    AccessChecker, AnalyticsSink, SignatureValidator, StandardAccessChecker,
    StructuralSignatureValidator, TracingAnalytics,
};
pub use failed::FailedDeploymentsManager;
pub use history::HistoryManager;
pub use pointers::{CommitResult, PointerManager};
pub use service::{
    AuditResult, ContentAvailability, ContentService, DeploymentService, CONTENTS_CATEGORY,
    PROOFS_CATEGORY,
};
pub use synchronizer::Synchronizer;
