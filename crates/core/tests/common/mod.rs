//! Test harness for engine integration tests.
//!
//! Provides an in-memory service factory, an entity builder that produces
//! correctly hashed descriptor files, and an in-process peer transport so
//! multi-node synchronization runs without sockets.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use depot_core::cluster::{ClusterError, ServerApi};
use depot_core::{
    ContentService, DeploymentFile, DeploymentOrigin, DeploymentService, HistoryManager,
    StandardAccessChecker, StructuralSignatureValidator, TracingAnalytics, ENTITY_FILE_NAME,
};
use depot_storage::InMemoryStorage;
use depot_types::audit::simple_chain;
use depot_types::{
    AuditInfo, AuthChain, EngineConfig, EntityId, EntityType, PartialDeploymentHistory,
    ServerStatus, Timestamp,
};

/// Default signer for test deployments.
pub const SIGNER: &str = "0x71c7656ec7ab88b098defb751b7401b5f6d8976f";

/// Builds a service over fresh in-memory storage and ledger.
pub async fn build_service(server_name: &str) -> Arc<DeploymentService> {
    build_service_with(EngineConfig {
        server_name: server_name.to_string(),
        ..EngineConfig::default()
    })
    .await
}

/// Builds a service with a custom configuration.
pub async fn build_service_with(config: EngineConfig) -> Arc<DeploymentService> {
    let storage = Arc::new(InMemoryStorage::new());
    let history = HistoryManager::in_memory(config.immutable_window_ms);
    let service = DeploymentService::new(
        config,
        storage,
        history,
        Arc::new(StructuralSignatureValidator),
        Arc::new(StandardAccessChecker::new()),
        Arc::new(TracingAnalytics),
    )
    .await
    .expect("build service");
    Arc::new(service)
}

/// A fully prepared deployment: descriptor file, content files, auth chain.
#[derive(Clone)]
pub struct BuiltEntity {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub files: Vec<DeploymentFile>,
    pub auth_chain: AuthChain,
    pub timestamp: Timestamp,
}

/// Builds entity descriptor files whose hashes actually match.
pub struct EntityBuilder {
    entity_type: EntityType,
    pointers: Vec<String>,
    timestamp: Timestamp,
    content: Vec<(String, Vec<u8>)>,
    extra_references: Vec<(String, String)>,
    extra_uploads: Vec<Vec<u8>>,
    signer: String,
}

impl EntityBuilder {
    pub fn scene() -> Self {
        Self {
            entity_type: EntityType::Scene,
            pointers: vec!["0,0".to_string()],
            timestamp: depot_core::time::now_ms(),
            content: Vec::new(),
            extra_references: Vec::new(),
            extra_uploads: Vec::new(),
            signer: SIGNER.to_string(),
        }
    }

    pub fn profile() -> Self {
        Self {
            entity_type: EntityType::Profile,
            pointers: vec![SIGNER.to_string()],
            ..Self::scene()
        }
    }

    pub fn pointers(mut self, pointers: &[&str]) -> Self {
        self.pointers = pointers.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a content file that is both referenced and uploaded.
    pub fn content(mut self, file: &str, bytes: &[u8]) -> Self {
        self.content.push((file.to_string(), bytes.to_vec()));
        self
    }

    /// References a hash in the descriptor without uploading its bytes.
    pub fn dangling_reference(mut self, file: &str, hash: &str) -> Self {
        self.extra_references.push((file.to_string(), hash.to_string()));
        self
    }

    /// Uploads bytes the descriptor does not reference.
    pub fn orphan_upload(mut self, bytes: &[u8]) -> Self {
        self.extra_uploads.push(bytes.to_vec());
        self
    }

    pub fn build(self) -> BuiltEntity {
        let mut mappings: Vec<serde_json::Value> = Vec::new();
        let mut files: Vec<DeploymentFile> = Vec::new();

        for (file, bytes) in &self.content {
            let hash = depot_types::content_cid(bytes);
            mappings.push(serde_json::json!({ "file": file, "hash": hash }));
            files.push(DeploymentFile::new(hash, bytes.clone()));
        }
        for (file, hash) in &self.extra_references {
            mappings.push(serde_json::json!({ "file": file, "hash": hash }));
        }
        for bytes in &self.extra_uploads {
            files.push(DeploymentFile::new("extra", bytes.clone()));
        }

        let mut descriptor = serde_json::json!({
            "type": self.entity_type.as_str(),
            "pointers": self.pointers,
            "timestamp": self.timestamp,
        });
        if !mappings.is_empty() {
            descriptor["content"] = serde_json::Value::Array(mappings);
        }

        let entity_bytes = serde_json::to_vec(&descriptor).expect("encode descriptor");
        let entity_id = depot_types::content_cid(&entity_bytes);
        files.insert(0, DeploymentFile::new(ENTITY_FILE_NAME, entity_bytes));

        let auth_chain = simple_chain(&self.signer, &entity_id, "0xdeadbeef");
        BuiltEntity {
            entity_id,
            entity_type: self.entity_type,
            files,
            auth_chain,
            timestamp: self.timestamp,
        }
    }
}

/// Deploys through the local client path.
pub async fn deploy_local(
    service: &DeploymentService,
    built: &BuiltEntity,
) -> depot_core::Result<Timestamp> {
    service
        .deploy(
            built.files.clone(),
            built.entity_id.clone(),
            built.auth_chain.clone(),
            None,
            DeploymentOrigin::Local { fix: false },
        )
        .await
}

/// Deploys as if replayed from a peer named `origin` at `timestamp`.
pub async fn deploy_synced(
    service: &DeploymentService,
    built: &BuiltEntity,
    origin: &str,
    timestamp: Timestamp,
) -> depot_core::Result<Timestamp> {
    service
        .deploy(
            built.files.clone(),
            built.entity_id.clone(),
            built.auth_chain.clone(),
            None,
            DeploymentOrigin::Synced { server_name: origin.to_string(), timestamp },
        )
        .await
}

/// The active entity id behind a pointer, if any.
pub async fn active_entity(
    service: &DeploymentService,
    entity_type: EntityType,
    pointer: &str,
) -> Option<EntityId> {
    service
        .get_entities_by_pointers(entity_type, &[pointer.to_string()])
        .await
        .expect("query pointers")
        .into_iter()
        .map(|e| e.id)
        .next()
}

/// In-process peer transport backed by real services, with a switch to make
/// individual content hashes unfetchable.
pub struct InProcessApi {
    nodes: HashMap<String, Arc<DeploymentService>>,
    blocked_content: Mutex<HashSet<String>>,
}

impl InProcessApi {
    pub fn new(nodes: Vec<(&str, Arc<DeploymentService>)>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|(url, s)| (url.to_string(), s)).collect(),
            blocked_content: Mutex::new(HashSet::new()),
        }
    }

    pub fn block_content(&self, hash: &str) {
        self.blocked_content.lock().insert(hash.to_string());
    }

    pub fn unblock_content(&self, hash: &str) {
        self.blocked_content.lock().remove(hash);
    }

    fn node(&self, base_url: &str) -> Result<&Arc<DeploymentService>, ClusterError> {
        self.nodes.get(base_url).ok_or_else(|| ClusterError::Unreachable {
            address: base_url.to_string(),
            message: "no such node".to_string(),
        })
    }
}

#[async_trait]
impl ServerApi for InProcessApi {
    async fn status(&self, base_url: &str) -> Result<ServerStatus, ClusterError> {
        Ok(self.node(base_url)?.get_status().await)
    }

    async fn history(
        &self,
        base_url: &str,
        from: Option<Timestamp>,
    ) -> Result<PartialDeploymentHistory, ClusterError> {
        self.node(base_url)?.get_history(from, None, None).await.map_err(|e| {
            ClusterError::Decode { address: base_url.to_string(), message: e.to_string() }
        })
    }

    async fn audit_info(
        &self,
        base_url: &str,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<AuditInfo, ClusterError> {
        let result =
            self.node(base_url)?.get_audit_info(entity_type, entity_id).await.map_err(|e| {
                ClusterError::Decode { address: base_url.to_string(), message: e.to_string() }
            })?;
        result.map(|r| r.info).ok_or(ClusterError::UnexpectedStatus {
            address: base_url.to_string(),
            status: 404,
        })
    }

    async fn content(&self, base_url: &str, hash: &str) -> Result<Vec<u8>, ClusterError> {
        if self.blocked_content.lock().contains(hash) {
            return Err(ClusterError::Unreachable {
                address: base_url.to_string(),
                message: "content blocked".to_string(),
            });
        }
        let bytes = self.node(base_url)?.get_content(hash).await.map_err(|e| {
            ClusterError::Decode { address: base_url.to_string(), message: e.to_string() }
        })?;
        bytes.ok_or(ClusterError::UnexpectedStatus {
            address: base_url.to_string(),
            status: 404,
        })
    }
}
