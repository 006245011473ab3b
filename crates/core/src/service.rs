//! The deployment orchestrator and the content-service trait.
//!
//! [`DeploymentService`] is the only mutator of pointer and history state.
//! Deploys are serialized behind a commit gate so the pointer manager
//! observes a total order; reads never take the gate and see the pointer
//! map's pre- or post-commit state, never a partial commit.
//!
//! Mutation order is Storage → Pointers → History, with the pointer commit
//! as the linearization point: once a reader can observe the new pointer,
//! the content behind it is already stored.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use serde::Serialize;

use depot_storage::ContentStorage;
use depot_types::{
    audit, content_cid, AuditInfo, AuthChain, DeploymentEvent, Entity, EntityId, EntityType,
    HashId, PartialDeploymentHistory, Pointer, ServerStatus, Timestamp, CURRENT_PROTOCOL_VERSION,
};

use crate::cache::EntityCache;
use crate::deployment::{DeploymentFile, DeploymentOrigin, ENTITY_FILE_NAME};
use crate::error::{InternalSnafu, Result, ServiceError};
use crate::external::{AccessChecker, AnalyticsSink, SignatureValidator, INVALID_SIGNATURE_ERROR};
use crate::failed::FailedDeploymentsManager;
use crate::history::HistoryManager;
use crate::pointers::PointerManager;
use crate::time::now_ms;
use crate::validation;

/// Storage category holding raw content blobs (entity files included).
pub const CONTENTS_CATEGORY: &str = "contents";

/// Storage category holding audit records.
pub const PROOFS_CATEGORY: &str = "proofs";

/// Availability of one content hash, as reported by `/available-content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentAvailability {
    /// The queried hash.
    pub cid: HashId,
    /// Whether this node stores it.
    pub available: bool,
}

/// Audit record plus the blacklist overlay's annotations.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResult {
    /// The stored audit record.
    #[serde(flatten)]
    pub info: AuditInfo,
    /// Set by the blacklist overlay when the entity itself is hidden.
    #[serde(skip_serializing_if = "is_false")]
    pub is_blacklisted: bool,
    /// Referenced content hashes hidden by the blacklist overlay.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blacklisted_content: Vec<HashId>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// The read/write surface of a content node.
///
/// [`DeploymentService`] implements it directly; the blacklist overlay
/// implements it again by decorating an inner service.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Deploys an entity with its content files. Returns the deployment
    /// timestamp.
    async fn deploy(
        &self,
        files: Vec<DeploymentFile>,
        entity_id: EntityId,
        auth_chain: AuthChain,
        migration_data: Option<serde_json::Value>,
        origin: DeploymentOrigin,
    ) -> Result<Timestamp>;

    /// Active entities among `ids`, filtered to `entity_type`.
    async fn get_entities_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<Vec<Entity>>;

    /// Active entities behind `pointers`.
    async fn get_entities_by_pointers(
        &self,
        entity_type: EntityType,
        pointers: &[Pointer],
    ) -> Result<Vec<Entity>>;

    /// All pointers of a type with an active entity.
    async fn get_active_pointers(&self, entity_type: EntityType) -> Result<Vec<Pointer>>;

    /// The audit record of a deployed entity.
    async fn get_audit_info(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<AuditResult>>;

    /// Raw bytes of a stored content blob.
    async fn get_content(&self, hash: &str) -> Result<Option<Vec<u8>>>;

    /// Which of `hashes` this node stores.
    async fn is_content_available(&self, hashes: &[HashId]) -> Result<Vec<ContentAvailability>>;

    /// Node status summary.
    async fn get_status(&self) -> ServerStatus;

    /// A slice of the deployment history.
    async fn get_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
    ) -> Result<PartialDeploymentHistory>;
}

#[async_trait]
impl<T: ContentService + ?Sized> ContentService for Arc<T> {
    async fn deploy(
        &self,
        files: Vec<DeploymentFile>,
        entity_id: EntityId,
        auth_chain: AuthChain,
        migration_data: Option<serde_json::Value>,
        origin: DeploymentOrigin,
    ) -> Result<Timestamp> {
        (**self).deploy(files, entity_id, auth_chain, migration_data, origin).await
    }

    async fn get_entities_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<Vec<Entity>> {
        (**self).get_entities_by_ids(entity_type, ids).await
    }

    async fn get_entities_by_pointers(
        &self,
        entity_type: EntityType,
        pointers: &[Pointer],
    ) -> Result<Vec<Entity>> {
        (**self).get_entities_by_pointers(entity_type, pointers).await
    }

    async fn get_active_pointers(&self, entity_type: EntityType) -> Result<Vec<Pointer>> {
        (**self).get_active_pointers(entity_type).await
    }

    async fn get_audit_info(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<AuditResult>> {
        (**self).get_audit_info(entity_type, entity_id).await
    }

    async fn get_content(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        (**self).get_content(hash).await
    }

    async fn is_content_available(&self, hashes: &[HashId]) -> Result<Vec<ContentAvailability>> {
        (**self).is_content_available(hashes).await
    }

    async fn get_status(&self) -> ServerStatus {
        (**self).get_status().await
    }

    async fn get_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
    ) -> Result<PartialDeploymentHistory> {
        (**self).get_history(from, to, server_name).await
    }
}

/// The deployment engine: validation, pointer commit, content persistence,
/// history append.
pub struct DeploymentService {
    config: depot_types::EngineConfig,
    storage: Arc<dyn ContentStorage>,
    pointers: PointerManager,
    history: HistoryManager,
    failed: FailedDeploymentsManager,
    cache: EntityCache,
    signature_validator: Arc<dyn SignatureValidator>,
    access_checker: Arc<dyn AccessChecker>,
    analytics: Arc<dyn AnalyticsSink>,
    commit_gate: tokio::sync::Mutex<()>,
}

impl DeploymentService {
    /// Builds the service, rebuilding pointer state from storage.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the pointer map cannot be reloaded.
    pub async fn new(
        config: depot_types::EngineConfig,
        storage: Arc<dyn ContentStorage>,
        history: HistoryManager,
        signature_validator: Arc<dyn SignatureValidator>,
        access_checker: Arc<dyn AccessChecker>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Result<Self> {
        let pointers = PointerManager::from_storage(Arc::clone(&storage)).await?;
        let cache = EntityCache::new(config.entity_cache_size);
        let failed = FailedDeploymentsManager::new();
        Ok(Self {
            config,
            storage,
            pointers,
            history,
            failed,
            cache,
            signature_validator,
            access_checker,
            analytics,
            commit_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// The failed-deployment registry.
    pub fn failed_deployments(&self) -> &FailedDeploymentsManager {
        &self.failed
    }

    /// The history ledger.
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    /// This node's announced name.
    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Looks up an entity by id, going through the cache.
    pub async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        if let Some(entity) = self.cache.get(entity_id) {
            return Ok(Some(entity));
        }
        let Some(bytes) = self.storage.get(CONTENTS_CATEGORY, entity_id).await? else {
            return Ok(None);
        };
        match Entity::from_json_bytes(entity_id.to_string(), &bytes) {
            Ok(entity) => {
                self.cache.insert(entity.clone());
                Ok(Some(entity))
            },
            Err(e) => {
                tracing::warn!(entity_id, error = %e, "stored entity file is unparsable");
                Ok(None)
            },
        }
    }

    /// Runs the validation predicate set, cheap local checks first.
    async fn collect_validation_errors(
        &self,
        entity: &Entity,
        auth_chain: &AuthChain,
        audit_info: &AuditInfo,
        uploaded: &BTreeSet<String>,
        uploaded_bytes: u64,
        now: Timestamp,
    ) -> Result<Vec<String>> {
        let mut errors = Vec::new();

        errors.extend(validation::recent(
            entity,
            now,
            self.config.request_ttl_backwards_ms,
            self.config.request_ttl_forwards_ms,
        ));
        errors.extend(validation::ipfs_hashing(entity));
        errors.extend(validation::request_size(
            entity,
            uploaded_bytes,
            &self.config.upload_limits,
        ));

        if !self.signature_validator.is_valid(&entity.id, auth_chain).await {
            errors.push(INVALID_SIGNATURE_ERROR.to_string());
        }

        // Content references: anything not uploaded must already be stored.
        let missing: Vec<&str> = entity
            .referenced_hashes()
            .into_iter()
            .filter(|h| !uploaded.contains(*h))
            .collect();
        let probes = future::join_all(
            missing.iter().map(|hash| self.storage.exists(CONTENTS_CATEGORY, hash)),
        )
        .await;
        let mut already_stored = BTreeSet::new();
        for (hash, stored) in missing.iter().zip(probes) {
            if stored? {
                already_stored.insert(hash.to_string());
            }
        }
        errors.extend(validation::content(entity, uploaded, &already_stored));

        let address = audit::owner_address(auth_chain).unwrap_or_default();
        errors.extend(self.access_checker.check_access(entity, &address).await);

        if audit_info.is_legacy() {
            if self.config.allow_legacy_entities {
                let overlapping = self.overlapping_audit_infos(entity).await?;
                errors.extend(validation::legacy_entity(audit_info, &overlapping));
            } else {
                errors.push("This server does not accept legacy entities.".to_string());
            }
        }

        Ok(errors)
    }

    /// Audit records of the entities currently active on `entity`'s
    /// pointers.
    async fn overlapping_audit_infos(&self, entity: &Entity) -> Result<Vec<AuditInfo>> {
        let ids = self.pointers.active_entities_on(entity.entity_type, &entity.pointers);
        let mut infos = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(bytes) = self.storage.get(PROOFS_CATEGORY, &id).await? {
                match serde_json::from_slice(&bytes) {
                    Ok(info) => infos.push(info),
                    Err(e) => {
                        tracing::warn!(entity_id = %id, error = %e, "unparsable audit record");
                    },
                }
            }
        }
        Ok(infos)
    }
}

#[async_trait]
impl ContentService for DeploymentService {
    async fn deploy(
        &self,
        files: Vec<DeploymentFile>,
        entity_id: EntityId,
        auth_chain: AuthChain,
        migration_data: Option<serde_json::Value>,
        origin: DeploymentOrigin,
    ) -> Result<Timestamp> {
        // Locate the descriptor file; exactly one must be present.
        let entity_files: Vec<&DeploymentFile> =
            files.iter().filter(|f| f.name == ENTITY_FILE_NAME).collect();
        let entity_file = match entity_files.as_slice() {
            [single] => *single,
            [] => return Err(ServiceError::validation("Failed to find the entity file.")),
            _ => return Err(ServiceError::validation("Found more than one entity file.")),
        };

        if content_cid(&entity_file.content) != entity_id {
            return Err(ServiceError::validation(
                "Entity file's hash didn't match the signed entity id.",
            ));
        }

        let entity = Entity::from_json_bytes(entity_id.clone(), &entity_file.content)
            .map_err(|e| ServiceError::validation(e.to_string()))?;

        // A fix re-submission only makes sense for a deployment that
        // actually failed.
        if matches!(origin, DeploymentOrigin::Local { fix: true })
            && self.failed.status(&entity.id).is_none()
        {
            return Err(ServiceError::validation(
                "There is no failed deployment for the given entity id.",
            ));
        }

        let uploaded_bytes: u64 = files.iter().map(|f| f.content.len() as u64).sum();
        let hashed = validation::hash_files(files);
        let uploaded = validation::uploaded_hash_set(&hashed);

        let mut audit_info = AuditInfo {
            deployed_timestamp: 0,
            auth_chain: auth_chain.clone(),
            version: CURRENT_PROTOCOL_VERSION.to_string(),
            migration_data,
        };

        let now = now_ms();
        let errors = self
            .collect_validation_errors(
                &entity,
                &auth_chain,
                &audit_info,
                &uploaded,
                uploaded_bytes,
                now,
            )
            .await?;
        if !errors.is_empty() {
            match &origin {
                DeploymentOrigin::Local { .. } => {
                    return Err(ServiceError::Validation { errors });
                },
                DeploymentOrigin::Synced { server_name, .. } => {
                    // The event already happened on the origin node; replay
                    // it anyway so the cluster converges.
                    tracing::warn!(
                        entity_id = %entity.id,
                        source = %server_name,
                        errors = %errors.join("; "),
                        "applying synced deployment despite validation failures"
                    );
                },
            }
        }

        // Block stale client writes; the sync path replays canonical order
        // and skips this.
        if origin.is_local() && self.pointers.has_newer_entity(&entity) {
            return Err(ServiceError::validation(
                "There is a newer entity pointed by one or more of the pointers you provided.",
            ));
        }

        let _gate = self.commit_gate.lock().await;

        let commit = self.pointers.try_to_commit(&entity).await?;
        for deleted in &commit.entities_deleted {
            self.cache.evict(deleted);
        }

        // A shadowed deployment persists only its descriptor so the entity
        // stays auditable and referencable by id. The exception is a
        // re-deploy of the entity that is still active (shadowed by itself):
        // that is the content re-fetch path, so its files are stored.
        let store_all = commit.could_commit
            || entity.pointers.iter().any(|p| {
                self.pointers
                    .active_entity(entity.entity_type, p)
                    .is_some_and(|a| a.entity_id == entity.id)
            });
        for (hash, bytes) in hashed {
            if !store_all && hash != entity.id {
                continue;
            }
            if !self.storage.exists(CONTENTS_CATEGORY, &hash).await? {
                self.storage.put(CONTENTS_CATEGORY, &hash, bytes).await?;
            }
        }

        let (server_name, deployment_timestamp) = match &origin {
            DeploymentOrigin::Local { .. } => (self.config.server_name.clone(), now_ms()),
            DeploymentOrigin::Synced { server_name, timestamp } => {
                (server_name.clone(), *timestamp)
            },
        };

        audit_info.deployed_timestamp = deployment_timestamp;
        let audit_bytes = serde_json::to_vec(&audit_info).map_err(|e| {
            InternalSnafu { message: format!("failed to encode audit record: {e}") }.build()
        })?;
        self.storage.put(PROOFS_CATEGORY, &entity.id, audit_bytes).await?;

        self.history
            .append(DeploymentEvent {
                server_name: server_name.clone(),
                entity_type: entity.entity_type,
                entity_id: entity.id.clone(),
                timestamp: deployment_timestamp,
            })
            .await?;

        self.failed.clear(&entity.id);
        self.cache.insert(entity.clone());
        drop(_gate);

        self.analytics.record_deployment(&server_name, &entity).await;

        tracing::info!(
            entity_id = %entity.id,
            entity_type = %entity.entity_type,
            could_commit = commit.could_commit,
            displaced = commit.entities_deleted.len(),
            local = origin.is_local(),
            "deployment applied"
        );
        Ok(deployment_timestamp)
    }

    async fn get_entities_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<Vec<Entity>> {
        let mut distinct: Vec<&EntityId> = Vec::new();
        for id in ids {
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }

        let mut entities = Vec::new();
        for id in distinct {
            if let Some(entity) = self.get_entity(id).await? {
                if entity.entity_type == entity_type {
                    entities.push(entity);
                }
            }
        }
        Ok(entities)
    }

    async fn get_entities_by_pointers(
        &self,
        entity_type: EntityType,
        pointers: &[Pointer],
    ) -> Result<Vec<Entity>> {
        let ids = self.pointers.active_entities_on(entity_type, pointers);
        self.get_entities_by_ids(entity_type, &ids).await
    }

    async fn get_active_pointers(&self, entity_type: EntityType) -> Result<Vec<Pointer>> {
        Ok(self.pointers.active_pointers(entity_type))
    }

    async fn get_audit_info(
        &self,
        _entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<AuditResult>> {
        let Some(bytes) = self.storage.get(PROOFS_CATEGORY, entity_id).await? else {
            return Ok(None);
        };
        let info: AuditInfo = serde_json::from_slice(&bytes).map_err(|e| {
            InternalSnafu { message: format!("unparsable audit record for {entity_id}: {e}") }
                .build()
        })?;
        Ok(Some(AuditResult { info, is_blacklisted: false, blacklisted_content: Vec::new() }))
    }

    async fn get_content(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.storage.get(CONTENTS_CATEGORY, hash).await?)
    }

    async fn is_content_available(&self, hashes: &[HashId]) -> Result<Vec<ContentAvailability>> {
        let probes = future::join_all(
            hashes.iter().map(|hash| self.storage.exists(CONTENTS_CATEGORY, hash)),
        )
        .await;
        hashes
            .iter()
            .zip(probes)
            .map(|(cid, available)| {
                Ok(ContentAvailability { cid: cid.clone(), available: available? })
            })
            .collect()
    }

    async fn get_status(&self) -> ServerStatus {
        let now = now_ms();
        ServerStatus::new(
            self.config.server_name.clone(),
            env!("CARGO_PKG_VERSION"),
            now,
            self.history.immutable_time(now),
        )
    }

    async fn get_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
    ) -> Result<PartialDeploymentHistory> {
        Ok(self.history.partial_history(from, to, server_name, now_ms()))
    }
}
