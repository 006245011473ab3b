//! Blacklist overlay.
//!
//! A purely subtractive decorator over [`ContentService`]: it never mutates
//! storage, it only filters reads and rejects writes that involve banned
//! addresses, pointers, or content. Removing a target from the blacklist
//! restores visibility with no other repair.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;

use depot_types::{
    audit, AuthChain, Entity, EntityId, EntityType, HashId, PartialDeploymentHistory, Pointer,
    ServerStatus, Timestamp,
};

use crate::deployment::{DeploymentFile, DeploymentOrigin};
use crate::error::Result;
use crate::service::{AuditResult, ContentAvailability, ContentService};

/// Something the blacklist can hide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlacklistTarget {
    /// An Ethereum address; its deployments are rejected.
    Address(String),
    /// A content hash; its bytes become unreadable.
    Content(HashId),
    /// A specific entity.
    Entity(EntityType, EntityId),
    /// A pointer; reads through it return nothing.
    Pointer(EntityType, Pointer),
}

impl fmt::Display for BlacklistTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlacklistTarget::Address(address) => write!(f, "address:{address}"),
            BlacklistTarget::Content(hash) => write!(f, "content:{hash}"),
            BlacklistTarget::Entity(t, id) => write!(f, "entity:{t}:{id}"),
            BlacklistTarget::Pointer(t, p) => write!(f, "pointer:{t}:{p}"),
        }
    }
}

/// The set of hidden targets.
#[derive(Default)]
pub struct Blacklist {
    targets: RwLock<HashSet<BlacklistTarget>>,
}

impl Blacklist {
    /// Creates an empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hides a target.
    pub fn ban(&self, target: BlacklistTarget) {
        tracing::info!(target = %target, "blacklisted");
        self.targets.write().insert(target);
    }

    /// Restores a target. Returns whether it was banned.
    pub fn unban(&self, target: &BlacklistTarget) -> bool {
        self.targets.write().remove(target)
    }

    /// Whether a target is currently hidden.
    pub fn is_banned(&self, target: &BlacklistTarget) -> bool {
        self.targets.read().contains(target)
    }

    fn address_banned(&self, address: &str) -> bool {
        self.is_banned(&BlacklistTarget::Address(address.to_ascii_lowercase()))
    }

    fn content_banned(&self, hash: &str) -> bool {
        self.is_banned(&BlacklistTarget::Content(hash.to_string()))
    }

    fn entity_banned(&self, entity_type: EntityType, entity_id: &str) -> bool {
        self.is_banned(&BlacklistTarget::Entity(entity_type, entity_id.to_string()))
    }

    fn pointer_banned(&self, entity_type: EntityType, pointer: &str) -> bool {
        self.is_banned(&BlacklistTarget::Pointer(entity_type, pointer.to_string()))
    }
}

/// [`ContentService`] with the blacklist applied, holding the inner service
/// by value.
pub struct BlacklistedService<S> {
    inner: S,
    blacklist: Blacklist,
}

impl<S> BlacklistedService<S> {
    /// Wraps a service with a blacklist.
    pub fn new(inner: S, blacklist: Blacklist) -> Self {
        Self { inner, blacklist }
    }

    /// The blacklist, for administration.
    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    fn visible(&self, entity: &Entity) -> bool {
        !self.blacklist.entity_banned(entity.entity_type, &entity.id)
    }
}

#[async_trait]
impl<S: ContentService> ContentService for BlacklistedService<S> {
    async fn deploy(
        &self,
        files: Vec<DeploymentFile>,
        entity_id: EntityId,
        auth_chain: AuthChain,
        migration_data: Option<serde_json::Value>,
        origin: DeploymentOrigin,
    ) -> Result<Timestamp> {
        if let Some(address) = audit::owner_address(&auth_chain) {
            if self.blacklist.address_banned(&address) {
                return Err(crate::ServiceError::validation(format!(
                    "Can't allow a deployment from address '{address}' since it was blacklisted."
                )));
            }
        }
        self.inner.deploy(files, entity_id, auth_chain, migration_data, origin).await
    }

    async fn get_entities_by_ids(
        &self,
        entity_type: EntityType,
        ids: &[EntityId],
    ) -> Result<Vec<Entity>> {
        let entities = self.inner.get_entities_by_ids(entity_type, ids).await?;
        Ok(entities.into_iter().filter(|e| self.visible(e)).collect())
    }

    async fn get_entities_by_pointers(
        &self,
        entity_type: EntityType,
        pointers: &[Pointer],
    ) -> Result<Vec<Entity>> {
        let allowed: Vec<Pointer> = pointers
            .iter()
            .filter(|p| !self.blacklist.pointer_banned(entity_type, p))
            .cloned()
            .collect();
        let entities = self.inner.get_entities_by_pointers(entity_type, &allowed).await?;
        Ok(entities.into_iter().filter(|e| self.visible(e)).collect())
    }

    async fn get_active_pointers(&self, entity_type: EntityType) -> Result<Vec<Pointer>> {
        let pointers = self.inner.get_active_pointers(entity_type).await?;
        Ok(pointers
            .into_iter()
            .filter(|p| !self.blacklist.pointer_banned(entity_type, p))
            .collect())
    }

    async fn get_audit_info(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<AuditResult>> {
        let Some(mut result) = self.inner.get_audit_info(entity_type, entity_id).await? else {
            return Ok(None);
        };

        result.is_blacklisted = self.blacklist.entity_banned(entity_type, entity_id);
        if let Some(entity) = self
            .inner
            .get_entities_by_ids(entity_type, &[entity_id.to_string()])
            .await?
            .into_iter()
            .next()
        {
            result.blacklisted_content = entity
                .referenced_hashes()
                .into_iter()
                .filter(|h| self.blacklist.content_banned(h))
                .map(str::to_string)
                .collect();
        }
        Ok(Some(result))
    }

    async fn get_content(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        if self.blacklist.content_banned(hash) {
            return Ok(None);
        }
        self.inner.get_content(hash).await
    }

    async fn is_content_available(&self, hashes: &[HashId]) -> Result<Vec<ContentAvailability>> {
        let mut availability = self.inner.is_content_available(hashes).await?;
        for entry in &mut availability {
            if self.blacklist.content_banned(&entry.cid) {
                entry.available = false;
            }
        }
        Ok(availability)
    }

    async fn get_status(&self) -> ServerStatus {
        self.inner.get_status().await
    }

    async fn get_history(
        &self,
        from: Option<Timestamp>,
        to: Option<Timestamp>,
        server_name: Option<&str>,
    ) -> Result<PartialDeploymentHistory> {
        self.inner.get_history(from, to, server_name).await
    }
}
