//! Active-entity-per-pointer state.
//!
//! For every `(entity type, pointer)` pair there is at most one active
//! entity: the one with the greatest `(timestamp, entity_id)` among all
//! deployed entities listing that pointer. The tie-break on entity id keeps
//! commits deterministic across nodes, which is what lets reordered
//! synchronization converge.
//!
//! The in-memory map is the authoritative view readers see; every commit
//! also writes `pointers-<type>/<pointer>` through the storage driver so a
//! restarted node can rebuild the map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use depot_storage::ContentStorage;
use depot_types::{Entity, EntityId, EntityType, Pointer, Timestamp};

use crate::error::Result;

/// What a pointer currently resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEntity {
    /// The active entity id.
    pub entity_id: EntityId,
    /// That entity's timestamp, kept for commit comparisons.
    pub timestamp: Timestamp,
}

/// Outcome of a pointer commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    /// False when the entity was shadowed by a newer incumbent; no pointer
    /// moved in that case.
    pub could_commit: bool,
    /// Entities that lost their last pointer in this commit.
    pub entities_deleted: Vec<EntityId>,
}

impl CommitResult {
    fn shadowed() -> Self {
        Self { could_commit: false, entities_deleted: Vec::new() }
    }
}

/// Owns the pointer map and the commit algorithm.
pub struct PointerManager {
    storage: Arc<dyn ContentStorage>,
    active: RwLock<HashMap<(EntityType, Pointer), ActiveEntity>>,
}

impl PointerManager {
    /// Creates a manager with an empty pointer map.
    pub fn new(storage: Arc<dyn ContentStorage>) -> Self {
        Self { storage, active: RwLock::new(HashMap::new()) }
    }

    /// Rebuilds the pointer map from the persisted `pointers-<type>`
    /// categories, reading each active entity's descriptor for its
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing or reading fails. A pointer file
    /// naming an entity whose descriptor is missing or unparsable is skipped
    /// with a warning; it will be rewritten by the next commit.
    pub async fn from_storage(storage: Arc<dyn ContentStorage>) -> Result<Self> {
        let mut active = HashMap::new();
        for entity_type in EntityType::ALL {
            let category = pointer_category(*entity_type);
            for pointer in storage.list(&category).await? {
                let Some(raw) = storage.get(&category, &pointer).await? else {
                    continue;
                };
                let entity_id = String::from_utf8_lossy(&raw).trim().to_string();
                let Some(bytes) = storage.get(crate::service::CONTENTS_CATEGORY, &entity_id).await?
                else {
                    tracing::warn!(%pointer, %entity_id, "pointer names a missing entity, skipping");
                    continue;
                };
                match Entity::from_json_bytes(entity_id.clone(), &bytes) {
                    Ok(entity) => {
                        active.insert(
                            (*entity_type, pointer),
                            ActiveEntity { entity_id, timestamp: entity.timestamp },
                        );
                    },
                    Err(e) => {
                        tracing::warn!(%pointer, %entity_id, error = %e, "unparsable active entity, skipping");
                    },
                }
            }
        }
        Ok(Self { storage, active: RwLock::new(active) })
    }

    /// Attempts to make `entity` active on all of its pointers.
    ///
    /// If any incumbent on those pointers is newer or equal under the
    /// `(timestamp, entity_id)` order, the entity is shadowed: nothing moves
    /// and `could_commit` is false (the caller still persists the entity so
    /// history stays queryable). Otherwise every pointer is repointed
    /// atomically and incumbents that lost their last pointer are reported
    /// in `entities_deleted`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persisting the pointer files fails; the
    /// in-memory map is already updated at that point and remains the
    /// authoritative view.
    pub async fn try_to_commit(&self, entity: &Entity) -> Result<CommitResult> {
        let entity_type = entity.entity_type;

        let deleted = {
            let mut active = self.active.write();

            // Distinct incumbents across the target pointers.
            let mut incumbents: HashMap<EntityId, Timestamp> = HashMap::new();
            for pointer in &entity.pointers {
                if let Some(current) = active.get(&(entity_type, pointer.clone())) {
                    incumbents.insert(current.entity_id.clone(), current.timestamp);
                }
            }

            let shadowed = incumbents.iter().any(|(id, timestamp)| {
                (*timestamp, id.as_str()) >= (entity.timestamp, entity.id.as_str())
            });
            if shadowed {
                return Ok(CommitResult::shadowed());
            }

            for pointer in &entity.pointers {
                active.insert(
                    (entity_type, pointer.clone()),
                    ActiveEntity { entity_id: entity.id.clone(), timestamp: entity.timestamp },
                );
            }

            // An incumbent with no remaining pointer anywhere in the map is
            // orphaned.
            let mut deleted: Vec<EntityId> = incumbents
                .into_keys()
                .filter(|id| !active.values().any(|a| a.entity_id == *id))
                .collect();
            deleted.sort_unstable();
            deleted
        };

        // Persist outside the lock; the deploy path is single-writer so no
        // competing commit can interleave here.
        let category = pointer_category(entity_type);
        for pointer in &entity.pointers {
            self.storage.put(&category, pointer, entity.id.clone().into_bytes()).await?;
        }

        Ok(CommitResult { could_commit: true, entities_deleted: deleted })
    }

    /// Returns the active entity for a pointer, if any.
    pub fn active_entity(&self, entity_type: EntityType, pointer: &str) -> Option<ActiveEntity> {
        self.active.read().get(&(entity_type, pointer.to_ascii_lowercase())).cloned()
    }

    /// Returns all pointers of a type with an active entity, sorted.
    pub fn active_pointers(&self, entity_type: EntityType) -> Vec<Pointer> {
        let mut pointers: Vec<Pointer> = self
            .active
            .read()
            .keys()
            .filter(|(t, _)| *t == entity_type)
            .map(|(_, p)| p.clone())
            .collect();
        pointers.sort_unstable();
        pointers
    }

    /// Returns the distinct active entity ids behind a set of pointers,
    /// in pointer order.
    pub fn active_entities_on(&self, entity_type: EntityType, pointers: &[Pointer]) -> Vec<EntityId> {
        let active = self.active.read();
        let mut seen = Vec::new();
        for pointer in pointers {
            if let Some(entry) = active.get(&(entity_type, pointer.to_ascii_lowercase())) {
                if !seen.contains(&entry.entity_id) {
                    seen.push(entry.entity_id.clone());
                }
            }
        }
        seen
    }

    /// True when any of `entity`'s pointers holds a strictly newer entity.
    /// Used by the local deploy path to reject stale client writes.
    pub fn has_newer_entity(&self, entity: &Entity) -> bool {
        let active = self.active.read();
        entity.pointers.iter().any(|pointer| {
            active
                .get(&(entity.entity_type, pointer.clone()))
                .is_some_and(|current| {
                    (current.timestamp, current.entity_id.as_str())
                        > (entity.timestamp, entity.id.as_str())
                })
        })
    }
}

/// Storage category holding the pointer files of one entity type.
pub fn pointer_category(entity_type: EntityType) -> String {
    format!("pointers-{entity_type}")
}
