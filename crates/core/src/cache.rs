//! Bounded in-memory entity cache.
//!
//! Parsed entity descriptors are cached by id so reads do not re-parse the
//! stored file on every lookup. Entries leave the cache two ways: explicit
//! eviction when a commit displaces the entity, and LRU eviction when the
//! capacity bound is hit.

use std::collections::HashMap;

use parking_lot::Mutex;

use depot_types::{Entity, EntityId};

struct CacheInner {
    entries: HashMap<EntityId, (Entity, u64)>,
    tick: u64,
}

/// LRU cache of parsed entities, keyed by id.
pub struct EntityCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl EntityCache {
    /// Creates a cache holding at most `capacity` entities.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner { entries: HashMap::new(), tick: 0 }),
            capacity: capacity.max(1),
        }
    }

    /// Looks up an entity, refreshing its recency.
    pub fn get(&self, id: &str) -> Option<Entity> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(id).map(|(entity, stamp)| {
            *stamp = tick;
            entity.clone()
        })
    }

    /// Inserts an entity, evicting the least recently used entry when full.
    pub fn insert(&self, entity: Entity) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(&entity.id) {
            if let Some(oldest) =
                inner.entries.iter().min_by_key(|(_, (_, stamp))| *stamp).map(|(id, _)| id.clone())
            {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(entity.id.clone(), (entity, tick));
    }

    /// Removes an entity, e.g. after a commit displaced it.
    pub fn evict(&self, id: &str) {
        self.inner.lock().entries.remove(id);
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
