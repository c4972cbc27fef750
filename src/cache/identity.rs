//! Identity-preserving id-to-instance cache.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::traits::Entity;
use crate::error::Result;

/// Number of recently used entities kept alive by the cache itself.
pub const DEFAULT_CAPACITY: usize = 256;

/// Cache guaranteeing one in-process instance per remote id.
///
/// Every instance is indexed by a weak reference, so as long as anybody holds
/// the `Arc` for an id, looking that id up again yields the same `Arc`. On top
/// of that the cache holds strong references to the `capacity` most recently
/// used entities; older ones are released and, once nobody else references
/// them, fetched again on the next lookup.
pub struct EntityCache<V: Entity> {
  inner: Mutex<Slots<V>>,
}

struct Slots<V: Entity> {
  index: HashMap<V::Id, Weak<V>>,
  recent: IndexMap<V::Id, Arc<V>>,
  capacity: usize,
}

impl<V: Entity> Slots<V> {
  fn lookup(&mut self, id: &V::Id) -> Option<Arc<V>> {
    match self.index.get(id).map(Weak::upgrade) {
      Some(Some(entity)) => {
        self.touch(id, Arc::clone(&entity));
        Some(entity)
      }
      Some(None) => {
        self.index.remove(id);
        None
      }
      None => None,
    }
  }

  fn touch(&mut self, id: &V::Id, entity: Arc<V>) {
    self.recent.shift_remove(id);
    self.recent.insert(id.clone(), entity);
    while self.recent.len() > self.capacity {
      self.recent.shift_remove_index(0);
    }
  }

  fn insert(&mut self, entity: V) -> Arc<V> {
    let id = entity.id();
    if let Some(existing) = self.lookup(&id) {
      return existing;
    }

    if self.index.len() >= 2 * self.capacity.max(1) {
      self.index.retain(|_, slot| slot.strong_count() > 0);
    }

    let entity = Arc::new(entity);
    self.index.insert(id.clone(), Arc::downgrade(&entity));
    self.touch(&id, Arc::clone(&entity));
    entity
  }
}

impl<V: Entity> EntityCache<V> {
  pub fn new() -> Self {
    Self::with_capacity(DEFAULT_CAPACITY)
  }

  /// Create a cache keeping at most `capacity` unreferenced entities alive.
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(Slots {
        index: HashMap::new(),
        recent: IndexMap::new(),
        capacity,
      }),
    }
  }

  /// The cached instance for `id`, if any. Never fetches.
  pub fn lookup(&self, id: &V::Id) -> Option<Arc<V>> {
    self.inner.lock().lookup(id)
  }

  /// Store `entity` unless an instance with the same id is already cached.
  ///
  /// Returns the instance that is cached afterwards; when one existed, the
  /// freshly built `entity` is discarded.
  pub fn intern(&self, entity: V) -> Arc<V> {
    self.inner.lock().insert(entity)
  }

  /// Get one entity, fetching it with `fetch` on a miss.
  pub fn get<F>(&self, id: &V::Id, fetch: F) -> Result<Arc<V>>
  where
    F: FnOnce(&V::Id) -> Result<V>,
  {
    if let Some(hit) = self.lookup(id) {
      debug!(entity = V::entity_type(), ?id, "cache hit");
      return Ok(hit);
    }

    debug!(entity = V::entity_type(), ?id, "cache miss");
    let entity = fetch(id)?;
    Ok(self.intern(entity))
  }

  /// Get many entities, fetching all misses with one call to `fetch_missing`.
  ///
  /// `fetch_missing` is not called when every id is cached. Ids the remote
  /// site does not know are simply absent from the result, which is ordered
  /// like `ids`.
  pub fn get_many<F>(&self, ids: &[V::Id], fetch_missing: F) -> Result<IndexMap<V::Id, Arc<V>>>
  where
    F: FnOnce(&[V::Id]) -> Result<Vec<V>>,
  {
    let mut found: HashMap<V::Id, Arc<V>> = HashMap::new();
    let mut missing = Vec::new();
    let mut seen = HashSet::new();

    for id in ids {
      if !seen.insert(id.clone()) {
        continue;
      }
      match self.lookup(id) {
        Some(hit) => {
          found.insert(id.clone(), hit);
        }
        None => missing.push(id.clone()),
      }
    }

    debug!(
      entity = V::entity_type(),
      hits = found.len(),
      misses = missing.len(),
      "bulk lookup"
    );

    if !missing.is_empty() {
      for entity in fetch_missing(&missing)? {
        let id = entity.id();
        found.insert(id, self.intern(entity));
      }
    }

    Ok(
      ids
        .iter()
        .filter_map(|id| found.get(id).map(|e| (id.clone(), Arc::clone(e))))
        .collect(),
    )
  }

  /// Drop the cached instance for `id`; the next lookup fetches again.
  pub fn evict(&self, id: &V::Id) {
    let mut slots = self.inner.lock();
    slots.index.remove(id);
    slots.recent.shift_remove(id);
  }

  pub fn clear(&self) {
    let mut slots = self.inner.lock();
    slots.index.clear();
    slots.recent.clear();
  }

  /// Number of live cached instances.
  pub fn len(&self) -> usize {
    self
      .inner
      .lock()
      .index
      .values()
      .filter(|slot| slot.strong_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<V: Entity> Default for EntityCache<V> {
  fn default() -> Self {
    Self::new()
  }
}
