//! Lazily loaded snapshots of remote state.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;

/// A value fetched from the remote site on first read.
///
/// The cell is either unloaded or holds an immutable snapshot. It owns no
/// network logic: every read that may need to load is handed the loader.
/// A snapshot is only installed once the loader has fully succeeded, so a
/// failed load leaves whatever was visible before untouched.
pub struct Lazy<T> {
  slots: Mutex<Slots<T>>,
}

struct Slots<T> {
  snapshot: Option<Arc<T>>,
  /// The snapshot dropped by the last invalidation
  retired: Option<Arc<T>>,
}

impl<T> Slots<T> {
  fn install(&mut self, fresh: &Arc<T>) {
    self.snapshot = Some(Arc::clone(fresh));
    self.retired = None;
  }
}

/// The children of some remote object, keyed and in listing order.
pub type LazyCollection<K, V> = Lazy<IndexMap<K, V>>;

impl<T> Lazy<T> {
  pub fn new() -> Self {
    Self {
      slots: Mutex::new(Slots {
        snapshot: None,
        retired: None,
      }),
    }
  }

  /// The loaded snapshot, without loading.
  pub fn current(&self) -> Option<Arc<T>> {
    self.slots.lock().snapshot.clone()
  }

  /// The loaded snapshot, or the one most recently invalidated.
  ///
  /// Loaders use this to hand out the same child instances again.
  pub fn last_known(&self) -> Option<Arc<T>> {
    let slots = self.slots.lock();
    slots.snapshot.clone().or_else(|| slots.retired.clone())
  }

  pub fn is_loaded(&self) -> bool {
    self.slots.lock().snapshot.is_some()
  }

  /// Return the snapshot, running `loader` first if nothing is loaded.
  ///
  /// The lock is not held while `loader` runs, so a loader may freely read
  /// other caches.
  pub fn get_or_load<F>(&self, loader: F) -> Result<Arc<T>>
  where
    F: FnOnce() -> Result<T>,
  {
    if let Some(snapshot) = self.current() {
      return Ok(snapshot);
    }

    let fresh = Arc::new(loader()?);
    self.slots.lock().install(&fresh);
    Ok(fresh)
  }

  /// Load a new snapshot regardless of what is cached.
  ///
  /// On failure the previous snapshot stays visible.
  pub fn reload<F>(&self, loader: F) -> Result<Arc<T>>
  where
    F: FnOnce() -> Result<T>,
  {
    let fresh = Arc::new(loader()?);
    self.slots.lock().install(&fresh);
    Ok(fresh)
  }

  /// Forget the snapshot; the next read loads again.
  pub fn invalidate(&self) {
    let mut slots = self.slots.lock();
    if let Some(snapshot) = slots.snapshot.take() {
      slots.retired = Some(snapshot);
    }
  }
}

impl<T: Clone> Lazy<T> {
  /// Apply a local edit to the loaded snapshot.
  ///
  /// Readers holding the previous `Arc` keep their view. Returns `false`
  /// without calling `edit` when nothing is loaded.
  pub fn patch<F>(&self, edit: F) -> bool
  where
    F: FnOnce(&mut T),
  {
    let mut slots = self.slots.lock();
    match slots.snapshot.as_mut() {
      Some(snapshot) => {
        edit(Arc::make_mut(snapshot));
        true
      }
      None => false,
    }
  }
}

impl<K, V> Lazy<IndexMap<K, V>>
where
  K: Hash + Eq,
  V: Clone,
{
  /// Look up one child, loading the whole collection if needed.
  pub fn get<Q, F>(&self, key: &Q, loader: F) -> Result<Option<V>>
  where
    Q: Hash + indexmap::Equivalent<K> + ?Sized,
    F: FnOnce() -> Result<IndexMap<K, V>>,
  {
    let snapshot = self.get_or_load(loader)?;
    Ok(snapshot.get(key).cloned())
  }
}

impl<T> Default for Lazy<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Lazy")
      .field("snapshot", &self.current())
      .finish()
  }
}
