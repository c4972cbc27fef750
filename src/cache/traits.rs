//! Core traits for cached entities.

use std::fmt::Debug;
use std::hash::Hash;

/// An in-process object standing for one remote record.
///
/// Implementors expose the stable id the remote site assigned to them. Ids are
/// never reused by the remote site while a cache is alive.
pub trait Entity: Send + Sync + 'static {
  /// Stable remote identifier (e.g., issue number, forum id)
  type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

  fn id(&self) -> Self::Id;

  /// Entity type name used in log output (e.g., "issue")
  fn entity_type() -> &'static str;
}
