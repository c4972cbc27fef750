//! In-process caching of remote state.
//!
//! This module provides the two caches every entity type builds on:
//! - [`Lazy`] / [`LazyCollection`]: a snapshot fetched wholesale on first read,
//!   swapped in atomically and dropped wholesale on invalidation
//! - [`EntityCache`]: an id-to-instance map that hands out the same `Arc` for
//!   the same id, with bulk lookups that fetch only the misses

mod identity;
mod lazy;
mod traits;

pub use identity::{EntityCache, DEFAULT_CAPACITY};
pub use lazy::{Lazy, LazyCollection};
pub use traits::Entity;
