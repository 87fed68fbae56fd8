//! Per-cluster model of watched objects.
//!
//! Objects are stored as they arrive. Derived maps (service ports,
//! endpoints, ingress routes) are brought up to date from the pending
//! deltas when a sync reads the cache.

pub mod cache;
pub mod gateway;
pub mod ingress;
pub mod processor;
pub mod services;
pub mod status;
pub mod tracker;

use std::collections::BTreeMap;

pub use cache::{CacheConfig, CacheSnapshot, ResourceCache};
pub use processor::Processor;
pub use status::{StatusPatch, StatusSink, StatusUpdate, StatusWriter};
pub use tracker::{Change, ChangeTracker};

/// Insert or remove `key`, returning what was stored before.
pub(crate) fn store<K: Ord + Clone, T: Clone>(
    map: &mut BTreeMap<K, T>,
    key: &K,
    value: Option<&T>,
) -> Option<T> {
    match value {
        Some(v) => map.insert(key.clone(), v.clone()),
        None => map.remove(key),
    }
}
