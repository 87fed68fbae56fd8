use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pkg_cache::ResourceCache;
use pkg_types::{Kind, NamespacedName, Object};
use tracing::{debug, info};

use crate::runner::BoundedFrequencyRunner;
use crate::watch::WatchEvent;

/// Feeds watch events into the cache and kicks the runner on material
/// changes. Kicks are held back until every kind has synced; the first
/// sync runs when the last kind reports in.
pub struct EventHandler {
    cache: Arc<ResourceCache>,
    runner: Arc<BoundedFrequencyRunner>,
    synced: Mutex<BTreeSet<Kind>>,
    initialized: AtomicBool,
    /// Keys handed to the cache, per kind.
    known: Mutex<BTreeMap<Kind, BTreeSet<NamespacedName>>>,
}

impl EventHandler {
    pub fn new(cache: Arc<ResourceCache>, runner: Arc<BoundedFrequencyRunner>) -> Self {
        Self {
            cache,
            runner,
            synced: Mutex::new(BTreeSet::new()),
            initialized: AtomicBool::new(false),
            known: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn on_add(&self, object: &Object) {
        self.remember(object);
        if self.cache.insert(object) {
            self.kick();
        }
    }

    pub fn on_update(&self, previous: &Object, current: &Object) {
        if previous == current {
            return;
        }
        self.remember(current);
        if self.cache.insert(current) {
            self.kick();
        }
    }

    pub fn on_delete(&self, object: &Object) {
        if let Some(keys) = self.known.lock().get_mut(&object.kind()) {
            keys.remove(&object.key());
        }
        if self.cache.delete(object) {
            self.kick();
        }
    }

    pub fn on_synced(&self, kind: Kind) {
        let count = {
            let mut synced = self.synced.lock();
            synced.insert(kind);
            synced.len()
        };
        debug!("{} synced ({}/{})", kind, count, Kind::ALL.len());
        if count == Kind::ALL.len() && !self.initialized.swap(true, Ordering::AcqRel) {
            info!("All {} watch streams synced, scheduling initial sync", count);
            self.runner.kick();
        }
    }

    /// A fresh listing of `kind` arrived. Objects cached earlier but absent
    /// from it were deleted while the watch was down.
    pub fn on_relist(&self, kind: Kind, listed: &BTreeSet<NamespacedName>) {
        let stale: Vec<NamespacedName> = {
            let mut known = self.known.lock();
            let keys = known.entry(kind).or_default();
            let stale = keys.difference(listed).cloned().collect();
            keys.retain(|key| listed.contains(key));
            stale
        };
        if stale.is_empty() {
            return;
        }
        info!("Dropping {} {} object(s) missing from the listing", stale.len(), kind);
        let mut material = false;
        for key in &stale {
            material |= self.cache.apply(kind, key, None);
        }
        if material {
            self.kick();
        }
    }

    pub fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::Added(object) => self.on_add(&object),
            WatchEvent::Modified { previous, current } => self.on_update(&previous, &current),
            WatchEvent::Deleted(object) => self.on_delete(&object),
            WatchEvent::Synced(kind) => self.on_synced(kind),
        }
    }

    fn remember(&self, object: &Object) {
        self.known
            .lock()
            .entry(object.kind())
            .or_default()
            .insert(object.key());
    }

    fn kick(&self) {
        if self.is_initialized() {
            self.runner.kick();
        }
    }
}
