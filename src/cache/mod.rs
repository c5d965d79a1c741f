//! Durable per-region storage of partition results.
//!
//! A [`PartitionStore`] is a plain key→value medium with create-if-absent
//! writes. [`PartitionCache`] sits on top of a store and guarantees that a
//! region is built at most once: builds for the same region id serialise
//! behind a per-id lock, in this process and through the store's
//! [`EntryLock`] across processes, and re-check the store once they hold it.
//! Different ids build independently.
//!
//! Entries never expire. Removing an entry out of band is the only way to
//! force a rebuild.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::collections::HashMap;
use std::fs::File;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{PartitionError, Result};
use crate::model::{PartitionSet, RegionId};

/// Build lock on one store entry, released on drop.
#[derive(Debug, Default)]
pub struct EntryLock {
    _file: Option<File>,
}

impl EntryLock {
    /// Nothing to hold; the in-process lock is enough.
    pub fn none() -> Self {
        EntryLock::default()
    }

    /// Held for as long as `file` stays open and locked.
    pub fn file(file: File) -> Self {
        EntryLock { _file: Some(file) }
    }
}

/// Key→value medium holding one [`PartitionSet`] per region id.
pub trait PartitionStore: Send + Sync {
    /// Read the entry for `id`.
    ///
    /// * `Ok(Some(set))` if an entry exists.
    /// * `Ok(None)` if there is none.
    /// * `Err(CacheUnavailable)` if the medium fails or the entry is corrupt.
    fn get(&self, id: &RegionId) -> Result<Option<PartitionSet>>;

    /// Store `set` under its region id unless an entry already exists.
    ///
    /// Returns the entry that is durable after the call: `set` itself, or the
    /// one written first by someone else.
    fn put_if_absent(&self, set: PartitionSet) -> Result<PartitionSet>;

    /// Block until no other user of the medium is building `id`.
    ///
    /// Stores only reachable from this process need not override this.
    fn lock_entry(&self, _id: &RegionId) -> Result<EntryLock> {
        Ok(EntryLock::none())
    }
}

impl<S: PartitionStore + ?Sized> PartitionStore for Arc<S> {
    fn get(&self, id: &RegionId) -> Result<Option<PartitionSet>> {
        (**self).get(id)
    }

    fn put_if_absent(&self, set: PartitionSet) -> Result<PartitionSet> {
        (**self).put_if_absent(set)
    }

    fn lock_entry(&self, id: &RegionId) -> Result<EntryLock> {
        (**self).lock_entry(id)
    }
}

/// Get-or-build front end over a [`PartitionStore`].
#[derive(Debug)]
pub struct PartitionCache<S> {
    store: S,
    building: Mutex<HashMap<RegionId, Arc<Mutex<()>>>>,
    fallback: bool,
}

impl<S: PartitionStore> PartitionCache<S> {
    /// A cache that reports every store failure to the caller.
    pub fn new(store: S) -> Self {
        PartitionCache { store, building: Mutex::new(HashMap::new()), fallback: false }
    }

    /// With `fallback` set, a store failure no longer fails the request: an
    /// unreadable entry or lock is answered by an uncached build, and a result
    /// that cannot be written is returned as built.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key_lock(&self, id: &RegionId) -> Arc<Mutex<()>> {
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(building.entry(id.clone()).or_default())
    }

    fn release_key(&self, id: &RegionId, lock: Arc<Mutex<()>>) {
        let mut building = self.building.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if building.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            building.remove(id);
        }
    }

    /// Return the stored partitions of `id`, running `build` and persisting
    /// its result only when no entry exists yet.
    pub fn get_or_build<F>(&self, id: &RegionId, build: F) -> Result<PartitionSet>
    where
        F: FnOnce() -> Result<PartitionSet>,
    {
        match self.store.get(id) {
            Ok(Some(hit)) => {
                debug!(region = %id, "partition cache hit");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => return self.uncached(id, e, build),
        }

        let lock = self.key_lock(id);
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.build_locked(id, build);
        drop(guard);
        self.release_key(id, lock);
        result
    }

    fn build_locked<F>(&self, id: &RegionId, build: F) -> Result<PartitionSet>
    where
        F: FnOnce() -> Result<PartitionSet>,
    {
        let _entry = match self.store.lock_entry(id) {
            Ok(entry) => entry,
            Err(e) => return self.uncached(id, e, build),
        };

        // another caller may have finished the build while we waited
        match self.store.get(id) {
            Ok(Some(hit)) => {
                debug!(region = %id, "partition cache filled while waiting");
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => return self.uncached(id, e, build),
        }

        info!(region = %id, "building partitions");
        let built = build()?;
        let kept = self.fallback.then(|| built.clone());
        match self.store.put_if_absent(built) {
            Ok(stored) => {
                info!(region = %id, partitions = stored.len(), "stored partitions");
                Ok(stored)
            }
            Err(e) => match kept {
                Some(built) => {
                    warn!(region = %id, error = %e, "could not store partitions, returning them uncached");
                    Ok(built)
                }
                None => Err(e),
            },
        }
    }

    fn uncached<F>(&self, id: &RegionId, err: PartitionError, build: F) -> Result<PartitionSet>
    where
        F: FnOnce() -> Result<PartitionSet>,
    {
        if !self.fallback {
            return Err(err);
        }
        warn!(region = %id, error = %err, "partition cache unavailable, building uncached");
        build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::error::PartitionError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_set(id: &RegionId) -> PartitionSet {
        PartitionSet { region_id: id.clone(), crs: Crs::POSGAR94_AR5, partitions: vec![] }
    }

    #[test]
    fn builds_once_then_serves_from_store() {
        let cache = PartitionCache::new(MemoryStore::new());
        let id = RegionId::from(3);
        let builds = AtomicUsize::new(0);
        let build = || -> Result<PartitionSet> {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(empty_set(&id))
        };

        let first = cache.get_or_build(&id, build).unwrap();
        let second = cache.get_or_build(&id, build).unwrap();
        assert_eq!(first, second);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_build_stores_nothing() {
        let cache = PartitionCache::new(MemoryStore::new());
        let id = RegionId::from(4);
        let err = cache
            .get_or_build(&id, || Err(PartitionError::data("blocks missing")))
            .unwrap_err();
        assert!(matches!(err, PartitionError::DataUnavailable(_)));
        assert!(cache.store().get(&id).unwrap().is_none());

        let ok = cache.get_or_build(&id, || Ok(empty_set(&id))).unwrap();
        assert_eq!(ok.region_id, id);
    }

    #[test]
    fn distinct_regions_do_not_share_entries() {
        let cache = PartitionCache::new(MemoryStore::new());
        let a = RegionId::from(1);
        let b = RegionId::from(2);
        cache.get_or_build(&a, || Ok(empty_set(&a))).unwrap();
        let got = cache.get_or_build(&b, || Ok(empty_set(&b))).unwrap();
        assert_eq!(got.region_id, b);
    }

    #[test]
    fn finished_builds_release_their_key_lock() {
        let cache = PartitionCache::new(MemoryStore::new());
        for n in 0..5 {
            let id = RegionId::from(n);
            cache.get_or_build(&id, || Ok(empty_set(&id))).unwrap();
        }
        assert!(cache.building.lock().unwrap().is_empty());
    }

    /// Accepts reads but refuses every write.
    struct ReadOnlyStore;

    impl PartitionStore for ReadOnlyStore {
        fn get(&self, _id: &RegionId) -> Result<Option<PartitionSet>> {
            Ok(None)
        }

        fn put_if_absent(&self, set: PartitionSet) -> Result<PartitionSet> {
            Err(PartitionError::cache(&set.region_id, "read-only medium"))
        }
    }

    #[test]
    fn failed_write_returns_the_build_when_falling_back() {
        let cache = PartitionCache::new(ReadOnlyStore).with_fallback(true);
        let id = RegionId::from(8);
        let builds = AtomicUsize::new(0);

        let set = cache
            .get_or_build(&id, || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(empty_set(&id))
            })
            .unwrap();
        assert_eq!(set, empty_set(&id));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_write_is_reported_without_fallback() {
        let cache = PartitionCache::new(ReadOnlyStore);
        let id = RegionId::from(8);
        let err = cache.get_or_build(&id, || Ok(empty_set(&id))).unwrap_err();
        assert!(err.is_cache_error());
    }
}
