use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

use crate::cache::{PartitionCache, PartitionStore};
use crate::cluster::assign_groups;
use crate::config::EngineConfig;
use crate::error::{PartitionError, Result};
use crate::filter::filter_and_clip;
use crate::merge::merge_groups;
use crate::model::{PartitionSet, RegionId};
use crate::source::Snapshot;

/// Filter, cluster and merge the blocks of one region, serving repeated
/// requests from a [`PartitionCache`].
#[derive(Debug)]
pub struct PartitionEngine<S> {
    snapshot: Arc<Snapshot>,
    cache: PartitionCache<S>,
    config: EngineConfig,
}

impl<S: PartitionStore> PartitionEngine<S> {
    pub fn new(snapshot: Arc<Snapshot>, store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let cache = PartitionCache::new(store).with_fallback(config.fallback_on_cache_error);
        Ok(PartitionEngine { snapshot, cache, config })
    }

    #[inline] pub fn snapshot(&self) -> &Snapshot { &self.snapshot }

    #[inline] pub fn config(&self) -> &EngineConfig { &self.config }

    #[inline] pub fn cache(&self) -> &PartitionCache<S> { &self.cache }

    /// Run the full pipeline for `id` without touching the cache.
    pub fn build(&self, id: &RegionId) -> Result<PartitionSet> {
        let region = self.snapshot.region(id)
            .ok_or_else(|| PartitionError::data(format!("unknown region {id}")))?;

        let clipped = filter_and_clip(&region.geometry, self.snapshot.blocks());
        if clipped.is_empty() {
            info!(region = %id, "no blocks intersect region");
        }
        debug!(region = %id, blocks = clipped.len(), candidates = self.snapshot.blocks().len(), "filtered blocks");

        let assigned = assign_groups(clipped, self.config.n_parts, &self.config.cluster)?;
        let partitions = merge_groups(&region.id, assigned);

        Ok(PartitionSet {
            region_id: region.id.clone(),
            crs: self.snapshot.crs(),
            partitions,
        })
    }

    /// Partitions of `id`, built at most once per store entry.
    ///
    /// With `fallback_on_cache_error` set, a store failure degrades to an
    /// uncached result for this region only, built at most once per request.
    pub fn partitions(&self, id: &RegionId) -> Result<PartitionSet> {
        self.cache.get_or_build(id, || self.build(id))
    }

    /// Partitions of every region in the snapshot, regions spread over the
    /// available cores. Results follow the snapshot's region order.
    pub fn partition_all(&self) -> Vec<(RegionId, Result<PartitionSet>)> {
        let ids = self.snapshot.region_ids();
        if ids.is_empty() {
            return Vec::new();
        }
        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let per_worker = ids.len().div_ceil(workers);

        thread::scope(|scope| {
            let handles: Vec<_> = ids.chunks(per_worker)
                .map(|chunk| scope.spawn(move || {
                    chunk.iter().map(|id| (id.clone(), self.partitions(id))).collect::<Vec<_>>()
                }))
                .collect();

            handles.into_iter()
                .zip(ids.chunks(per_worker))
                .flat_map(|(handle, chunk)| match handle.join() {
                    Ok(results) => results,
                    Err(_) => chunk.iter()
                        .map(|id| (id.clone(), Err(PartitionError::data(format!("build of region {id} panicked")))))
                        .collect(),
                })
                .collect()
        })
    }
}
