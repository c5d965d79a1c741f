use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod cache;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod crs;
pub mod engine;
pub mod error;
pub mod filter;
pub mod merge;
pub mod model;
pub mod source;
pub mod view;

pub use cache::{EntryLock, FileStore, MemoryStore, PartitionCache, PartitionStore};
pub use cluster::{assign_groups, ClusterParams};
pub use config::EngineConfig;
pub use crs::Crs;
pub use engine::PartitionEngine;
pub use error::{PartitionError, Result};
pub use filter::{filter_and_clip, BlockIndex};
pub use merge::merge_groups;
pub use model::{Block, Partition, PartitionSet, Region, RegionId};
pub use source::{Snapshot, SourceOptions};
pub use view::Selection;

/// Where the engine reads its inputs from and keeps its results.
pub struct Inputs {
    pub regions: PathBuf,
    pub blocks: PathBuf,
    pub region_field: String,
    pub cache_dir: PathBuf,
}

/// Load both source files and set up an engine over a file-backed cache.
pub fn open_engine(
    inputs: &Inputs,
    options: &SourceOptions,
    config: EngineConfig,
) -> Result<PartitionEngine<FileStore>> {
    let snapshot = source::load_snapshot(&inputs.regions, &inputs.blocks, &inputs.region_field, options)?;
    PartitionEngine::new(Arc::new(snapshot), FileStore::new(&inputs.cache_dir), config)
}

/// Drop the cached entry of `region` so the next request rebuilds it.
pub fn invalidate(cache_dir: &Path, region: &RegionId) -> Result<bool> {
    FileStore::new(cache_dir).remove(region)
}
