use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;
use tracing::{debug, warn};

use super::{EntryLock, PartitionStore};
use crate::codec;
use crate::error::{PartitionError, Result};
use crate::model::{PartitionSet, RegionId};

/// One GeoJSON file per region in a directory.
///
/// Entries are written to a temp file in the same directory and published
/// with a no-clobber rename, so a reader only ever sees complete entries and
/// the first writer for an id wins. Builds are serialised across processes
/// through an advisory lock on a `subregions_<id>.lock` file next to the entry.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry for `id`.
    pub fn entry_path(&self, id: &RegionId) -> PathBuf {
        self.dir.join(format!("subregions_{}.geojson", id.file_stem()))
    }

    /// Path of the lock file guarding builds of `id`.
    pub fn lock_path(&self, id: &RegionId) -> PathBuf {
        self.dir.join(format!("subregions_{}.lock", id.file_stem()))
    }

    /// Delete the entry for `id`, returning whether one existed.
    pub fn remove(&self, id: &RegionId) -> Result<bool> {
        match fs::remove_file(self.entry_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PartitionError::cache(id, e)),
        }
    }

    fn read(&self, id: &RegionId, path: &Path) -> Result<PartitionSet> {
        let bytes = fs::read(path).map_err(|e| PartitionError::cache(id, format!("read {}: {e}", path.display())))?;
        let set = codec::from_bytes(&bytes)
            .map_err(|e| PartitionError::cache(id, format!("corrupt entry {}: {e}", path.display())))?;
        if set.region_id != *id {
            return Err(PartitionError::cache(
                id,
                format!("entry {} holds region {}", path.display(), set.region_id),
            ));
        }
        Ok(set)
    }
}

impl PartitionStore for FileStore {
    fn get(&self, id: &RegionId) -> Result<Option<PartitionSet>> {
        let path = self.entry_path(id);
        if !path.exists() {
            return Ok(None);
        }
        debug!(region = %id, path = %path.display(), "reading cached partitions");
        self.read(id, &path).map(Some)
    }

    fn lock_entry(&self, id: &RegionId) -> Result<EntryLock> {
        let path = self.lock_path(id);
        fs::create_dir_all(&self.dir)
            .map_err(|e| PartitionError::cache(id, format!("create dir {}: {e}", self.dir.display())))?;
        // left in place after release; unlinking it would let a waiter lock a stale inode
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PartitionError::cache(id, format!("open {}: {e}", path.display())))?;
        file.lock().map_err(|e| PartitionError::cache(id, format!("lock {}: {e}", path.display())))?;
        debug!(region = %id, path = %path.display(), "holding build lock");
        Ok(EntryLock::file(file))
    }

    fn put_if_absent(&self, set: PartitionSet) -> Result<PartitionSet> {
        let id = set.region_id.clone();
        let target = self.entry_path(&id);
        fs::create_dir_all(&self.dir)
            .map_err(|e| PartitionError::cache(&id, format!("create dir {}: {e}", self.dir.display())))?;

        let bytes = codec::to_bytes(&set)?;
        let mut tmp = Builder::new()
            .prefix(".subregions-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| PartitionError::cache(&id, format!("create temp file: {e}")))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| PartitionError::cache(&id, format!("write temp file: {e}")))?;

        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                // best-effort: make the rename itself durable
                if let Ok(dir) = File::open(&self.dir) {
                    let _ = dir.sync_all();
                }
                debug!(region = %id, path = %target.display(), "published partition entry");
                Ok(set)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                warn!(region = %id, "entry published concurrently, keeping the existing one");
                self.read(&id, &target)
            }
            Err(e) => Err(PartitionError::cache(&id, format!("publish {}: {}", target.display(), e.error))),
        }
    }
}
