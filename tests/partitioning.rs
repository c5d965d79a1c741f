// End-to-end checks of the partitioning pipeline and its cache:
//   coverage of the clipped blocks, degenerate and empty regions, label format,
//   reproducibility, build-once caching and concurrent first requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use geo::{polygon, Area, BooleanOps, MultiPolygon, Polygon};
use region_partitioner::{
    assign_groups, filter_and_clip, merge::union_all, merge_groups, Block, BlockIndex, ClusterParams, Crs,
    EngineConfig, FileStore, PartitionCache, PartitionEngine, PartitionSet, PartitionStore, Region, RegionId,
    Snapshot,
};

fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
    polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
    ]
}

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
}

/// 20 x 20 grid of 10 m blocks, regions cut across it.
fn snapshot() -> Arc<Snapshot> {
    let region = |id: u32, shape: Polygon<f64>| Region {
        id: RegionId::from(id),
        geometry: MultiPolygon::new(vec![shape]),
        crs: Crs::POSGAR94_AR5,
    };
    let regions = vec![
        region(1, square(0.0, 0.0, 125.0)),
        region(2, square(125.0, 0.0, 75.0)),
        region(3, square(1000.0, 1000.0, 50.0)),
        // covers parts of three blocks only
        region(7, rect(182.0, 155.0, 188.0, 178.0)),
    ];
    let blocks = (0..20)
        .flat_map(|i| (0..20).map(move |j| Block::new(square(i as f64 * 10.0, j as f64 * 10.0, 10.0))))
        .collect();
    Arc::new(Snapshot::new(Crs::POSGAR94_AR5, regions, blocks).unwrap())
}

fn engine_in(dir: &std::path::Path) -> PartitionEngine<FileStore> {
    PartitionEngine::new(snapshot(), FileStore::new(dir), EngineConfig::default()).unwrap()
}

#[test]
fn partitions_cover_the_clipped_blocks() {
    let snapshot = snapshot();
    let region = snapshot.region(&RegionId::from(1)).unwrap();

    let clipped = filter_and_clip(&region.geometry, snapshot.blocks());
    let expected = union_all(clipped.iter().map(|b| b.geometry.clone()).collect());

    let assigned = assign_groups(clipped, 6, &ClusterParams::default()).unwrap();
    let parts = merge_groups(&region.id, assigned);
    assert_eq!(parts.len(), 6);
    let covered = union_all(parts.iter().map(|p| p.geometry.clone()).collect());

    assert!((covered.unsigned_area() - expected.unsigned_area()).abs() < 1e-6);
    assert!(covered.difference(&expected).unsigned_area() < 1e-6);
    assert!((covered.unsigned_area() - 125.0 * 125.0).abs() < 1e-6);

    // no block is split between partitions, so partitions do not overlap
    let total: f64 = parts.iter().map(|p| p.geometry.unsigned_area()).sum();
    assert!((total - covered.unsigned_area()).abs() < 1e-6);
}

#[test]
fn three_blocks_make_one_partition() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let id = RegionId::from(7);

    let region = engine.snapshot().region(&id).unwrap().geometry.clone();
    let clipped = filter_and_clip(&region, engine.snapshot().blocks());
    assert_eq!(clipped.len(), 3);

    let set = engine.partitions(&id).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.partitions[0].label, "7 - Part 1");
    assert!((set.partitions[0].geometry.unsigned_area() - 6.0 * 23.0).abs() < 1e-6);
}

#[test]
fn fewer_blocks_than_parts_is_a_single_group() {
    let blocks: Vec<Block> = (0..3).map(|i| Block::new(square(i as f64 * 10.0, 0.0, 10.0))).collect();
    let index = BlockIndex::new(blocks);
    let region = MultiPolygon::new(vec![square(0.0, 0.0, 30.0)]);

    let clipped = filter_and_clip(&region, &index);
    let assigned = assign_groups(clipped, 6, &ClusterParams::default()).unwrap();
    let parts = merge_groups(&RegionId::from(7), assigned);

    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].group, 0);
    assert!((parts[0].geometry.unsigned_area() - 300.0).abs() < 1e-6);
}

#[test]
fn region_without_blocks_has_no_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let set = engine.partitions(&RegionId::from(3)).unwrap();
    assert!(set.is_empty());
    // the empty result is cached like any other
    assert_eq!(engine.cache().store().get(&RegionId::from(3)).unwrap(), Some(set));
}

#[test]
fn labels_are_one_based_and_groups_contiguous() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let set = engine.partitions(&RegionId::from(2)).unwrap();
    assert_eq!(set.len(), 6);
    for (i, part) in set.partitions.iter().enumerate() {
        assert_eq!(part.group, i);
        assert_eq!(part.label, format!("2 - Part {}", i + 1));
    }
}

#[test]
fn rebuilding_reproduces_the_same_partitions() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let a = engine_in(first_dir.path()).partitions(&RegionId::from(1)).unwrap();
    let b = engine_in(second_dir.path()).partitions(&RegionId::from(1)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn second_request_is_served_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let id = RegionId::from(1);
    let builds = AtomicUsize::new(0);

    let build = || {
        builds.fetch_add(1, Ordering::SeqCst);
        engine.build(&id)
    };
    let first = engine.cache().get_or_build(&id, build).unwrap();
    let second = engine.cache().get_or_build(&id, build).unwrap();
    assert_eq!(first, second);
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    // a fresh engine over the same directory does not build either
    let reopened = engine_in(dir.path());
    let third = reopened
        .cache()
        .get_or_build(&id, || panic!("entry should already be on disk"))
        .unwrap();
    assert_eq!(third, first);
}

#[test]
fn concurrent_first_requests_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = snapshot();
    let engine = PartitionEngine::new(Arc::clone(&snapshot), FileStore::new(dir.path()), EngineConfig::default()).unwrap();
    let cache = PartitionCache::new(FileStore::new(dir.path()));
    let id = RegionId::from(1);
    let builds = AtomicUsize::new(0);
    let barrier = Barrier::new(2);

    let results: Vec<PartitionSet> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache
                        .get_or_build(&id, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            engine.build(&id)
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(results[0], results[1]);
}

#[test]
fn corrupt_entry_falls_back_to_a_fresh_build() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let id = RegionId::from(2);
    std::fs::write(FileStore::new(dir.path()).entry_path(&id), b"not geojson").unwrap();

    let set = engine.partitions(&id).unwrap();
    assert_eq!(set.len(), 6);

    let strict = PartitionEngine::new(
        snapshot(),
        FileStore::new(dir.path()),
        EngineConfig { fallback_on_cache_error: false, ..EngineConfig::default() },
    )
    .unwrap();
    assert!(strict.partitions(&id).unwrap_err().is_cache_error());

    // other regions are unaffected
    assert_eq!(strict.partitions(&RegionId::from(1)).unwrap().len(), 6);
}

#[test]
fn caches_sharing_a_directory_build_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path());
    let caches = [PartitionCache::new(FileStore::new(dir.path())), PartitionCache::new(FileStore::new(dir.path()))];
    let id = RegionId::from(2);
    let builds = AtomicUsize::new(0);
    let barrier = Barrier::new(2);
    let (engine, id, builds, barrier) = (&engine, &id, &builds, &barrier);

    let results: Vec<PartitionSet> = thread::scope(|scope| {
        let handles: Vec<_> = caches
            .iter()
            .map(|cache| {
                scope.spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_build(id, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(100));
                            engine.build(id)
                        })
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(results[0], results[1]);
}
