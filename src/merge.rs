use std::collections::BTreeMap;

use geo::{BooleanOps, MultiPolygon};
use tracing::debug;

use crate::model::{Block, Partition, RegionId};

/// Union of many shapes, reduced pairwise so each union stays small.
pub fn union_all(mut shapes: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    if shapes.is_empty() {
        return MultiPolygon::new(Vec::new());
    }
    while shapes.len() > 1 {
        let mut next = Vec::with_capacity(shapes.len().div_ceil(2));
        let mut pairs = shapes.into_iter();
        while let Some(a) = pairs.next() {
            match pairs.next() {
                Some(b) => next.push(a.union(&b)),
                None => next.push(a),
            }
        }
        shapes = next;
    }
    shapes.pop().unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

/// Merge every group of assigned blocks into one partition of `region_id`,
/// ordered by ascending group index.
pub fn merge_groups(region_id: &RegionId, assignments: Vec<(Block, usize)>) -> Vec<Partition> {
    let mut groups: BTreeMap<usize, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    for (block, group) in assignments {
        groups.entry(group).or_default().push(block.geometry);
    }

    groups.into_iter()
        .map(|(group, shapes)| {
            debug!(region = %region_id, group, blocks = shapes.len(), "merging group");
            Partition::new(region_id.clone(), group, union_all(shapes))
        })
        .collect()
}
