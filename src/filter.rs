use geo::{Area, BooleanOps, BoundingRect, Intersects, MultiPolygon, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use tracing::debug;

use crate::model::Block;

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

fn envelope(index: usize, rect: Rect<f64>) -> Envelope {
    GeomWithData::new(
        Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        index,
    )
}

/// Immutable block collection with an R-tree over block bounding boxes.
#[derive(Debug, Clone)]
pub struct BlockIndex {
    blocks: Vec<Block>,
    rtree: RTree<Envelope>,
}

impl BlockIndex {
    pub fn new(blocks: Vec<Block>) -> Self {
        let rtree = RTree::bulk_load(
            blocks.iter().enumerate()
                .filter_map(|(i, block)| block.geometry.bounding_rect().map(|rect| envelope(i, rect)))
                .collect(),
        );
        BlockIndex { blocks, rtree }
    }

    #[inline] pub fn len(&self) -> usize { self.blocks.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.blocks.is_empty() }

    #[inline] pub fn blocks(&self) -> &[Block] { &self.blocks }

    /// Indices of blocks whose bounding box meets `rect`, in load order.
    pub fn candidates(&self, rect: Rect<f64>) -> Vec<usize> {
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut hits: Vec<usize> = self.rtree
            .locate_in_envelope_intersecting(&query)
            .map(|env| env.data)
            .collect();
        hits.sort_unstable();
        hits
    }
}

impl From<Vec<Block>> for BlockIndex {
    fn from(blocks: Vec<Block>) -> Self {
        BlockIndex::new(blocks)
    }
}

/// Select the blocks meeting `region` and clip each of them to it.
///
/// Blocks touching the region only along its boundary are selected but clip
/// to an empty shape, and are dropped. Output keeps the index's load order.
pub fn filter_and_clip(region: &MultiPolygon<f64>, blocks: &BlockIndex) -> Vec<Block> {
    let Some(bounds) = region.bounding_rect() else {
        return Vec::new();
    };

    let mut touching = 0usize;
    let clipped: Vec<Block> = blocks.candidates(bounds).into_iter()
        .map(|i| &blocks.blocks()[i])
        .filter(|block| block.geometry.intersects(region))
        .filter_map(|block| {
            let inside = block.geometry.intersection(region);
            if inside.0.is_empty() || inside.unsigned_area() == 0.0 {
                touching += 1;
                None
            } else {
                Some(Block { geometry: inside })
            }
        })
        .collect();

    debug!(kept = clipped.len(), dropped_on_boundary = touching, "clipped blocks to region");
    clipped
}
