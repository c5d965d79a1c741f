use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::error::{PartitionError, Result};
use crate::model::Block;

/// Knobs for the seeded k-means used to group blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterParams {
    /// Seed for the k-means++ initialisation. Fixed so rebuilding a cache
    /// entry reproduces the same grouping.
    pub seed: u64,
    /// Upper bound on Lloyd iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the summed squared centre shift, relative to
    /// the mean per-axis variance of the centroids.
    pub tolerance: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        ClusterParams { seed: 0, max_iterations: 300, tolerance: 1e-4 }
    }
}

type Point2 = [f64; 2];

#[inline]
fn dist2(a: &Point2, b: &Point2) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

// Ties go to the lowest centre index
fn nearest(point: &Point2, centres: &[Point2]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (k, centre) in centres.iter().enumerate() {
        let d = dist2(point, centre);
        if d < best_d {
            best = k;
            best_d = d;
        }
    }
    best
}

fn mean_variance(points: &[Point2]) -> f64 {
    let n = points.len() as f64;
    let mut variance = 0.0;
    for axis in 0..2 {
        let mean = points.iter().map(|p| p[axis]).sum::<f64>() / n;
        variance += points.iter().map(|p| (p[axis] - mean).powi(2)).sum::<f64>() / n;
    }
    variance / 2.0
}

/// k-means++ seeding: each next centre is drawn with probability proportional
/// to its squared distance from the nearest centre already chosen.
fn seed_centres(points: &[Point2], k: usize, rng: &mut StdRng) -> Vec<Point2> {
    let mut centres = Vec::with_capacity(k);
    centres.push(points[rng.random_range(0..points.len())]);

    let mut closest: Vec<f64> = points.iter().map(|p| dist2(p, &centres[0])).collect();
    while centres.len() < k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in closest.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // every point already sits on a centre
            rng.random_range(0..points.len())
        };
        let centre = points[pick];
        for (d, p) in closest.iter_mut().zip(points) {
            *d = d.min(dist2(p, &centre));
        }
        centres.push(centre);
    }
    centres
}

/// Lloyd iterations. Returns the label of every point and whether the run
/// converged before `max_iterations`.
fn lloyd(points: &[Point2], mut centres: Vec<Point2>, params: &ClusterParams) -> (Vec<usize>, bool) {
    let threshold = params.tolerance * mean_variance(points);
    let mut labels = vec![0usize; points.len()];
    let mut converged = false;

    for iteration in 0..params.max_iterations {
        for (label, point) in labels.iter_mut().zip(points) {
            *label = nearest(point, &centres);
        }

        let mut sums = vec![[0.0f64; 2]; centres.len()];
        let mut counts = vec![0usize; centres.len()];
        for (label, point) in labels.iter().zip(points) {
            sums[*label][0] += point[0];
            sums[*label][1] += point[1];
            counts[*label] += 1;
        }

        let mut shift = 0.0;
        for k in 0..centres.len() {
            // an emptied cluster keeps its last centre
            if counts[k] == 0 {
                continue;
            }
            let moved = [sums[k][0] / counts[k] as f64, sums[k][1] / counts[k] as f64];
            shift += dist2(&moved, &centres[k]);
            centres[k] = moved;
        }

        if shift <= threshold {
            debug!(iterations = iteration + 1, "k-means converged");
            converged = true;
            break;
        }
    }

    for (label, point) in labels.iter_mut().zip(points) {
        *label = nearest(point, &centres);
    }
    (labels, converged)
}

/// Group blocks into at most `n_parts` spatially compact clusters by k-means
/// over their centroids.
///
/// With fewer blocks than `n_parts` every block goes to group 0. Clusters that
/// end up empty are dropped and the remaining groups renumbered so indices
/// stay contiguous from 0 in cluster order.
pub fn assign_groups(blocks: Vec<Block>, n_parts: usize, params: &ClusterParams) -> Result<Vec<(Block, usize)>> {
    if n_parts == 0 {
        return Err(PartitionError::InvalidParameter("n_parts must be at least 1".into()));
    }
    if blocks.is_empty() {
        return Ok(Vec::new());
    }

    let mut located = Vec::with_capacity(blocks.len());
    let mut points = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block.centroid() {
            Some(c) => {
                points.push([c.x(), c.y()]);
                located.push(block);
            }
            None => warn!("skipping block without a centroid"),
        }
    }

    if located.len() < n_parts {
        info!(blocks = located.len(), n_parts, "fewer blocks than parts, assigning all to a single group");
        return Ok(located.into_iter().map(|block| (block, 0)).collect());
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let centres = seed_centres(&points, n_parts, &mut rng);
    let (labels, converged) = lloyd(&points, centres, params);
    if !converged {
        debug!(max_iterations = params.max_iterations, "k-means stopped at iteration bound");
    }

    let mut renumber = vec![None; n_parts];
    let mut used = vec![false; n_parts];
    for label in &labels {
        used[*label] = true;
    }
    let mut next = 0;
    for (k, is_used) in used.iter().enumerate() {
        if *is_used {
            renumber[k] = Some(next);
            next += 1;
        }
    }
    if next < n_parts {
        debug!(requested = n_parts, produced = next, "some clusters ended up empty");
    }

    Ok(located.into_iter()
        .zip(labels)
        .filter_map(|(block, label)| renumber[label].map(|group| (block, group)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn cell(x: f64, y: f64) -> Block {
        let p: Polygon<f64> = polygon![
            (x: x, y: y),
            (x: x + 1.0, y: y),
            (x: x + 1.0, y: y + 1.0),
            (x: x, y: y + 1.0),
        ];
        Block::new(p)
    }

    fn groups(assigned: &[(Block, usize)]) -> Vec<usize> {
        assigned.iter().map(|(_, g)| *g).collect()
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(assign_groups(vec![], 6, &ClusterParams::default()).unwrap().is_empty());
    }

    #[test]
    fn zero_parts_is_rejected() {
        assert!(assign_groups(vec![cell(0.0, 0.0)], 0, &ClusterParams::default()).is_err());
    }

    #[test]
    fn fewer_blocks_than_parts_collapse_to_group_zero() {
        let blocks = vec![cell(0.0, 0.0), cell(50.0, 0.0), cell(100.0, 0.0)];
        let assigned = assign_groups(blocks, 6, &ClusterParams::default()).unwrap();
        assert_eq!(groups(&assigned), vec![0, 0, 0]);
    }

    #[test]
    fn separated_clumps_form_their_own_groups() {
        let mut blocks = Vec::new();
        for i in 0..5 {
            blocks.push(cell(i as f64 * 2.0, 0.0));
            blocks.push(cell(1000.0 + i as f64 * 2.0, 1000.0));
        }
        let assigned = assign_groups(blocks, 2, &ClusterParams::default()).unwrap();
        let labels = groups(&assigned);
        for pair in labels.chunks(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert!(labels.iter().step_by(2).all(|g| *g == labels[0]));
    }

    #[test]
    fn same_input_same_seed_same_groups() {
        let blocks: Vec<Block> = (0..200)
            .map(|i| cell(((i * 37) % 101) as f64 * 3.0, ((i * 53) % 89) as f64 * 2.0))
            .collect();
        let a = assign_groups(blocks.clone(), 6, &ClusterParams::default()).unwrap();
        let b = assign_groups(blocks, 6, &ClusterParams::default()).unwrap();
        assert_eq!(groups(&a), groups(&b));
        assert_eq!(groups(&a).iter().max(), Some(&5));
    }

    #[test]
    fn coincident_blocks_leave_no_gaps() {
        let blocks: Vec<Block> = (0..8).map(|_| cell(5.0, 5.0)).collect();
        let assigned = assign_groups(blocks, 6, &ClusterParams::default()).unwrap();
        assert_eq!(groups(&assigned), vec![0; 8]);
    }

    #[test]
    fn iteration_bound_still_returns_assignment() {
        let blocks: Vec<Block> = (0..30).map(|i| cell(i as f64, (i * i % 17) as f64)).collect();
        let params = ClusterParams { max_iterations: 1, ..ClusterParams::default() };
        let assigned = assign_groups(blocks, 4, &params).unwrap();
        assert_eq!(assigned.len(), 30);
        let mut seen = groups(&assigned);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen, (0..seen.len()).collect::<Vec<_>>());
    }
}
