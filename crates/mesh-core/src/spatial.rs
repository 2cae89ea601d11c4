//! Bucketed KD-tree for nearest-neighbour queries on vertex positions.
//!
//! The tree is balanced by median splits on the axis of largest spread and
//! stops subdividing once a node holds at most `bucket_size` points. It is
//! immutable after construction and can be queried from many threads.
//!
//! Ties are resolved toward the lowest insertion index, so results depend
//! only on the input order and never on the tree shape.
//!
//! # Example
//!
//! ```
//! use mesh_core::spatial::SpatialIndex;
//! use nalgebra::Point3;
//!
//! let points = vec![
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 2.0, 0.0),
//! ];
//! let index = SpatialIndex::build(&points, 16).unwrap();
//! let hit = index.nearest(&Point3::new(0.9, 0.1, 0.0));
//! assert_eq!(hit.index, 1);
//! ```

use nalgebra::Point3;

use crate::error::{MeshError, MeshResult};

/// Default leaf capacity.
pub const DEFAULT_BUCKET_SIZE: usize = 16;

/// Result of a nearest-neighbour query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Insertion index of the nearest point.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f64,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        axis: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

/// Immutable KD-tree over a point set.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    points: Vec<Point3<f64>>,
    /// Permutation of point indices; leaves own contiguous ranges.
    order: Vec<usize>,
    nodes: Vec<Node>,
    bucket_size: usize,
}

/// Build an index with the default bucket size.
pub fn build_index(points: &[Point3<f64>]) -> MeshResult<SpatialIndex> {
    SpatialIndex::build(points, DEFAULT_BUCKET_SIZE)
}

impl SpatialIndex {
    /// Build a tree over `points`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` when `bucket_size` is zero, `InvalidGeometry` when
    /// `points` is empty.
    pub fn build(points: &[Point3<f64>], bucket_size: usize) -> MeshResult<Self> {
        if bucket_size == 0 {
            return Err(MeshError::invalid_parameter(
                "bucket_size",
                "leaf bucket size must be greater than 0",
            ));
        }
        if points.is_empty() {
            return Err(MeshError::invalid_geometry(
                "cannot index an empty point set",
            ));
        }

        let mut index = SpatialIndex {
            points: points.to_vec(),
            order: (0..points.len()).collect(),
            nodes: Vec::with_capacity(2 * points.len() / bucket_size + 1),
            bucket_size,
        };
        index.build_node(0, points.len());
        Ok(index)
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let id = self.nodes.len();
        if end - start <= self.bucket_size {
            self.nodes.push(Node::Leaf { start, end });
            return id;
        }

        let axis = self.widest_axis(start, end);
        let mid = start + (end - start) / 2;
        let points = &self.points;
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            points[a][axis].total_cmp(&points[b][axis]).then(a.cmp(&b))
        });
        let value = self.points[self.order[mid]][axis];

        // Reserve the slot; children are appended after it
        self.nodes.push(Node::Leaf { start, end });
        let left = self.build_node(start, mid);
        let right = self.build_node(mid, end);
        self.nodes[id] = Node::Split {
            axis,
            value,
            left,
            right,
        };
        id
    }

    fn widest_axis(&self, start: usize, end: usize) -> usize {
        let mut min = self.points[self.order[start]];
        let mut max = min;
        for &i in &self.order[start + 1..end] {
            min = min.inf(&self.points[i]);
            max = max.sup(&self.points[i]);
        }
        let spread = max - min;
        spread.imax()
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a successfully built index.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Leaf capacity this tree was built with.
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Indexed point by insertion index.
    pub fn point(&self, index: usize) -> Option<&Point3<f64>> {
        self.points.get(index)
    }

    /// Nearest indexed point to `query`.
    pub fn nearest(&self, query: &Point3<f64>) -> Neighbor {
        let mut best = (f64::INFINITY, usize::MAX);
        self.search(0, query, &mut best);
        Neighbor {
            index: best.1,
            distance: best.0.sqrt(),
        }
    }

    /// The `k` indexed points nearest to `query`, closest first.
    ///
    /// Equal distances are ordered by insertion index. Returns fewer than `k`
    /// neighbours only when the index holds fewer points.
    pub fn nearest_k(&self, query: &Point3<f64>, k: usize) -> Vec<Neighbor> {
        if k == 0 {
            return Vec::new();
        }
        let mut best: Vec<(f64, usize)> = Vec::with_capacity(k + 1);
        self.search_k(0, query, k, &mut best);
        best.into_iter()
            .map(|(d, index)| Neighbor {
                index,
                distance: d.sqrt(),
            })
            .collect()
    }

    fn search_k(
        &self,
        node: usize,
        query: &Point3<f64>,
        k: usize,
        best: &mut Vec<(f64, usize)>,
    ) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &i in &self.order[start..end] {
                    let candidate = ((self.points[i] - query).norm_squared(), i);
                    let full = best.len() == k;
                    if full && !precedes(candidate, best[k - 1]) {
                        continue;
                    }
                    let at = best.partition_point(|&entry| precedes(entry, candidate));
                    best.insert(at, candidate);
                    best.truncate(k);
                }
            }
            Node::Split {
                axis,
                value,
                left,
                right,
            } => {
                let diff = query[axis] - value;
                let (near, far) = if diff < 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };
                self.search_k(near, query, k, best);
                if best.len() < k || diff * diff <= best[k - 1].0 {
                    self.search_k(far, query, k, best);
                }
            }
        }
    }

    fn search(&self, node: usize, query: &Point3<f64>, best: &mut (f64, usize)) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &i in &self.order[start..end] {
                    let d = (self.points[i] - query).norm_squared();
                    if d < best.0 || (d == best.0 && i < best.1) {
                        *best = (d, i);
                    }
                }
            }
            Node::Split {
                axis,
                value,
                left,
                right,
            } => {
                let diff = query[axis] - value;
                let (near, far) = if diff < 0.0 {
                    (left, right)
                } else {
                    (right, left)
                };
                self.search(near, query, best);
                // `<=` keeps equidistant points on the far side reachable for the tie rule
                if diff * diff <= best.0 {
                    self.search(far, query, best);
                }
            }
        }
    }
}

/// Distance first, insertion index second.
fn precedes(a: (f64, usize), b: (f64, usize)) -> bool {
    a.0 < b.0 || (a.0 == b.0 && a.1 < b.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(points: &[Point3<f64>], query: &Point3<f64>) -> Neighbor {
        let mut best = Neighbor {
            index: usize::MAX,
            distance: f64::INFINITY,
        };
        let mut best_sq = f64::INFINITY;
        for (i, p) in points.iter().enumerate() {
            let d = (p - query).norm_squared();
            if d < best_sq {
                best_sq = d;
                best = Neighbor {
                    index: i,
                    distance: d.sqrt(),
                };
            }
        }
        best
    }

    #[test]
    fn test_rejects_zero_bucket() {
        let err = SpatialIndex::build(&[Point3::origin()], 0).unwrap_err();
        assert!(matches!(err, MeshError::InvalidParameter { name: "bucket_size", .. }));
    }

    #[test]
    fn test_rejects_empty_points() {
        let err = build_index(&[]).unwrap_err();
        assert!(matches!(err, MeshError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Point3<f64>> = (0..2000)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-5.0..5.0),
                )
            })
            .collect();

        for bucket_size in [1, 4, 16, 64] {
            let index = SpatialIndex::build(&points, bucket_size).unwrap();
            for _ in 0..200 {
                let q = Point3::new(
                    rng.gen_range(-60.0..60.0),
                    rng.gen_range(-60.0..60.0),
                    rng.gen_range(-10.0..10.0),
                );
                let expected = brute_force(&points, &q);
                let got = index.nearest(&q);
                assert_eq!(got.index, expected.index);
                assert_relative_eq!(got.distance, expected.distance);
            }
        }
    }

    #[test]
    fn test_ties_resolve_to_first_inserted() {
        // Duplicates and symmetric points straddle every split plane
        let mut points = Vec::new();
        for _ in 0..3 {
            for x in [-1.0, 1.0] {
                for y in [-1.0, 1.0] {
                    for z in [-1.0, 1.0] {
                        points.push(Point3::new(x, y, z));
                    }
                }
            }
        }
        for bucket_size in [1, 2, 3, 16] {
            let index = SpatialIndex::build(&points, bucket_size).unwrap();
            let hit = index.nearest(&Point3::origin());
            assert_eq!(hit.index, 0, "bucket_size = {}", bucket_size);
            let hit = index.nearest(&Point3::new(1.0, 1.0, 1.0));
            assert_eq!(hit.index, 7);
            assert_eq!(hit.distance, 0.0);
        }
    }

    #[test]
    fn test_all_identical_points() {
        let points = vec![Point3::new(3.0, 3.0, 3.0); 100];
        let index = SpatialIndex::build(&points, 4).unwrap();
        let hit = index.nearest(&Point3::origin());
        assert_eq!(hit.index, 0);
        assert_relative_eq!(hit.distance, 27.0_f64.sqrt());
    }

    #[test]
    fn test_nearest_k_matches_sorted_scan() {
        let mut rng = StdRng::seed_from_u64(11);
        let points: Vec<Point3<f64>> = (0..500)
            .map(|_| {
                Point3::new(
                    rng.gen_range(-10.0..10.0),
                    rng.gen_range(-10.0..10.0),
                    0.0,
                )
            })
            .collect();
        let index = SpatialIndex::build(&points, 8).unwrap();
        for _ in 0..50 {
            let q = Point3::new(rng.gen_range(-12.0..12.0), rng.gen_range(-12.0..12.0), 1.0);
            let mut expected: Vec<(f64, usize)> = points
                .iter()
                .enumerate()
                .map(|(i, p)| ((p - q).norm_squared(), i))
                .collect();
            expected.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let got = index.nearest_k(&q, 10);
            assert_eq!(got.len(), 10);
            for (hit, (d, i)) in got.iter().zip(&expected) {
                assert_eq!(hit.index, *i);
                assert_relative_eq!(hit.distance, d.sqrt());
            }
        }
    }

    #[test]
    fn test_nearest_k_short_input() {
        let points = vec![Point3::new(1.0, 0.0, 0.0); 3];
        let index = SpatialIndex::build(&points, 2).unwrap();
        let hits = index.nearest_k(&Point3::origin(), 10);
        let indices: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(index.nearest_k(&Point3::origin(), 0).is_empty());
    }
}
