//! Distances between meshes.
//!
//! Two measures are provided and they are not interchangeable:
//!
//! - [`max_vertex_displacement`] compares vertex `i` with vertex `i`. It is
//!   only meaningful for meshes in correspondence and is the convergence
//!   measure of atlas refinement (often loosely called a pairwise Hausdorff
//!   distance).
//! - [`symmetric_hausdorff_distance`] is the true two-sided Hausdorff distance
//!   between the vertex sets, found with nearest-neighbour search. It ignores
//!   vertex order.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;

use crate::error::{MeshError, MeshResult};
use crate::Mesh;

/// Largest distance between vertices with the same index.
///
/// # Errors
///
/// `CorrespondenceMismatch` when vertex counts differ, `InvalidGeometry` when
/// the meshes have no vertices.
pub fn max_vertex_displacement(first: &Mesh, second: &Mesh) -> MeshResult<f64> {
    if first.vertices.len() != second.vertices.len() {
        return Err(MeshError::correspondence_mismatch(
            first.vertices.len(),
            second.vertices.len(),
            1,
        ));
    }
    if first.vertices.is_empty() {
        return Err(MeshError::invalid_geometry(
            "cannot measure displacement between empty meshes",
        ));
    }

    Ok(first
        .vertices
        .iter()
        .zip(&second.vertices)
        .map(|(a, b)| (a.position - b.position).norm())
        .fold(0.0, f64::max))
}

/// Immutable tree over vertex positions. Unlike the mutable `KdTree` it
/// accepts any number of points sharing a coordinate on one axis.
fn build_kdtree(mesh: &Mesh) -> ImmutableKdTree<f64, 3> {
    let positions: Vec<[f64; 3]> = mesh
        .vertices
        .iter()
        .map(|v| [v.position.x, v.position.y, v.position.z])
        .collect();
    ImmutableKdTree::new_from_slice(&positions)
}

fn directed_hausdorff(from: &Mesh, to: &ImmutableKdTree<f64, 3>) -> f64 {
    from.vertices
        .par_iter()
        .map(|v| {
            let p = v.position;
            to.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z])
                .distance
                .sqrt()
        })
        .reduce(|| 0.0, f64::max)
}

/// Two-sided Hausdorff distance between the vertex sets of two meshes.
pub fn symmetric_hausdorff_distance(first: &Mesh, second: &Mesh) -> MeshResult<f64> {
    if first.vertices.is_empty() || second.vertices.is_empty() {
        return Err(MeshError::invalid_geometry(
            "Hausdorff distance needs two non-empty vertex sets",
        ));
    }
    let first_tree = build_kdtree(first);
    let second_tree = build_kdtree(second);
    Ok(directed_hausdorff(first, &second_tree).max(directed_hausdorff(second, &first_tree)))
}
