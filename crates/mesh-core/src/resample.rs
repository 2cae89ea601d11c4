//! Correspondence resampling: snap template vertices onto a target surface.
//!
//! Every template vertex is replaced by the target vertex nearest to its
//! current position. The template's faces are carried over unchanged, so a
//! population resampled from one template stays in correspondence.

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::spatial::{SpatialIndex, build_index};
use crate::tracing_ext::OperationTimer;
use crate::Mesh;

/// Resample `template` onto the vertices of `target`.
///
/// Builds a fresh index over the target. The input template is not modified.
///
/// # Errors
///
/// `InvalidGeometry` if the target has no vertices.
pub fn resample_onto_target(template: &Mesh, target: &Mesh) -> MeshResult<Mesh> {
    if target.vertices.is_empty() {
        return Err(MeshError::invalid_geometry(
            "resampling target has no vertices",
        ));
    }
    let _timer = OperationTimer::for_mesh("resample_onto_target", template);
    let index = build_index(&target.positions())?;
    resample_onto_index(template, &index)
}

/// Resample `template` using a prebuilt index over the target vertices.
pub fn resample_onto_index(template: &Mesh, index: &SpatialIndex) -> MeshResult<Mesh> {
    let positions: Vec<Point3<f64>> = nearest_target_indices(template, index)
        .into_iter()
        .map(|i| index.point(i).copied())
        .collect::<Option<_>>()
        .ok_or_else(|| MeshError::invalid_geometry("index returned an out-of-range point"))?;

    debug!(
        vertices = positions.len(),
        target_points = index.len(),
        "Resampled template onto target"
    );
    template.with_positions(positions)
}

/// For each template vertex, the insertion index of its nearest target point.
pub fn nearest_target_indices(template: &Mesh, index: &SpatialIndex) -> Vec<usize> {
    template
        .vertices
        .par_iter()
        .map(|v| index.nearest(&v.position).index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives;

    #[test]
    fn test_preserves_topology_and_cardinality() {
        let template = primitives::uv_sphere(10.0, 10, 16);
        let target = primitives::torus(9.0, 2.5, 30, 12);

        let resampled = resample_onto_target(&template, &target).unwrap();
        assert_eq!(resampled.vertex_count(), template.vertex_count());
        assert_eq!(resampled.faces, template.faces);
    }

    #[test]
    fn test_outputs_are_target_vertices() {
        let template = primitives::uv_sphere(10.0, 10, 16);
        let target = primitives::torus(9.0, 2.5, 30, 12);

        let resampled = resample_onto_target(&template, &target).unwrap();
        for v in &resampled.vertices {
            assert!(target.vertices.iter().any(|t| t.position == v.position));
        }
    }

    #[test]
    fn test_input_not_mutated() {
        let template = primitives::cuboid(2.0);
        let before = template.clone();
        let target = primitives::uv_sphere(5.0, 6, 8);
        let _ = resample_onto_target(&template, &target).unwrap();
        assert_eq!(template, before);
    }

    #[test]
    fn test_idempotent() {
        let template = primitives::uv_sphere(10.0, 12, 18);
        let target = primitives::torus(9.0, 2.5, 24, 10);

        let once = resample_onto_target(&template, &target).unwrap();
        let twice = resample_onto_target(&once, &target).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_target_is_rejected() {
        let template = primitives::cuboid(1.0);
        let err = resample_onto_target(&template, &Mesh::new()).unwrap_err();
        assert!(matches!(err, MeshError::InvalidGeometry { .. }));
    }
}
