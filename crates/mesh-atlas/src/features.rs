//! Flattened vertex coordinates as feature vectors for shape statistics.

use nalgebra::DMatrix;
use tracing::debug;

use mesh_core::Mesh;

use crate::error::{AtlasError, AtlasResult};

/// One row per mesh holding `x, y, z` of every `step`-th vertex.
///
/// The matrix has `ceil(V / step) * 3` columns for meshes of `V` vertices.
///
/// # Errors
///
/// `InvalidParameter` when `step` is zero or `meshes` is empty, and
/// `CorrespondenceMismatch` when vertex counts differ.
pub fn make_point_features(meshes: &[Mesh], step: usize) -> AtlasResult<DMatrix<f64>> {
    if step == 0 {
        return Err(AtlasError::invalid_parameter("step", "step must be at least 1"));
    }
    let Some(first) = meshes.first() else {
        return Err(AtlasError::invalid_parameter(
            "meshes",
            "at least one mesh is needed",
        ));
    };
    let vertex_count = first.vertex_count();
    if let Some((index, mesh)) = meshes
        .iter()
        .enumerate()
        .find(|(_, m)| m.vertex_count() != vertex_count)
    {
        return Err(AtlasError::correspondence_mismatch(
            vertex_count,
            mesh.vertex_count(),
            index,
        ));
    }

    let kept = vertex_count.div_ceil(step);
    let features = DMatrix::from_fn(meshes.len(), kept * 3, |row, col| {
        meshes[row].vertices[(col / 3) * step].position[col % 3]
    });
    debug!(
        meshes = meshes.len(),
        columns = features.ncols(),
        "Built point features"
    );
    Ok(features)
}
