//! Surface extraction from volumetric fields using Surface Nets.

use rayon::prelude::*;
use tracing::{debug, info};

use mesh_core::{Mesh, Vertex};

use crate::error::{VolumeError, VolumeResult};
use crate::field::VolumetricField;

/// Extract the `level` isosurface of a field as a triangle mesh.
///
/// Values below `level` are inside. Vertices are returned in physical space.
///
/// # Errors
///
/// `InvalidGeometry` when the field never crosses `level`.
pub fn extract_isosurface(field: &VolumetricField, level: f32) -> VolumeResult<Mesh> {
    use fast_surface_nets::{SurfaceNetsBuffer, ndshape::RuntimeShape, surface_nets};

    let dims = field.size();
    info!(dims = ?dims, level, "Extracting isosurface");

    // Pad by one voxel of "outside" so surfaces touching the border close
    let padded_dims = [dims[0] + 2, dims[1] + 2, dims[2] + 2];
    let mut padded = vec![1000.0f32; padded_dims[0] * padded_dims[1] * padded_dims[2]];
    for z in 0..dims[2] {
        for y in 0..dims[1] {
            for x in 0..dims[0] {
                let src = field.geometry.linear_index(x, y, z);
                let dst = (x + 1) + (y + 1) * padded_dims[0] + (z + 1) * padded_dims[0] * padded_dims[1];
                padded[dst] = field.values[src] - level;
            }
        }
    }

    let shape = RuntimeShape::<u32, 3>::new([
        padded_dims[0] as u32,
        padded_dims[1] as u32,
        padded_dims[2] as u32,
    ]);
    let mut buffer = SurfaceNetsBuffer::default();
    surface_nets(
        &padded,
        &shape,
        [0, 0, 0],
        [
            padded_dims[0] as u32 - 1,
            padded_dims[1] as u32 - 1,
            padded_dims[2] as u32 - 1,
        ],
        &mut buffer,
    );

    if buffer.positions.is_empty() || buffer.indices.is_empty() {
        return Err(VolumeError::invalid_geometry(format!(
            "field has no crossing of level {}",
            level
        )));
    }
    debug!(
        positions = buffer.positions.len(),
        indices = buffer.indices.len(),
        "Surface nets complete"
    );

    let mut mesh = Mesh::with_capacity(buffer.positions.len(), buffer.indices.len() / 3);
    for pos in &buffer.positions {
        let index = nalgebra::Vector3::new(
            (pos[0] - 1.0) as f64,
            (pos[1] - 1.0) as f64,
            (pos[2] - 1.0) as f64,
        );
        mesh.vertices.push(Vertex::new(
            field.geometry.continuous_index_to_physical(&index),
        ));
    }
    for chunk in buffer.indices.chunks_exact(3) {
        mesh.faces.push([chunk[0], chunk[1], chunk[2]]);
    }

    info!(
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "Isosurface mesh created"
    );
    Ok(mesh)
}

/// Mesh the voxels equal to `object_value` in a label or binary volume.
pub fn binary_volume_to_mesh(field: &VolumetricField, object_value: f32) -> VolumeResult<Mesh> {
    // Object voxels become -1, everything else +1, and the surface sits halfway
    let indicator = VolumetricField {
        geometry: field.geometry.clone(),
        values: field
            .values
            .iter()
            .map(|&v| if v == object_value { -1.0 } else { 1.0 })
            .collect(),
    };
    extract_isosurface(&indicator, 0.0)
}

/// Batch form of [`binary_volume_to_mesh`].
pub fn binary_volumes_to_meshes(
    fields: &[VolumetricField],
    object_value: f32,
) -> VolumeResult<Vec<Mesh>> {
    fields
        .par_iter()
        .map(|field| binary_volume_to_mesh(field, object_value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::GridGeometry;
    use nalgebra::{Point3, Vector3};

    fn ball(radius: f64) -> VolumetricField {
        let geometry = GridGeometry::new(Point3::new(-5.0, -5.0, -5.0), Vector3::repeat(0.5), [21, 21, 21]);
        let mut field = VolumetricField::filled(geometry.clone(), 0.0);
        for idx in 0..geometry.voxel_count() {
            let p = geometry.index_to_physical(geometry.delinearize(idx));
            field.values[idx] = (p.coords.norm() - radius) as f32;
        }
        field
    }

    #[test]
    fn test_sphere_isosurface_radius() {
        let field = ball(3.0);
        let mesh = extract_isosurface(&field, 0.0).unwrap();
        assert!(!mesh.faces.is_empty());
        mesh.validate_indices().unwrap();
        for v in &mesh.vertices {
            let r = v.position.coords.norm();
            assert!((r - 3.0).abs() < 0.5, "vertex at radius {r}");
        }
    }

    #[test]
    fn test_no_crossing_is_invalid() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [4, 4, 4]);
        let field = VolumetricField::filled(geometry, 5.0);
        let err = extract_isosurface(&field, 0.0).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_binary_volume_to_mesh_bounds() {
        let geometry = GridGeometry::new(Point3::new(10.0, 0.0, 0.0), Vector3::repeat(1.0), [8, 8, 8]);
        let mut field = VolumetricField::filled(geometry, 0.0);
        for k in 2..6 {
            for j in 2..6 {
                for i in 2..6 {
                    field.set([i, j, k], 1.0);
                }
            }
        }
        let mesh = binary_volume_to_mesh(&field, 1.0).unwrap();
        let (min, max) = mesh.bounds().unwrap();
        assert!(min.x >= 11.0 && max.x <= 16.0);
        assert!(min.y >= 1.0 && max.y <= 6.0);
    }

    #[test]
    fn test_batch_propagates_failure() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [3, 3, 3]);
        let empty = VolumetricField::filled(geometry, 0.0);
        assert!(binary_volumes_to_meshes(&[empty], 1.0).is_err());
    }
}
