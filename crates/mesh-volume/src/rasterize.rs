//! Mesh to signed distance field rasterization.
//!
//! Meshes rasterized together share one grid derived from their union
//! bounding box. Passing a reference field reuses its grid exactly, so fields
//! built in separate calls can still be compared voxel by voxel.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mesh_core::Mesh;
use mesh_core::tracing_ext::OperationTimer;

use crate::distance::signed_distance_transform;
use crate::error::{VolumeError, VolumeResult};
use crate::field::{GridGeometry, VolumetricField};

/// Grid selection for [`rasterize`] when no reference field is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterizeParams {
    /// Voxels per axis.
    pub resolution: usize,
    /// Voxels not used to span the bounding box; spacing is
    /// `extent / (resolution - buffer)`.
    pub buffer: usize,
    /// Voxels of padding in front of the bounding box minimum.
    pub margin: usize,
}

impl Default for RasterizeParams {
    fn default() -> Self {
        Self {
            resolution: 100,
            buffer: 10,
            margin: 5,
        }
    }
}

impl RasterizeParams {
    /// Set voxels per axis.
    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the spanning buffer.
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the leading margin.
    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    /// Check that the grid keeps room for the margin inside the buffer.
    pub fn validate(&self) -> VolumeResult<()> {
        if self.resolution <= self.buffer {
            return Err(VolumeError::invalid_parameter(
                "resolution",
                format!(
                    "resolution ({}) must exceed buffer ({})",
                    self.resolution, self.buffer
                ),
            ));
        }
        if self.margin >= self.buffer {
            return Err(VolumeError::invalid_parameter(
                "margin",
                format!(
                    "margin ({}) must be smaller than buffer ({}) for the grid to contain the meshes",
                    self.margin, self.buffer
                ),
            ));
        }
        Ok(())
    }
}

fn check_meshes(meshes: &[Mesh]) -> VolumeResult<()> {
    for (i, mesh) in meshes.iter().enumerate() {
        if mesh.vertices.is_empty() {
            return Err(VolumeError::invalid_geometry(format!(
                "mesh #{} has no vertices and cannot be rasterized",
                i
            )));
        }
    }
    Ok(())
}

/// Grid spanning the union bounding box of `meshes`.
///
/// Axes with zero extent borrow the spacing of the widest axis.
///
/// # Errors
///
/// `InvalidGeometry` when a mesh is empty or all meshes collapse to a point.
pub fn grid_for_meshes(meshes: &[Mesh], params: &RasterizeParams) -> VolumeResult<GridGeometry> {
    params.validate()?;
    check_meshes(meshes)?;

    let bounds = meshes
        .iter()
        .filter_map(|m| m.aabb())
        .reduce(|a, b| a.union(&b))
        .ok_or_else(|| VolumeError::invalid_geometry("no meshes to rasterize"))?;

    let extent = bounds.extent();
    let span = (params.resolution - params.buffer) as f64;
    let widest = extent.max();
    if widest <= 0.0 || !widest.is_finite() {
        return Err(VolumeError::invalid_geometry(
            "meshes have zero extent on every axis",
        ));
    }
    let spacing = extent.map(|e| if e > 0.0 { e / span } else { widest / span });
    let origin: Point3<f64> = bounds.min - spacing * params.margin as f64;

    debug!(
        extent = ?[extent.x, extent.y, extent.z],
        spacing = ?[spacing.x, spacing.y, spacing.z],
        "Derived rasterization grid"
    );

    Ok(GridGeometry::new(origin, spacing, [params.resolution; 3]))
}

/// Rasterize meshes to signed distance fields on a shared grid.
///
/// With `reference`, its origin, spacing, size and direction are copied.
/// Otherwise the grid comes from [`grid_for_meshes`].
///
/// # Errors
///
/// `InvalidGeometry` when any mesh has no vertices, before any field is built.
pub fn rasterize(
    meshes: &[Mesh],
    reference: Option<&VolumetricField>,
    params: &RasterizeParams,
) -> VolumeResult<Vec<VolumetricField>> {
    check_meshes(meshes)?;
    if meshes.is_empty() {
        return Ok(Vec::new());
    }

    let geometry = match reference {
        Some(field) => field.geometry.clone(),
        None => grid_for_meshes(meshes, params)?,
    };

    let _timer = OperationTimer::new("rasterize");
    info!(
        meshes = meshes.len(),
        size = ?geometry.size,
        from_reference = reference.is_some(),
        "Rasterizing meshes"
    );

    meshes
        .iter()
        .map(|mesh| {
            let binary = rasterize_surface_to_binary_volume(mesh, &geometry)?;
            signed_distance_transform(&binary)
        })
        .collect()
}

/// Voxels whose centers lie inside the closed surface are 1.0, others 0.0.
///
/// Vertices are mapped into the grid frame first, so any orthonormal
/// direction matrix is honored.
pub fn rasterize_surface_to_binary_volume(
    mesh: &Mesh,
    geometry: &GridGeometry,
) -> VolumeResult<VolumetricField> {
    use mesh_to_sdf::{Grid, SignMethod, Topology, generate_grid_sdf};

    if mesh.vertices.is_empty() {
        return Err(VolumeError::invalid_geometry(
            "mesh has no vertices and cannot be rasterized",
        ));
    }
    mesh.validate_indices()?;

    let frame = geometry.direction.transpose();
    let vertices: Vec<[f32; 3]> = mesh
        .vertices
        .iter()
        .map(|v| {
            let q = frame * (v.position - geometry.origin);
            [q.x as f32, q.y as f32, q.z as f32]
        })
        .collect();
    let indices: Vec<u32> = mesh.faces.iter().flat_map(|f| f.iter().copied()).collect();

    // Cell centers of the sdf grid must land on voxel centers (index * spacing)
    let half = geometry.spacing / 2.0;
    let size = Vector3::new(
        geometry.size[0] as f64,
        geometry.size[1] as f64,
        geometry.size[2] as f64,
    );
    let max = size.component_mul(&geometry.spacing) - half;
    let grid = Grid::from_bounding_box(
        &[-half.x as f32, -half.y as f32, -half.z as f32],
        &[max.x as f32, max.y as f32, max.z as f32],
        geometry.size,
    );

    let sdf = generate_grid_sdf(
        &vertices,
        Topology::TriangleList(Some(&indices)),
        &grid,
        SignMethod::Raycast,
    );

    let mut field = VolumetricField::filled(geometry.clone(), 0.0);
    let [nx, ny, nz] = geometry.size;
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                if sdf[grid.get_cell_idx(&[i, j, k])] < 0.0 {
                    field.set([i, j, k], 1.0);
                }
            }
        }
    }

    debug!(
        inside = field.count_where(|v| v > 0.0),
        voxels = geometry.voxel_count(),
        "Binary volume rasterized"
    );
    Ok(field)
}
