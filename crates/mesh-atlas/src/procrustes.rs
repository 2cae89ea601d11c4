//! Generalized Procrustes alignment of meshes in correspondence.
//!
//! Every shape is centered, then rotated onto a running mean until the mean
//! stops moving. There is no scaling and no normalization; the first shape
//! seeds the mean. The final mean is moved back to the average centroid of
//! the inputs.

use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use mesh_core::tracing_ext::OperationTimer;
use mesh_core::{Mesh, MeshError};

use crate::error::{AtlasError, AtlasResult};
use crate::transform::RigidTransform;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcrustesParams {
    pub max_iterations: usize,
    /// Stop once the mean moves less than this per point, on average.
    pub convergence_threshold: f64,
}

impl Default for ProcrustesParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 0.1,
        }
    }
}

impl ProcrustesParams {
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }
}

/// Outcome of [`generalized_procrustes`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcrustesAlignment {
    /// Mean shape, placed at the average input centroid.
    pub mean: Vec<Point3<f64>>,
    /// Each input after its rigid alignment.
    pub aligned: Vec<Vec<Point3<f64>>>,
    /// Transform taking each input onto its aligned placement.
    pub rotations: Vec<RigidTransform>,
    pub iterations: usize,
    /// Average per-point movement of the mean in the last iteration.
    pub mean_points_difference: f64,
    pub converged: bool,
}

/// Procrustes mean of meshes in correspondence. Faces come from the first mesh.
///
/// # Errors
///
/// `InvalidParameter` for an empty list, `CorrespondenceMismatch` when the
/// vertex counts differ and `InvalidGeometry` when the meshes have no vertices.
pub fn mean_shape(meshes: &[Mesh], convergence_threshold: f64) -> AtlasResult<Mesh> {
    let first = meshes.first().ok_or_else(|| {
        AtlasError::invalid_parameter("meshes", "at least one mesh is needed for a mean shape")
    })?;
    let _timer = OperationTimer::for_mesh("mean_shape", first);
    let point_sets: Vec<Vec<Point3<f64>>> = meshes.iter().map(Mesh::positions).collect();
    let params = ProcrustesParams::default().with_convergence_threshold(convergence_threshold);
    let alignment = generalized_procrustes(&point_sets, &params)?;

    info!(
        meshes = meshes.len(),
        iterations = alignment.iterations,
        difference = alignment.mean_points_difference,
        "Procrustes alignment finished"
    );
    Ok(first.with_positions(alignment.mean)?)
}

pub fn generalized_procrustes(
    point_sets: &[Vec<Point3<f64>>],
    params: &ProcrustesParams,
) -> AtlasResult<ProcrustesAlignment> {
    let Some(first) = point_sets.first() else {
        return Err(AtlasError::invalid_parameter(
            "point_sets",
            "at least one shape is needed",
        ));
    };
    if first.is_empty() {
        return Err(MeshError::invalid_geometry("shapes to align have no points").into());
    }
    for (index, set) in point_sets.iter().enumerate().skip(1) {
        if set.len() != first.len() {
            return Err(AtlasError::correspondence_mismatch(first.len(), set.len(), index));
        }
    }

    if point_sets.len() == 1 {
        // A lone shape is its own mean
        return Ok(ProcrustesAlignment {
            mean: first.clone(),
            aligned: vec![first.clone()],
            rotations: vec![RigidTransform::default()],
            iterations: 0,
            mean_points_difference: 0.0,
            converged: true,
        });
    }

    let centroids: Vec<Vector3<f64>> = point_sets.iter().map(|s| centroid(s)).collect();
    let centered: Vec<Vec<Vector3<f64>>> = point_sets
        .iter()
        .zip(&centroids)
        .map(|(set, c)| set.iter().map(|p| p.coords - c).collect())
        .collect();
    let average_centroid =
        centroids.iter().fold(Vector3::zeros(), |acc, c| acc + c) / centroids.len() as f64;

    let mut mean = centered[0].clone();
    let mut rotations = vec![Matrix3::identity(); centered.len()];
    let mut difference = f64::INFINITY;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iterations {
        rotations = centered
            .par_iter()
            .map(|shape| kabsch(shape, &mean))
            .collect::<AtlasResult<_>>()?;

        let mut next = vec![Vector3::zeros(); mean.len()];
        for (shape, rotation) in centered.iter().zip(&rotations) {
            for (acc, v) in next.iter_mut().zip(shape) {
                *acc += rotation * v;
            }
        }
        let scale = 1.0 / centered.len() as f64;
        next.iter_mut().for_each(|v| *v *= scale);

        difference = mean
            .iter()
            .zip(&next)
            .map(|(a, b)| (a - b).norm())
            .sum::<f64>()
            / mean.len() as f64;
        mean = next;
        iterations += 1;
        debug!(
            target: "mesh_atlas::procrustes",
            iteration = iterations,
            difference,
            "Procrustes iteration"
        );
        if difference < params.convergence_threshold {
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(
            iterations,
            difference, "Procrustes alignment stopped before converging"
        );
    }

    let aligned = centered
        .iter()
        .zip(&rotations)
        .map(|(shape, r)| {
            shape
                .iter()
                .map(|v| Point3::from(r * v + average_centroid))
                .collect()
        })
        .collect();
    let rotations = rotations
        .iter()
        .zip(&centroids)
        .map(|(r, c)| RigidTransform::from_rotation_matrix(r, average_centroid - r * c))
        .collect();

    Ok(ProcrustesAlignment {
        mean: mean
            .into_iter()
            .map(|v| Point3::from(v + average_centroid))
            .collect(),
        aligned,
        rotations,
        iterations,
        mean_points_difference: difference,
        converged,
    })
}

fn centroid(points: &[Point3<f64>]) -> Vector3<f64> {
    points.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / points.len() as f64
}

/// Proper rotation `R` minimizing `sum |R source_i - target_i|^2` for
/// centered point lists.
pub(crate) fn kabsch(source: &[Vector3<f64>], target: &[Vector3<f64>]) -> AtlasResult<Matrix3<f64>> {
    let covariance = source
        .iter()
        .zip(target)
        .fold(Matrix3::zeros(), |acc, (s, t)| acc + s * t.transpose());
    let svd = covariance.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(MeshError::invalid_geometry("rotation fit failed to decompose").into());
    };
    let v = v_t.transpose();
    let mut correction = Matrix3::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        correction[(2, 2)] = -1.0;
    }
    Ok(v * correction * u.transpose())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_core::primitives;
    use nalgebra::Rotation3;

    fn rotated(mesh: &Mesh, angle: f64, offset: Vector3<f64>) -> Mesh {
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), angle);
        let positions = mesh
            .vertices
            .iter()
            .map(|v| rotation * v.position + offset)
            .collect();
        mesh.with_positions(positions).unwrap()
    }

    fn asymmetric() -> Mesh {
        let mut mesh = primitives::cuboid(4.0);
        for v in &mut mesh.vertices {
            v.position.x *= 2.0;
            v.position.y *= 0.5;
        }
        mesh.vertices[0].position.z += 1.0;
        mesh
    }

    #[test]
    fn test_kabsch_recovers_rotation() {
        let rotation = Rotation3::from_euler_angles(0.3, -0.2, 1.1);
        let source: Vec<Vector3<f64>> = vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 0.0, 3.0),
            Vector3::new(-1.0, -2.0, -3.0),
        ];
        let target: Vec<Vector3<f64>> = source.iter().map(|v| rotation * v).collect();
        let fitted = kabsch(&source, &target).unwrap();
        assert_relative_eq!(fitted, *rotation.matrix(), epsilon = 1e-9);
    }

    #[test]
    fn test_kabsch_never_reflects() {
        let source: Vec<Vector3<f64>> = vec![
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 0.0, 3.0),
            Vector3::new(-1.0, -2.0, -3.0),
        ];
        let mirrored: Vec<Vector3<f64>> = source.iter().map(|v| Vector3::new(-v.x, v.y, v.z)).collect();
        let fitted = kabsch(&source, &mirrored).unwrap();
        assert_relative_eq!(fitted.determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_shapes_converge_immediately() {
        let mesh = asymmetric();
        let mean = mean_shape(&[mesh.clone(), mesh.clone(), mesh.clone()], 0.1).unwrap();
        assert_eq!(mean.faces, mesh.faces);
        for (a, b) in mean.vertices.iter().zip(&mesh.vertices) {
            assert_relative_eq!(a.position, b.position, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_rigid_copies_share_the_first_shape() {
        let mesh = asymmetric();
        let offset = Vector3::new(10.0, -4.0, 2.0);
        let copy = rotated(&mesh, 0.5, offset);
        let sets = vec![mesh.positions(), copy.positions()];
        let alignment = generalized_procrustes(&sets, &ProcrustesParams::default()).unwrap();

        assert!(alignment.converged);
        assert_eq!(alignment.iterations, 1);
        let average = (centroid(&sets[0]) + centroid(&sets[1])) / 2.0;
        assert_relative_eq!(centroid(&alignment.mean), average, epsilon = 1e-9);
        // Rigid copies leave the mean congruent to the input
        for i in 1..sets[0].len() {
            let original = (sets[0][i] - sets[0][0]).norm();
            let averaged = (alignment.mean[i] - alignment.mean[0]).norm();
            assert_relative_eq!(original, averaged, epsilon = 1e-9);
        }
        for (set, transform) in sets.iter().zip(&alignment.rotations) {
            for (p, m) in set.iter().zip(&alignment.mean) {
                assert_relative_eq!(transform.transform_point(p), *m, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_mean_of_perturbed_shapes() {
        let mut mesh = primitives::cuboid(4.0);
        for v in &mut mesh.vertices {
            v.position.x *= 2.0;
            v.position.y *= 0.5;
        }
        let mut bumped = mesh.clone();
        for v in &mut bumped.vertices {
            v.position.z *= 1.5;
        }
        let mean = mean_shape(&[mesh.clone(), bumped.clone()], 1e-9).unwrap();
        // Same orientation already, so the mean is the coordinate average
        for ((m, a), b) in mean.vertices.iter().zip(&mesh.vertices).zip(&bumped.vertices) {
            let expected = (a.position.coords + b.position.coords) / 2.0;
            assert_relative_eq!(m.position.coords, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_single_shape_is_returned_unchanged() {
        let mesh = asymmetric();
        let mean = mean_shape(std::slice::from_ref(&mesh), 0.1).unwrap();
        assert_eq!(mean, mesh);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let err = mean_shape(&[], 0.1).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidParameter { .. }));

        let err = mean_shape(&[primitives::cuboid(1.0), primitives::uv_sphere(1.0, 4, 4)], 0.1)
            .unwrap_err();
        assert!(matches!(
            err,
            AtlasError::Mesh(MeshError::CorrespondenceMismatch { mesh_index: 1, .. })
        ));

        let err = mean_shape(&[Mesh::new()], 0.1).unwrap_err();
        assert!(matches!(err, AtlasError::Mesh(MeshError::InvalidGeometry { .. })));
    }
}
