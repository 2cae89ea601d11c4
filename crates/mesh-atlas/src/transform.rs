//! Spatial transforms produced by registration.
//!
//! Every transform maps a template-space point to target space. Transforms
//! are plain data: they serialize to JSON and can be applied to any mesh
//! later with [`apply_transform_to_mesh`].

use nalgebra::{DVector, Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use mesh_core::{Mesh, Vertex};
use mesh_volume::GridGeometry;

use crate::error::{AtlasError, AtlasResult};

/// A point mapping between template and target space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transform {
    Identity,
    Rigid(RigidTransform),
    Affine(AffineTransform),
    BSpline(BSplineTransform),
    DisplacementField(DisplacementFieldTransform),
}

impl Transform {
    /// Map a point.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        match self {
            Transform::Identity => *p,
            Transform::Rigid(t) => t.transform_point(p),
            Transform::Affine(t) => t.transform_point(p),
            Transform::BSpline(t) => t.transform_point(p),
            Transform::DisplacementField(t) => t.transform_point(p),
        }
    }

    /// Short name of the transform family.
    pub fn kind(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Rigid(_) => "rigid",
            Transform::Affine(_) => "affine",
            Transform::BSpline(_) => "bspline",
            Transform::DisplacementField(_) => "displacement_field",
        }
    }

    /// Number of free parameters.
    pub fn parameter_count(&self) -> usize {
        match self {
            Transform::Identity => 0,
            Transform::Rigid(_) => 7,
            Transform::Affine(_) => AffineTransform::PARAMETER_COUNT,
            Transform::BSpline(t) => t.coefficients.len(),
            Transform::DisplacementField(t) => 3 * t.displacements.len(),
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> AtlasResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| AtlasError::TransformParse {
            details: e.to_string(),
        })
    }

    /// Parse a transform written by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> AtlasResult<Self> {
        let transform: Transform =
            serde_json::from_str(json).map_err(|e| AtlasError::TransformParse {
                details: e.to_string(),
            })?;
        transform.validate()?;
        Ok(transform)
    }

    fn validate(&self) -> AtlasResult<()> {
        let bad = |details: String| Err(AtlasError::TransformParse { details });
        match self {
            Transform::BSpline(t) if t.mesh_size.contains(&0) => bad(format!(
                "bspline mesh size {:?} needs at least one cell per axis",
                t.mesh_size
            )),
            Transform::BSpline(t) if t.coefficients.len() != 3 * t.control_point_count() => bad(
                format!(
                    "bspline with mesh size {:?} needs {} coefficients, found {}",
                    t.mesh_size,
                    3 * t.control_point_count(),
                    t.coefficients.len()
                ),
            ),
            Transform::DisplacementField(t) if t.displacements.len() != t.geometry.voxel_count() => {
                bad(format!(
                    "displacement field on grid {:?} needs {} vectors, found {}",
                    t.geometry.size,
                    t.geometry.voxel_count(),
                    t.displacements.len()
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Similarity transform `y = s R x + t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }
}

impl RigidTransform {
    pub fn from_rotation_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_matrix(rotation),
            translation,
            scale: 1.0,
        }
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * p.coords * self.scale + self.translation)
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: next.rotation * self.rotation,
            translation: next.rotation * self.translation * next.scale + next.translation,
            scale: self.scale * next.scale,
        }
    }

    pub fn inverse(&self) -> RigidTransform {
        let rotation = self.rotation.inverse();
        RigidTransform {
            rotation,
            translation: -(rotation * self.translation) / self.scale,
            scale: 1.0 / self.scale,
        }
    }

    /// Homogeneous 4x4 matrix.
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.rotation.to_rotation_matrix().matrix() * self.scale));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}

/// Affine transform about a fixed center: `y = M (x - c) + c + t`.
///
/// Parameters are the nine entries of `M` in row-major order followed by `t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub matrix: Matrix3<f64>,
    pub center: Point3<f64>,
    pub translation: Vector3<f64>,
}

impl AffineTransform {
    pub const PARAMETER_COUNT: usize = 12;

    /// Identity transform rotating about `center`.
    pub fn identity(center: Point3<f64>) -> Self {
        Self {
            matrix: Matrix3::identity(),
            center,
            translation: Vector3::zeros(),
        }
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        self.center + self.matrix * (p - self.center) + self.translation
    }

    pub fn parameters(&self) -> DVector<f64> {
        let mut params = DVector::zeros(Self::PARAMETER_COUNT);
        for row in 0..3 {
            for col in 0..3 {
                params[row * 3 + col] = self.matrix[(row, col)];
            }
        }
        params.rows_mut(9, 3).copy_from(&self.translation);
        params
    }

    /// Overwrite the matrix and translation from a 12-vector.
    pub fn set_parameters(&mut self, params: &DVector<f64>) {
        for row in 0..3 {
            for col in 0..3 {
                self.matrix[(row, col)] = params[row * 3 + col];
            }
        }
        self.translation = Vector3::new(params[9], params[10], params[11]);
    }

    /// Accumulate `g^T * dy/dparams` for one point into `out`.
    ///
    /// `g` is a gradient with respect to the transformed point.
    pub fn accumulate_gradient(&self, p: &Point3<f64>, g: &Vector3<f64>, out: &mut DVector<f64>) {
        let local = p - self.center;
        for row in 0..3 {
            for col in 0..3 {
                out[row * 3 + col] += g[row] * local[col];
            }
            out[9 + row] += g[row];
        }
    }
}

/// Cubic B-spline free-form deformation over a rectangular physical domain.
///
/// The domain starts at `origin`, spans `physical_dimensions` along the
/// columns of `direction`, and is cut into `mesh_size` cells per axis. There
/// are `mesh_size + 3` control points per axis, the first one cell before the
/// domain origin. Coefficients are physical displacements stored component
/// major: all x components, then all y, then all z. Points outside the
/// domain are not moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BSplineTransform {
    pub origin: Point3<f64>,
    pub physical_dimensions: Vector3<f64>,
    pub direction: Matrix3<f64>,
    pub mesh_size: [usize; 3],
    pub coefficients: DVector<f64>,
}

impl BSplineTransform {
    /// Zero deformation over the physical domain of `grid`.
    pub fn over_grid(grid: &GridGeometry, mesh_size: usize) -> Self {
        let mesh_size = [mesh_size.max(1); 3];
        let control = mesh_size.iter().map(|m| m + 3).product::<usize>();
        Self {
            origin: grid.origin,
            physical_dimensions: grid.physical_extent(),
            direction: grid.direction,
            mesh_size,
            coefficients: DVector::zeros(3 * control),
        }
    }

    pub fn control_points_per_axis(&self) -> [usize; 3] {
        self.mesh_size.map(|m| m + 3)
    }

    pub fn control_point_count(&self) -> usize {
        self.control_points_per_axis().iter().product()
    }

    /// Control point linear indices and basis weights around `p`.
    ///
    /// Empty when `p` is outside the domain.
    pub fn support(&self, p: &Point3<f64>) -> Vec<(usize, f64)> {
        const EDGE_TOLERANCE: f64 = 1e-9;

        let local = self.direction.transpose() * (p - self.origin);
        let per_axis = self.control_points_per_axis();
        let mut start = [0usize; 3];
        let mut weights = [[0.0f64; 4]; 3];
        for axis in 0..3 {
            let extent = self.physical_dimensions[axis];
            let m = self.mesh_size[axis];
            let x = local[axis];
            if !x.is_finite() || x < -EDGE_TOLERANCE || x > extent + EDGE_TOLERANCE {
                return Vec::new();
            }
            // Cell coordinate in [0, m]
            let u = if extent > 0.0 {
                (x / extent * m as f64).clamp(0.0, m as f64)
            } else {
                0.0
            };
            let cell = (u.floor() as usize).min(m - 1);
            start[axis] = cell;
            weights[axis] = cubic_bspline_weights(u - cell as f64);
        }

        let mut support = Vec::with_capacity(64);
        for c in 0..4 {
            for b in 0..4 {
                for a in 0..4 {
                    let weight = weights[0][a] * weights[1][b] * weights[2][c];
                    let index = (start[0] + a)
                        + per_axis[0] * ((start[1] + b) + per_axis[1] * (start[2] + c));
                    support.push((index, weight));
                }
            }
        }
        support
    }

    pub fn displacement(&self, p: &Point3<f64>) -> Vector3<f64> {
        let n = self.control_point_count();
        self.support(p)
            .into_iter()
            .fold(Vector3::zeros(), |acc, (index, weight)| {
                acc + Vector3::new(
                    self.coefficients[index],
                    self.coefficients[n + index],
                    self.coefficients[2 * n + index],
                ) * weight
            })
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        p + self.displacement(p)
    }
}

/// Uniform cubic B-spline basis at offset `t` in [0, 1].
fn cubic_bspline_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let s = 1.0 - t;
    [
        s * s * s / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// Dense per-voxel displacement, trilinearly interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementFieldTransform {
    pub geometry: GridGeometry,
    pub displacements: Vec<Vector3<f64>>,
}

impl DisplacementFieldTransform {
    /// Zero displacement on `geometry`.
    pub fn zeros(geometry: GridGeometry) -> Self {
        let n = geometry.voxel_count();
        Self {
            geometry,
            displacements: vec![Vector3::zeros(); n],
        }
    }

    /// Interpolated displacement, zero outside the grid.
    pub fn displacement(&self, p: &Point3<f64>) -> Vector3<f64> {
        match self.geometry.trilinear_stencil(p) {
            Some(stencil) => stencil
                .iter()
                .fold(Vector3::zeros(), |acc, &(idx, w)| acc + self.displacements[idx] * w),
            None => Vector3::zeros(),
        }
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        p + self.displacement(p)
    }

    /// Largest displacement magnitude.
    pub fn max_magnitude(&self) -> f64 {
        self.displacements
            .iter()
            .map(|d| d.norm())
            .fold(0.0, f64::max)
    }
}

/// Apply `transform` to every vertex. Faces are copied unchanged.
pub fn apply_transform_to_mesh(mesh: &Mesh, transform: &Transform) -> Mesh {
    let vertices = mesh
        .vertices
        .par_iter()
        .map(|v| Vertex::new(transform.transform_point(&v.position)))
        .collect();
    Mesh {
        vertices,
        faces: mesh.faces.clone(),
    }
}
