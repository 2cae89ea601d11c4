//! Diffeomorphic demons on signed distance fields.
//!
//! Each iteration:
//!
//! 1. computes a demons force from the symmetric gradient of the fixed field
//!    and the warped moving field,
//! 2. exponentiates that update field by scaling and squaring,
//! 3. composes the current displacement with the exponential,
//! 4. smooths the displacement with a Gaussian of `standard_deviations` voxels.
//!
//! The displacement field lives on the fixed (template) grid and maps
//! template points into target space.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mesh_core::Mesh;
use mesh_core::tracing_ext::{OperationTimer, log_stage};
use mesh_volume::{GridGeometry, RasterizeParams, VolumetricField};

use super::{Registrar, Registration, RegistrationConfig, check_inputs, rasterize_pair};
use crate::error::{AtlasError, AtlasResult};
use crate::optimize::StopReason;
use crate::transform::{DisplacementFieldTransform, Transform, apply_transform_to_mesh};

/// Differences smaller than this produce no force.
const INTENSITY_DIFFERENCE_THRESHOLD: f64 = 1e-3;
const DENOMINATOR_THRESHOLD: f64 = 1e-9;
/// Largest update per iteration, in voxels.
const MAX_UPDATE_VOXELS: f64 = 0.5;

/// Settings for [`DiffeomorphicRegistrar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffeomorphicConfig {
    pub raster: RasterizeParams,
    pub max_iterations: usize,
    /// Stop once the RMS change of the displacement drops below this.
    pub max_rms_error: f64,
    /// Gaussian smoothing of the displacement field, in voxels.
    pub standard_deviations: f64,
}

impl Default for DiffeomorphicConfig {
    fn default() -> Self {
        Self {
            raster: RasterizeParams::default(),
            max_iterations: 200,
            max_rms_error: 0.0,
            standard_deviations: 1.0,
        }
    }
}

impl DiffeomorphicConfig {
    pub fn with_raster(mut self, raster: RasterizeParams) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_max_rms_error(mut self, max_rms_error: f64) -> Self {
        self.max_rms_error = max_rms_error;
        self
    }

    pub fn with_standard_deviations(mut self, sigma: f64) -> Self {
        self.standard_deviations = sigma;
        self
    }

    fn validate(&self) -> AtlasResult<()> {
        if !(self.standard_deviations >= 0.0) || !self.standard_deviations.is_finite() {
            return Err(AtlasError::registration_input(format!(
                "standard_deviations must be a finite non-negative number, got {}",
                self.standard_deviations
            )));
        }
        self.raster.validate()?;
        Ok(())
    }
}

impl RegistrationConfig for DiffeomorphicConfig {
    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }
}

/// Dense non-rigid registration with diffeomorphic demons.
#[derive(Debug, Clone, Default)]
pub struct DiffeomorphicRegistrar {
    iterations: usize,
    last_rms_change: f64,
}

impl DiffeomorphicRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// RMS change of the displacement in the last iteration of the last run.
    pub fn last_rms_change(&self) -> f64 {
        self.last_rms_change
    }

    fn reset(&mut self) {
        self.iterations = 0;
        self.last_rms_change = 0.0;
    }
}

impl Registrar for DiffeomorphicRegistrar {
    type Config = DiffeomorphicConfig;

    fn name(&self) -> &'static str {
        "diffeomorphic"
    }

    fn register(
        &mut self,
        template: &Mesh,
        target: &Mesh,
        config: &DiffeomorphicConfig,
    ) -> AtlasResult<Registration> {
        check_inputs(template, target)?;
        config.validate()?;
        self.reset();
        let _timer = OperationTimer::for_mesh("diffeomorphic_registration", template);

        let (fixed, moving) = rasterize_pair(template, target, &config.raster)?;
        let geometry = fixed.geometry.clone();
        let fixed_gradient = central_gradient(&fixed.geometry, &field_as_f64(&fixed));
        let normalizer = geometry.spacing.norm_squared() / 3.0;
        let kernel = gaussian_kernel(config.standard_deviations);

        let mut field = DisplacementFieldTransform::zeros(geometry.clone());
        let mut warped = warp(&moving, &field);
        let mut metric = mean_squared_difference(&fixed, &warped)?;

        let stop_reason = loop {
            if self.iterations >= config.max_iterations {
                break StopReason::MaximumIterations;
            }

            let update = demons_update(&fixed, &warped, &fixed_gradient, normalizer);
            let exponential = exponentiate(&geometry, update);
            let mut composed = compose(&field, &exponential);
            if let Some(kernel) = &kernel {
                smooth(&mut composed, geometry.size, kernel);
            }

            let rms_change = rms_difference(&composed, &field.displacements);
            field.displacements = composed;
            self.iterations += 1;
            self.last_rms_change = rms_change;
            warped = warp(&moving, &field);
            metric = mean_squared_difference(&fixed, &warped)?;

            log_stage(
                "diffeomorphic_registration",
                self.iterations,
                config.max_iterations,
                "demons",
            );
            debug!(
                target: "mesh_atlas::registration",
                iteration = self.iterations,
                metric,
                rms_change,
                "Demons iteration"
            );

            if rms_change < config.max_rms_error {
                break StopReason::RmsChangeBelowThreshold;
            }
        };

        let transform = Transform::DisplacementField(field);
        let mesh = apply_transform_to_mesh(template, &transform);

        info!(
            metric,
            iterations = self.iterations,
            stop = %stop_reason,
            "Diffeomorphic registration finished"
        );
        Ok(Registration {
            transform,
            mesh,
            metric_value: metric,
            iterations: self.iterations,
            stop_reason,
        })
    }
}

fn field_as_f64(field: &VolumetricField) -> Vec<f64> {
    field.values.iter().map(|&v| v as f64).collect()
}

/// Moving values pulled back through the displacement: `M(x + u(x))`.
/// Samples leaving the moving grid are `None`.
fn warp(moving: &VolumetricField, field: &DisplacementFieldTransform) -> Vec<Option<f64>> {
    let geometry = &field.geometry;
    (0..geometry.voxel_count())
        .into_par_iter()
        .map(|idx| {
            let p = geometry.index_to_physical(geometry.delinearize(idx));
            moving.sample(&(p + field.displacements[idx]))
        })
        .collect()
}

fn mean_squared_difference(fixed: &VolumetricField, warped: &[Option<f64>]) -> AtlasResult<f64> {
    let (sum, count) = fixed
        .values
        .iter()
        .zip(warped)
        .filter_map(|(&f, w)| w.map(|w| (w - f as f64).powi(2)))
        .fold((0.0, 0usize), |(s, c), d| (s + d, c + 1));
    if count == 0 {
        return Err(AtlasError::metric(
            "the displacement moved every voxel outside the moving field",
        ));
    }
    Ok(sum / count as f64)
}

/// Physical-space gradient by central differences, one-sided at the border.
fn central_gradient(geometry: &GridGeometry, values: &[f64]) -> Vec<Vector3<f64>> {
    let size = geometry.size;
    (0..geometry.voxel_count())
        .into_par_iter()
        .map(|idx| {
            let index = geometry.delinearize(idx);
            let mut g = Vector3::zeros();
            for axis in 0..3 {
                if size[axis] < 2 {
                    continue;
                }
                let mut lo = index;
                let mut hi = index;
                lo[axis] = index[axis].saturating_sub(1);
                hi[axis] = (index[axis] + 1).min(size[axis] - 1);
                let span = (hi[axis] - lo[axis]) as f64 * geometry.spacing[axis];
                let at = |i: [usize; 3]| values[geometry.linear_index(i[0], i[1], i[2])];
                g[axis] = (at(hi) - at(lo)) / span;
            }
            geometry.direction * g
        })
        .collect()
}

/// Symmetric demons force for every voxel, clamped to half a voxel.
fn demons_update(
    fixed: &VolumetricField,
    warped: &[Option<f64>],
    fixed_gradient: &[Vector3<f64>],
    normalizer: f64,
) -> Vec<Vector3<f64>> {
    let geometry = &fixed.geometry;
    // Outside the moving grid the warped image takes the fixed value
    let filled: Vec<f64> = warped
        .iter()
        .zip(&fixed.values)
        .map(|(w, &f)| w.unwrap_or(f as f64))
        .collect();
    let warped_gradient = central_gradient(geometry, &filled);
    let max_step = geometry.spacing * MAX_UPDATE_VOXELS;

    (0..geometry.voxel_count())
        .into_par_iter()
        .map(|idx| {
            let diff = fixed.values[idx] as f64 - filled[idx];
            if diff.abs() < INTENSITY_DIFFERENCE_THRESHOLD {
                return Vector3::zeros();
            }
            let g = (fixed_gradient[idx] + warped_gradient[idx]) * 0.5;
            let denominator = g.norm_squared() + diff * diff / normalizer;
            if denominator < DENOMINATOR_THRESHOLD {
                return Vector3::zeros();
            }
            let u = g * (diff / denominator);
            // Clamp in the grid frame so the bound is per axis in voxels
            let mut local = geometry.direction.transpose() * u;
            for axis in 0..3 {
                local[axis] = local[axis].clamp(-max_step[axis], max_step[axis]);
            }
            geometry.direction * local
        })
        .collect()
}

fn sample_vector_field(
    geometry: &GridGeometry,
    values: &[Vector3<f64>],
    p: &Point3<f64>,
) -> Vector3<f64> {
    match geometry.trilinear_stencil(p) {
        Some(stencil) => stencil
            .iter()
            .fold(Vector3::zeros(), |acc, &(idx, w)| acc + values[idx] * w),
        None => Vector3::zeros(),
    }
}

/// `exp(v)` by scaling and squaring.
fn exponentiate(geometry: &GridGeometry, mut v: Vec<Vector3<f64>>) -> Vec<Vector3<f64>> {
    let min_spacing = geometry.spacing.min();
    let max_norm = v.iter().map(|u| u.norm()).fold(0.0, f64::max) / min_spacing;
    if max_norm == 0.0 {
        return v;
    }
    // Scale until every vector is under half a voxel
    let squarings = (max_norm / MAX_UPDATE_VOXELS).log2().ceil().max(0.0) as u32;
    let scale = 0.5f64.powi(squarings as i32);
    for u in v.iter_mut() {
        *u *= scale;
    }
    for _ in 0..squarings {
        v = (0..geometry.voxel_count())
            .into_par_iter()
            .map(|idx| {
                let p = geometry.index_to_physical(geometry.delinearize(idx));
                v[idx] + sample_vector_field(geometry, &v, &(p + v[idx]))
            })
            .collect();
    }
    v
}

/// Displacement of `x -> phi(exp(v)(x))`: `e(x) + u(x + e(x))`.
fn compose(field: &DisplacementFieldTransform, exponential: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
    let geometry = &field.geometry;
    (0..geometry.voxel_count())
        .into_par_iter()
        .map(|idx| {
            let p = geometry.index_to_physical(geometry.delinearize(idx));
            let e = exponential[idx];
            e + sample_vector_field(geometry, &field.displacements, &(p + e))
        })
        .collect()
}

/// Normalized Gaussian taps, `None` when no smoothing is requested.
fn gaussian_kernel(sigma: f64) -> Option<Vec<f64>> {
    if sigma <= 0.0 {
        return None;
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let taps: Vec<f64> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = taps.iter().sum();
    Some(taps.into_iter().map(|t| t / total).collect())
}

/// Separable Gaussian smoothing along each grid axis, replicating edges.
fn smooth(values: &mut [Vector3<f64>], size: [usize; 3], kernel: &[f64]) {
    let radius = (kernel.len() / 2) as isize;
    let strides = [1, size[0], size[0] * size[1]];
    for axis in 0..3 {
        let n = size[axis] as isize;
        if n < 2 {
            continue;
        }
        let source: &[Vector3<f64>] = values;
        let smoothed: Vec<Vector3<f64>> = (0..source.len())
            .into_par_iter()
            .map(|idx| {
                let t = ((idx / strides[axis]) % size[axis]) as isize;
                let line_start = idx - t as usize * strides[axis];
                kernel.iter().enumerate().fold(Vector3::zeros(), |acc, (k, &w)| {
                    let s = (t + k as isize - radius).clamp(0, n - 1) as usize;
                    acc + source[line_start + s * strides[axis]] * w
                })
            })
            .collect();
        values.copy_from_slice(&smoothed);
    }
}

fn rms_difference(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).norm_squared()).sum();
    (sum / a.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_core::primitives;

    fn coarse() -> DiffeomorphicConfig {
        DiffeomorphicConfig::default()
            .with_raster(RasterizeParams::default().with_resolution(20).with_buffer(6).with_margin(3))
            .with_max_iterations(8)
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(1.0).unwrap();
        assert_eq!(kernel.len(), 7);
        assert_relative_eq!(kernel.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(gaussian_kernel(0.0).is_none());
    }

    #[test]
    fn test_smoothing_keeps_constant_field() {
        let mut values = vec![Vector3::new(1.0, -2.0, 0.5); 4 * 3 * 5];
        smooth(&mut values, [4, 3, 5], &gaussian_kernel(1.0).unwrap());
        for v in &values {
            assert_relative_eq!(*v, Vector3::new(1.0, -2.0, 0.5), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_exponential_of_constant_field_is_translation() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [8, 8, 8]);
        let v = vec![Vector3::new(0.3, 0.0, 0.0); geometry.voxel_count()];
        let e = exponentiate(&geometry, v);
        // Interior voxels see a uniform field, so the flow is a pure shift
        let idx = geometry.linear_index(3, 3, 3);
        assert_relative_eq!(e[idx], Vector3::new(0.3, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_central_gradient_of_ramp() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::new(0.5, 1.0, 2.0), [5, 5, 5]);
        let values: Vec<f64> = (0..geometry.voxel_count())
            .map(|idx| {
                let p = geometry.index_to_physical(geometry.delinearize(idx));
                3.0 * p.x - p.z
            })
            .collect();
        let g = central_gradient(&geometry, &values);
        for grad in g {
            assert_relative_eq!(grad, Vector3::new(3.0, 0.0, -1.0), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_registration_reduces_difference() {
        let template = primitives::uv_sphere(10.0, 12, 18);
        let target = primitives::uv_sphere(11.0, 12, 18);
        let mut registrar = DiffeomorphicRegistrar::new();

        let before = registrar
            .register(&template, &target, &coarse().with_max_iterations(0))
            .unwrap();
        let after = registrar.register(&template, &target, &coarse()).unwrap();
        assert!(after.metric_value < before.metric_value);
        assert_eq!(after.iterations, 8);
        assert_eq!(after.stop_reason, StopReason::MaximumIterations);
        assert_eq!(after.mesh.faces, template.faces);

        // The sphere grows, so vertices move outward on average
        let mean_radius = after
            .mesh
            .vertices
            .iter()
            .map(|v| v.position.coords.norm())
            .sum::<f64>()
            / after.mesh.vertex_count() as f64;
        assert!(mean_radius > 10.0);
    }

    #[test]
    fn test_rms_threshold_stops_early() {
        let sphere = primitives::uv_sphere(10.0, 10, 14);
        let mut registrar = DiffeomorphicRegistrar::new();
        let result = registrar
            .register(&sphere, &sphere, &coarse().with_max_rms_error(1e6))
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::RmsChangeBelowThreshold);
        assert_eq!(result.iterations, 1);
        assert!(registrar.last_rms_change() < 1e6);
    }
}
