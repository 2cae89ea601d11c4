//! B-spline registration of signed distance fields under a mean squares metric.

use nalgebra::{DVector, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use mesh_core::Mesh;
use mesh_core::tracing_ext::OperationTimer;
use mesh_volume::{RasterizeParams, VolumetricField};

use super::{Registrar, Registration, RegistrationConfig, check_inputs, rasterize_pair};
use crate::error::{AtlasError, AtlasResult};
use crate::optimize::{Bound, CostFunction, LbfgsOptimizer, LbfgsSettings};
use crate::transform::{BSplineTransform, Transform, apply_transform_to_mesh};

/// Cubic splines.
const SPLINE_ORDER: usize = 3;

const SAMPLE_CHUNK: usize = 4096;

/// Settings for [`MeanSquaresRegistrar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanSquaresConfig {
    pub raster: RasterizeParams,
    /// Control grid nodes per axis before the spline order is removed.
    /// The transform mesh has `grid_nodes_per_dimension - 3` cells per axis.
    pub grid_nodes_per_dimension: usize,
    pub max_iterations: usize,
    pub max_function_evaluations: usize,
    pub max_corrections: usize,
    pub cost_function_convergence_factor: f64,
    pub gradient_convergence_tolerance: f64,
    /// Use every n-th fixed voxel along each axis as a metric sample.
    pub sampling_stride: usize,
}

impl Default for MeanSquaresConfig {
    fn default() -> Self {
        let lbfgs = LbfgsSettings::default();
        Self {
            raster: RasterizeParams::default(),
            grid_nodes_per_dimension: 4,
            max_iterations: lbfgs.max_iterations,
            max_function_evaluations: lbfgs.max_function_evaluations,
            max_corrections: lbfgs.max_corrections,
            cost_function_convergence_factor: lbfgs.cost_function_convergence_factor,
            gradient_convergence_tolerance: lbfgs.gradient_convergence_tolerance,
            sampling_stride: 1,
        }
    }
}

impl MeanSquaresConfig {
    pub fn with_raster(mut self, raster: RasterizeParams) -> Self {
        self.raster = raster;
        self
    }

    pub fn with_grid_nodes_per_dimension(mut self, nodes: usize) -> Self {
        self.grid_nodes_per_dimension = nodes;
        self
    }

    pub fn with_max_function_evaluations(mut self, evaluations: usize) -> Self {
        self.max_function_evaluations = evaluations;
        self
    }

    pub fn with_sampling_stride(mut self, stride: usize) -> Self {
        self.sampling_stride = stride;
        self
    }

    fn validate(&self) -> AtlasResult<()> {
        if self.grid_nodes_per_dimension <= SPLINE_ORDER {
            return Err(AtlasError::registration_input(format!(
                "grid_nodes_per_dimension must exceed the spline order {}, got {}",
                SPLINE_ORDER, self.grid_nodes_per_dimension
            )));
        }
        if self.sampling_stride == 0 {
            return Err(AtlasError::registration_input(
                "sampling_stride must be at least 1",
            ));
        }
        self.raster.validate()?;
        Ok(())
    }

    fn lbfgs_settings(&self) -> LbfgsSettings {
        LbfgsSettings {
            max_iterations: self.max_iterations,
            max_function_evaluations: self.max_function_evaluations,
            max_corrections: self.max_corrections,
            cost_function_convergence_factor: self.cost_function_convergence_factor,
            gradient_convergence_tolerance: self.gradient_convergence_tolerance,
        }
    }
}

impl RegistrationConfig for MeanSquaresConfig {
    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }
}

/// Deforms the template's distance field onto the target's with a cubic
/// B-spline, minimizing the mean squared field difference with L-BFGS.
#[derive(Debug, Clone, Default)]
pub struct MeanSquaresRegistrar {
    optimizer: LbfgsOptimizer,
}

impl MeanSquaresRegistrar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registrar for MeanSquaresRegistrar {
    type Config = MeanSquaresConfig;

    fn name(&self) -> &'static str {
        "mean_squares"
    }

    fn register(
        &mut self,
        template: &Mesh,
        target: &Mesh,
        config: &MeanSquaresConfig,
    ) -> AtlasResult<Registration> {
        check_inputs(template, target)?;
        config.validate()?;
        let _timer = OperationTimer::for_mesh("mean_squares_registration", template);

        let (fixed, moving) = rasterize_pair(template, target, &config.raster)?;
        let mut bspline = BSplineTransform::over_grid(
            &fixed.geometry,
            config.grid_nodes_per_dimension - SPLINE_ORDER,
        );
        let cost = MeanSquaresCost::new(&fixed, &moving, bspline.clone(), config.sampling_stride);

        self.optimizer.reset();
        self.optimizer.configure(config.lbfgs_settings());
        self.optimizer
            .set_bounds(vec![Bound::Unbounded; cost.parameter_count()]);
        let result = self
            .optimizer
            .minimize(&cost, DVector::zeros(cost.parameter_count()))?;

        bspline.coefficients = result.parameters;
        let transform = Transform::BSpline(bspline);
        let mesh = apply_transform_to_mesh(template, &transform);

        info!(
            metric = result.value,
            iterations = result.iterations,
            stop = %result.stop_reason,
            "Mean squares registration finished"
        );
        Ok(Registration {
            transform,
            mesh,
            metric_value: result.value,
            iterations: result.iterations,
            stop_reason: result.stop_reason,
        })
    }
}

/// Mean of `(F(x) - M(T(x)))^2` over fixed samples that map inside the
/// moving field.
struct MeanSquaresCost<'a> {
    moving: &'a VolumetricField,
    transform: BSplineTransform,
    samples: Vec<(Point3<f64>, f64)>,
}

impl<'a> MeanSquaresCost<'a> {
    fn new(
        fixed: &VolumetricField,
        moving: &'a VolumetricField,
        transform: BSplineTransform,
        stride: usize,
    ) -> Self {
        let geometry = &fixed.geometry;
        let samples = (0..geometry.voxel_count())
            .filter_map(|idx| {
                let index = geometry.delinearize(idx);
                index.iter().all(|i| i % stride == 0).then(|| {
                    (geometry.index_to_physical(index), fixed.values[idx] as f64)
                })
            })
            .collect();
        Self {
            moving,
            transform,
            samples,
        }
    }
}

impl CostFunction for MeanSquaresCost<'_> {
    fn parameter_count(&self) -> usize {
        self.transform.coefficients.len()
    }

    fn evaluate(&self, parameters: &DVector<f64>) -> AtlasResult<(f64, DVector<f64>)> {
        let n = self.transform.control_point_count();
        let mut transform = self.transform.clone();
        transform.coefficients.copy_from(parameters);

        // Fixed-size chunks summed in order keep the result independent of
        // thread scheduling
        let partials: Vec<(f64, usize, DVector<f64>)> = self
            .samples
            .par_chunks(SAMPLE_CHUNK)
            .map(|chunk| {
                let mut sum = 0.0;
                let mut count = 0usize;
                let mut gradient = DVector::zeros(3 * n);
                for (p, fixed_value) in chunk {
                    let support = transform.support(p);
                    let displacement =
                        support
                            .iter()
                            .fold(Vector3::zeros(), |acc, &(index, weight)| {
                                acc + Vector3::new(
                                    parameters[index],
                                    parameters[n + index],
                                    parameters[2 * n + index],
                                ) * weight
                            });
                    let Some((moving_value, moving_gradient)) =
                        self.moving.sample_with_gradient(&(p + displacement))
                    else {
                        continue;
                    };
                    let diff = moving_value - fixed_value;
                    sum += diff * diff;
                    count += 1;
                    for &(index, weight) in &support {
                        for axis in 0..3 {
                            gradient[axis * n + index] +=
                                2.0 * diff * moving_gradient[axis] * weight;
                        }
                    }
                }
                (sum, count, gradient)
            })
            .collect();

        let mut sum = 0.0;
        let mut count = 0usize;
        let mut gradient = DVector::zeros(3 * n);
        for (s, c, g) in partials {
            sum += s;
            count += c;
            gradient += g;
        }

        if count == 0 {
            return Err(AtlasError::metric(
                "no fixed sample maps inside the moving field",
            ));
        }
        let scale = 1.0 / count as f64;
        Ok((sum * scale, gradient * scale))
    }
}
