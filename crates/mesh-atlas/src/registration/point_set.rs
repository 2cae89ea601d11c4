//! Affine registration of vertex positions under a point set metric.
//!
//! No rasterization is involved. Both meshes may be subsampled first, then
//! an affine transform centered on the template samples is optimized with
//! gradient descent, using per-parameter scales derived from how far each
//! parameter moves the samples.

use nalgebra::{DVector, Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mesh_core::Mesh;
use mesh_core::resample_onto_target;
use mesh_core::spatial::{SpatialIndex, build_index};
use mesh_core::tracing_ext::OperationTimer;

use super::{Registrar, Registration, RegistrationConfig, check_inputs};
use crate::error::{AtlasError, AtlasResult};
use crate::optimize::{
    CostFunction, GradientDescentOptimizer, GradientDescentSettings, LearningRateEstimation,
};
use crate::transform::{AffineTransform, Transform, apply_transform_to_mesh};

const SAMPLE_CHUNK: usize = 4096;

/// How transformed template samples are scored against the target samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointSetMetric {
    /// Jensen-Havrda-Charvat-Tsallis entropy of a Gaussian mixture density
    /// placed on the target, evaluated over each sample's nearest targets.
    JensenHavrdaCharvatTsallis {
        point_set_sigma: f64,
        /// Combined in quadrature with `point_set_sigma`.
        kernel_sigma: f64,
        evaluation_k_neighborhood: usize,
        alpha: f64,
    },
    /// Mean distance from each sample to its closest target sample.
    EuclideanDistance,
}

impl Default for PointSetMetric {
    fn default() -> Self {
        PointSetMetric::JensenHavrdaCharvatTsallis {
            point_set_sigma: 20.0,
            kernel_sigma: 3.0,
            evaluation_k_neighborhood: 10,
            alpha: 1.1,
        }
    }
}

impl PointSetMetric {
    fn validate(&self) -> AtlasResult<()> {
        let PointSetMetric::JensenHavrdaCharvatTsallis {
            point_set_sigma,
            kernel_sigma,
            evaluation_k_neighborhood,
            alpha,
        } = *self
        else {
            return Ok(());
        };
        if !(point_set_sigma > 0.0) || !(kernel_sigma >= 0.0) {
            return Err(AtlasError::invalid_parameter(
                "point_set_sigma",
                format!(
                    "sigmas must be positive, got {} and {}",
                    point_set_sigma, kernel_sigma
                ),
            ));
        }
        if evaluation_k_neighborhood == 0 {
            return Err(AtlasError::invalid_parameter(
                "evaluation_k_neighborhood",
                "at least one neighbour is needed",
            ));
        }
        if !(1.0..=2.0).contains(&alpha) {
            return Err(AtlasError::invalid_parameter(
                "alpha",
                format!("alpha must lie in [1, 2], got {}", alpha),
            ));
        }
        Ok(())
    }
}

/// Settings for [`PointSetEntropyRegistrar`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointSetEntropyConfig {
    pub metric: PointSetMetric,
    /// Fraction of vertices kept from each mesh, in (0, 1].
    pub resample_rate: f64,
    /// Seed for subsampling. `None` draws from OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub max_iterations: usize,
    pub learning_rate: f64,
    pub maximum_step_size_in_physical_units: f64,
    pub minimum_convergence_value: f64,
    pub convergence_window_size: usize,
    pub learning_rate_estimation: LearningRateEstimation,
    pub return_best_parameters_and_value: bool,
    /// Snap the registered template onto the target's vertices.
    pub resample_from_target: bool,
    /// Starting transform. Identity about the sample centroid when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_transform: Option<AffineTransform>,
}

impl Default for PointSetEntropyConfig {
    fn default() -> Self {
        let gd = GradientDescentSettings::default();
        Self {
            metric: PointSetMetric::default(),
            resample_rate: 1.0,
            seed: None,
            max_iterations: gd.max_iterations,
            learning_rate: gd.learning_rate,
            maximum_step_size_in_physical_units: gd.maximum_step_size_in_physical_units,
            minimum_convergence_value: gd.minimum_convergence_value,
            convergence_window_size: gd.convergence_window_size,
            learning_rate_estimation: gd.learning_rate_estimation,
            return_best_parameters_and_value: gd.return_best_parameters_and_value,
            resample_from_target: false,
            initial_transform: None,
        }
    }
}

impl PointSetEntropyConfig {
    /// Closest-point metric used when refining an atlas.
    pub fn for_refinement() -> Self {
        Self::default().with_metric(PointSetMetric::EuclideanDistance)
    }

    pub fn with_metric(mut self, metric: PointSetMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_resample_rate(mut self, rate: f64) -> Self {
        self.resample_rate = rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_resample_from_target(mut self, resample: bool) -> Self {
        self.resample_from_target = resample;
        self
    }

    pub fn with_initial_transform(mut self, transform: AffineTransform) -> Self {
        self.initial_transform = Some(transform);
        self
    }

    fn validate(&self) -> AtlasResult<()> {
        if !(self.resample_rate > 0.0 && self.resample_rate <= 1.0) {
            return Err(AtlasError::registration_input(format!(
                "resample_rate must lie in (0, 1], got {}",
                self.resample_rate
            )));
        }
        self.metric.validate()
    }

    fn gradient_descent_settings(&self) -> GradientDescentSettings {
        GradientDescentSettings {
            learning_rate: self.learning_rate,
            max_iterations: self.max_iterations,
            maximum_step_size_in_physical_units: self.maximum_step_size_in_physical_units,
            learning_rate_estimation: self.learning_rate_estimation,
            minimum_convergence_value: self.minimum_convergence_value,
            convergence_window_size: self.convergence_window_size,
            return_best_parameters_and_value: self.return_best_parameters_and_value,
        }
    }
}

impl RegistrationConfig for PointSetEntropyConfig {
    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }
}

/// Affine point set registration with gradient descent.
#[derive(Debug, Clone, Default)]
pub struct PointSetEntropyRegistrar {
    optimizer: GradientDescentOptimizer,
}

impl PointSetEntropyRegistrar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registrar for PointSetEntropyRegistrar {
    type Config = PointSetEntropyConfig;

    fn name(&self) -> &'static str {
        "point_set"
    }

    fn register(
        &mut self,
        template: &Mesh,
        target: &Mesh,
        config: &PointSetEntropyConfig,
    ) -> AtlasResult<Registration> {
        check_inputs(template, target)?;
        config.validate()?;
        let _timer = OperationTimer::for_mesh("point_set_registration", template);

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let template_samples = subsample(template.positions(), config.resample_rate, &mut rng);
        let target_samples = subsample(target.positions(), config.resample_rate, &mut rng);
        debug!(
            template_samples = template_samples.len(),
            target_samples = target_samples.len(),
            "Subsampled point sets"
        );

        let affine = match &config.initial_transform {
            Some(initial) => initial.clone(),
            None => AffineTransform::identity(centroid(&template_samples)),
        };
        let index = build_index(&target_samples)?;
        let cost = PointSetCost {
            samples: template_samples,
            index: &index,
            base: affine.clone(),
            metric: config.metric,
        };

        self.optimizer.reset();
        self.optimizer.configure(config.gradient_descent_settings());
        self.optimizer.set_scales(cost.physical_shift_scales());
        let result = self.optimizer.minimize(&cost, affine.parameters())?;

        let mut affine = affine;
        affine.set_parameters(&result.parameters);
        let transform = Transform::Affine(affine);
        let mut mesh = apply_transform_to_mesh(template, &transform);
        if config.resample_from_target {
            mesh = resample_onto_target(&mesh, target)?;
        }

        info!(
            metric = result.value,
            iterations = result.iterations,
            stop = %result.stop_reason,
            "Point set registration finished"
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

/// Keep `ceil(rate * n)` points drawn without replacement, in input order.
///
/// A rate of one returns the points untouched and draws nothing from `rng`.
pub(crate) fn subsample(
    points: Vec<Point3<f64>>,
    rate: f64,
    rng: &mut StdRng,
) -> Vec<Point3<f64>> {
    if rate >= 1.0 {
        return points;
    }
    let n = points.len();
    let count = ((rate * n as f64).ceil() as usize).clamp(1, n);
    let mut picked = rand::seq::index::sample(rng, n, count).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| points[i]).collect()
}

fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Point3::from(sum / points.len().max(1) as f64)
}

struct PointSetCost<'a> {
    samples: Vec<Point3<f64>>,
    index: &'a SpatialIndex,
    base: AffineTransform,
    metric: PointSetMetric,
}

impl PointSetCost<'_> {
    fn transform_with(&self, parameters: &DVector<f64>) -> AffineTransform {
        let mut transform = self.base.clone();
        transform.set_parameters(parameters);
        transform
    }

    /// Squared largest displacement a unit change of each parameter causes
    /// among the samples.
    fn physical_shift_scales(&self) -> DVector<f64> {
        let mut reach = Vector3::<f64>::zeros();
        for p in &self.samples {
            let local = p - self.base.center;
            reach = reach.sup(&local.component_mul(&local));
        }
        let mut scales = DVector::from_element(AffineTransform::PARAMETER_COUNT, 1.0);
        for row in 0..3 {
            for col in 0..3 {
                if reach[col] > 0.0 {
                    scales[row * 3 + col] = reach[col];
                }
            }
        }
        scales
    }

    /// Metric value and gradient with respect to the transformed point.
    fn score(&self, y: &Point3<f64>) -> (f64, Vector3<f64>) {
        match self.metric {
            PointSetMetric::EuclideanDistance => {
                let hit = self.index.nearest(y);
                let Some(q) = self.index.point(hit.index) else {
                    return (0.0, Vector3::zeros());
                };
                if hit.distance > 0.0 {
                    (hit.distance, (y - q) / hit.distance)
                } else {
                    (0.0, Vector3::zeros())
                }
            }
            PointSetMetric::JensenHavrdaCharvatTsallis {
                point_set_sigma,
                kernel_sigma,
                evaluation_k_neighborhood,
                alpha,
            } => {
                let variance = point_set_sigma * point_set_sigma + kernel_sigma * kernel_sigma;
                let neighbours = self.index.nearest_k(y, evaluation_k_neighborhood);
                let k = neighbours.len().max(1) as f64;
                let mut density = 0.0;
                let mut density_gradient = Vector3::zeros();
                for hit in &neighbours {
                    let Some(q) = self.index.point(hit.index) else {
                        continue;
                    };
                    let weight = (-hit.distance * hit.distance / (2.0 * variance)).exp() / k;
                    density += weight;
                    density_gradient -= (y - q) * (weight / variance);
                }
                let density = density.max(f64::MIN_POSITIVE);
                let value = if alpha == 1.0 {
                    -density.ln()
                } else {
                    -density.powf(alpha - 1.0) / (alpha - 1.0)
                };
                (value, -density_gradient * density.powf(alpha - 2.0))
            }
        }
    }
}

impl CostFunction for PointSetCost<'_> {
    fn parameter_count(&self) -> usize {
        AffineTransform::PARAMETER_COUNT
    }

    fn evaluate(&self, parameters: &DVector<f64>) -> AtlasResult<(f64, DVector<f64>)> {
        if self.samples.is_empty() {
            return Err(AtlasError::metric("no template samples to score"));
        }
        let transform = self.transform_with(parameters);

        let partials: Vec<(f64, DVector<f64>)> = self
            .samples
            .par_chunks(SAMPLE_CHUNK)
            .map(|chunk| {
                let mut sum = 0.0;
                let mut gradient = DVector::zeros(AffineTransform::PARAMETER_COUNT);
                for p in chunk {
                    let (value, g) = self.score(&transform.transform_point(p));
                    sum += value;
                    transform.accumulate_gradient(p, &g, &mut gradient);
                }
                (sum, gradient)
            })
            .collect();

        let mut sum = 0.0;
        let mut gradient = DVector::zeros(AffineTransform::PARAMETER_COUNT);
        for (s, g) in partials {
            sum += s;
            gradient += g;
        }
        let scale = 1.0 / self.samples.len() as f64;
        Ok((sum * scale, gradient * scale))
    }

    fn max_physical_shift(&self, parameters: &DVector<f64>, step: &DVector<f64>) -> Option<f64> {
        let before = self.transform_with(parameters);
        let after = self.transform_with(&(parameters + step));
        self.samples
            .iter()
            .map(|p| (after.transform_point(p) - before.transform_point(p)).norm())
            .reduce(f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::StopReason;
    use approx::assert_relative_eq;
    use mesh_core::primitives;

    fn shifted(mesh: &Mesh, offset: Vector3<f64>) -> Mesh {
        let mut moved = mesh.clone();
        moved.translate(offset);
        moved
    }

    #[test]
    fn test_identical_meshes_stop_at_identity() {
        let sphere = primitives::uv_sphere(10.0, 10, 14);
        let mut registrar = PointSetEntropyRegistrar::new();
        let result = registrar
            .register(&sphere, &sphere, &PointSetEntropyConfig::for_refinement())
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::GradientTolerance);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.metric_value, 0.0);
        assert_eq!(result.mesh.faces, sphere.faces);
        for (moved, original) in result.mesh.vertices.iter().zip(&sphere.vertices) {
            assert_relative_eq!(moved.position, original.position, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_euclidean_reduces_distance() {
        let template = primitives::uv_sphere(10.0, 12, 18);
        let target = shifted(&template, Vector3::new(1.5, -1.0, 0.5));
        let mut registrar = PointSetEntropyRegistrar::new();
        let config = PointSetEntropyConfig::for_refinement().with_seed(3);

        let start = registrar
            .register(&template, &target, &config.clone().with_max_iterations(0))
            .unwrap();
        let result = registrar.register(&template, &target, &config).unwrap();
        assert!(result.metric_value < start.metric_value);
        assert_eq!(result.mesh.faces, template.faces);
        assert_eq!(result.transform.kind(), "affine");
        assert_eq!(result.transform.parameter_count(), 12);
    }

    #[test]
    fn test_entropy_metric_reduces_value() {
        let template = primitives::uv_sphere(10.0, 10, 14);
        let target = shifted(&template, Vector3::new(2.0, 0.0, 0.0));
        let mut registrar = PointSetEntropyRegistrar::new();
        let config = PointSetEntropyConfig::default().with_max_iterations(30);

        let start = registrar
            .register(&template, &target, &config.clone().with_max_iterations(0))
            .unwrap();
        let result = registrar.register(&template, &target, &config).unwrap();
        assert!(result.metric_value < start.metric_value);
    }

    #[test]
    fn test_rejects_resample_rate_out_of_range() {
        let sphere = primitives::uv_sphere(5.0, 8, 8);
        let mut registrar = PointSetEntropyRegistrar::new();
        for rate in [0.0, -0.5, 1.5, f64::NAN] {
            let config = PointSetEntropyConfig::default().with_resample_rate(rate);
            let err = registrar.register(&sphere, &sphere, &config).unwrap_err();
            assert!(
                matches!(err, AtlasError::RegistrationInput { .. }),
                "rate {}",
                rate
            );
        }
    }

    #[test]
    fn test_rejects_bad_alpha() {
        let sphere = primitives::uv_sphere(5.0, 8, 8);
        let config = PointSetEntropyConfig::default().with_metric(
            PointSetMetric::JensenHavrdaCharvatTsallis {
                point_set_sigma: 20.0,
                kernel_sigma: 3.0,
                evaluation_k_neighborhood: 10,
                alpha: 3.0,
            },
        );
        let err = PointSetEntropyRegistrar::new()
            .register(&sphere, &sphere, &config)
            .unwrap_err();
        assert!(matches!(err, AtlasError::InvalidParameter { name: "alpha", .. }));
    }

    #[test]
    fn test_seeded_subsampling_is_reproducible() {
        let template = primitives::torus(10.0, 3.0, 24, 12);
        let target = shifted(&template, Vector3::new(0.5, 0.5, 0.0));
        let config = PointSetEntropyConfig::for_refinement()
            .with_resample_rate(0.5)
            .with_seed(42)
            .with_max_iterations(20);
        let first = PointSetEntropyRegistrar::new()
            .register(&template, &target, &config)
            .unwrap();
        let second = PointSetEntropyRegistrar::new()
            .register(&template, &target, &config)
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_subsample_count() {
        let points: Vec<Point3<f64>> = (0..10).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let kept = subsample(points.clone(), 0.25, &mut rng);
        assert_eq!(kept.len(), 3);
        assert!(kept.windows(2).all(|w| w[0].x < w[1].x));
        assert_eq!(subsample(points.clone(), 1.0, &mut rng), points);
    }

    #[test]
    fn test_initial_transform_is_the_starting_point() {
        let sphere = primitives::uv_sphere(6.0, 8, 10);
        let mut initial = AffineTransform::identity(Point3::origin());
        initial.translation = Vector3::new(0.0, 0.0, 4.0);
        let config = PointSetEntropyConfig::for_refinement()
            .with_initial_transform(initial)
            .with_max_iterations(0);
        let result = PointSetEntropyRegistrar::new()
            .register(&sphere, &sphere, &config)
            .unwrap();
        for (moved, original) in result.mesh.vertices.iter().zip(&sphere.vertices) {
            assert_relative_eq!(moved.position.z, original.position.z + 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_resample_from_target_lands_on_target_vertices() {
        let template = primitives::uv_sphere(8.0, 8, 10);
        let target = primitives::uv_sphere(9.0, 10, 12);
        let config = PointSetEntropyConfig::for_refinement()
            .with_max_iterations(5)
            .with_resample_from_target(true);
        let result = PointSetEntropyRegistrar::new()
            .register(&template, &target, &config)
            .unwrap();
        assert_eq!(result.mesh.faces, template.faces);
        for v in &result.mesh.vertices {
            assert!(target.vertices.iter().any(|t| t.position == v.position));
        }
    }
}
