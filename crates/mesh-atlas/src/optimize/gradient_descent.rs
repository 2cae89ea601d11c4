//! Scaled gradient descent with optional learning-rate estimation.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{CostFunction, OptimizerResult, StopReason};
use crate::error::{AtlasError, AtlasResult};

/// When to derive the learning rate from `maximum_step_size_in_physical_units`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningRateEstimation {
    #[default]
    Never,
    Once,
    EachIteration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientDescentSettings {
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Target displacement of the fastest-moving sample when estimating the
    /// learning rate.
    pub maximum_step_size_in_physical_units: f64,
    pub learning_rate_estimation: LearningRateEstimation,
    /// Stop when the spread of the last window of values falls to or below
    /// this. Negative values disable the check.
    pub minimum_convergence_value: f64,
    pub convergence_window_size: usize,
    /// Return the lowest value seen rather than the last one.
    pub return_best_parameters_and_value: bool,
}

impl Default for GradientDescentSettings {
    fn default() -> Self {
        Self {
            learning_rate: 1.0,
            max_iterations: 200,
            maximum_step_size_in_physical_units: 3.0,
            learning_rate_estimation: LearningRateEstimation::Never,
            minimum_convergence_value: -1.0,
            convergence_window_size: 1,
            return_best_parameters_and_value: true,
        }
    }
}

/// Reusable gradient descent solver.
///
/// Each step is `x -= learning_rate * g ./ scales`.
#[derive(Debug, Clone, Default)]
pub struct GradientDescentOptimizer {
    settings: GradientDescentSettings,
    scales: Option<DVector<f64>>,
    learning_rate: f64,
    values: Vec<f64>,
    best: Option<(DVector<f64>, f64)>,
    iterations: usize,
    evaluations: usize,
}

impl GradientDescentOptimizer {
    pub fn new(settings: GradientDescentSettings) -> Self {
        Self {
            learning_rate: settings.learning_rate,
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &GradientDescentSettings {
        &self.settings
    }

    /// Replace the settings. Counters and best values are untouched.
    pub fn configure(&mut self, settings: GradientDescentSettings) {
        self.learning_rate = settings.learning_rate;
        self.settings = settings;
    }

    /// Per-parameter scales. Larger scales mean smaller steps.
    pub fn set_scales(&mut self, scales: DVector<f64>) {
        self.scales = Some(scales);
    }

    /// Clear counters, scales, value history and the best point.
    pub fn reset(&mut self) {
        self.scales = None;
        self.learning_rate = self.settings.learning_rate;
        self.values.clear();
        self.best = None;
        self.iterations = 0;
        self.evaluations = 0;
    }

    /// Learning rate in use, after any estimation.
    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn minimize<C: CostFunction + ?Sized>(
        &mut self,
        cost: &C,
        initial: DVector<f64>,
    ) -> AtlasResult<OptimizerResult> {
        let n = cost.parameter_count();
        if initial.len() != n {
            return Err(AtlasError::invalid_parameter(
                "initial",
                format!("expected {} parameters, got {}", n, initial.len()),
            ));
        }
        let scales = match &self.scales {
            Some(s) if s.len() != n => {
                return Err(AtlasError::invalid_parameter(
                    "scales",
                    format!("expected {} scales, got {}", n, s.len()),
                ));
            }
            Some(s) if s.iter().any(|&v| !(v > 0.0)) => {
                return Err(AtlasError::invalid_parameter("scales", "scales must be positive"));
            }
            Some(s) => s.clone(),
            None => DVector::from_element(n, 1.0),
        };

        let mut x = initial;
        let mut last_value;
        let stop_reason = loop {
            let (value, gradient) = self.evaluate(cost, &x)?;
            last_value = value;

            if self.converged() {
                break StopReason::Converged;
            }
            if gradient.iter().all(|&g| g == 0.0) {
                break StopReason::GradientTolerance;
            }
            if self.iterations >= self.settings.max_iterations {
                break StopReason::MaximumIterations;
            }

            let direction = -gradient.component_div(&scales);
            let estimate = match self.settings.learning_rate_estimation {
                LearningRateEstimation::Never => false,
                LearningRateEstimation::Once => self.iterations == 0,
                LearningRateEstimation::EachIteration => true,
            };
            if estimate {
                if let Some(shift) = cost.max_physical_shift(&x, &direction) {
                    if shift > 0.0 {
                        self.learning_rate =
                            self.settings.maximum_step_size_in_physical_units / shift;
                    }
                }
            }

            let update = direction * self.learning_rate;
            if update.amax() <= f64::EPSILON * (1.0 + x.amax()) {
                break StopReason::StepTooSmall;
            }
            x += update;
            self.iterations += 1;
            trace!(
                target: "mesh_atlas::optimize",
                iteration = self.iterations,
                value,
                learning_rate = self.learning_rate,
                "Gradient descent step"
            );
        };

        let (parameters, value) = match (&self.best, self.settings.return_best_parameters_and_value) {
            (Some((best_x, best_value)), true) => (best_x.clone(), *best_value),
            _ => (x, last_value),
        };

        debug!(
            target: "mesh_atlas::optimize",
            iterations = self.iterations,
            value,
            stop = %stop_reason,
            "Gradient descent finished"
        );
        Ok(OptimizerResult {
            parameters,
            value,
            iterations: self.iterations,
            evaluations: self.evaluations,
            stop_reason,
        })
    }

    fn evaluate<C: CostFunction + ?Sized>(
        &mut self,
        cost: &C,
        x: &DVector<f64>,
    ) -> AtlasResult<(f64, DVector<f64>)> {
        let (value, gradient) = cost.evaluate(x)?;
        self.evaluations += 1;
        self.values.push(value);
        if self.best.as_ref().is_none_or(|(_, best)| value < *best) {
            self.best = Some((x.clone(), value));
        }
        Ok((value, gradient))
    }

    /// Spread of the last `window + 1` values, relative once their mean
    /// exceeds one, against the threshold.
    fn converged(&self) -> bool {
        let window = self.settings.convergence_window_size.max(1);
        if self.settings.minimum_convergence_value < 0.0 || self.values.len() <= window {
            return false;
        }
        let recent = &self.values[self.values.len() - window - 1..];
        let (lo, hi) = recent
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        (hi - lo) / mean.abs().max(1.0) <= self.settings.minimum_convergence_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::test_support::Quadratic;
    use approx::assert_relative_eq;

    fn quadratic() -> Quadratic {
        Quadratic {
            weights: vec![1.0, 4.0],
            center: vec![2.0, -1.0],
        }
    }

    #[test]
    fn test_scaled_descent_reaches_minimum() {
        let mut opt = GradientDescentOptimizer::new(GradientDescentSettings {
            learning_rate: 0.5,
            max_iterations: 100,
            ..Default::default()
        });
        opt.set_scales(DVector::from_vec(vec![1.0, 4.0]));
        let result = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        // Scales match the curvature, so one step lands on the minimum
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(result.parameters[1], -1.0, epsilon = 1e-9);
        assert_eq!(result.stop_reason, StopReason::GradientTolerance);
    }

    #[test]
    fn test_return_best_after_divergence() {
        let mut opt = GradientDescentOptimizer::new(GradientDescentSettings {
            learning_rate: 1.5,
            max_iterations: 10,
            ..Default::default()
        });
        let result = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        // Steps overshoot and the value grows, so the start is the best point
        assert_eq!(result.stop_reason, StopReason::MaximumIterations);
        assert_eq!(result.parameters, DVector::zeros(2));
        assert_relative_eq!(result.value, 8.0);
    }

    #[test]
    fn test_learning_rate_estimation_caps_first_step() {
        let mut opt = GradientDescentOptimizer::new(GradientDescentSettings {
            learning_rate: 100.0,
            max_iterations: 1,
            maximum_step_size_in_physical_units: 0.25,
            learning_rate_estimation: LearningRateEstimation::Once,
            return_best_parameters_and_value: false,
            ..Default::default()
        });
        let result = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        assert_relative_eq!(result.parameters.amax(), 0.25, epsilon = 1e-12);
        assert!(opt.learning_rate() < 100.0);
    }

    #[test]
    fn test_window_convergence() {
        let mut opt = GradientDescentOptimizer::new(GradientDescentSettings {
            learning_rate: 0.05,
            max_iterations: 10_000,
            minimum_convergence_value: 1e-6,
            convergence_window_size: 3,
            ..Default::default()
        });
        let result = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        assert_eq!(result.stop_reason, StopReason::Converged);
        assert!(result.iterations < 10_000);
    }

    #[test]
    fn test_reset_restores_learning_rate() {
        let mut opt = GradientDescentOptimizer::new(GradientDescentSettings {
            learning_rate: 100.0,
            max_iterations: 2,
            learning_rate_estimation: LearningRateEstimation::Once,
            ..Default::default()
        });
        let first = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        opt.reset();
        assert_eq!(opt.learning_rate(), 100.0);
        let second = opt.minimize(&quadratic(), DVector::zeros(2)).unwrap();
        assert_eq!(first, second);
    }
}
