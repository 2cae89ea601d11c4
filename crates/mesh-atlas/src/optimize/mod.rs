//! Small first-order optimizers driving the registrars.
//!
//! Both optimizers minimize a [`CostFunction`] that returns its value and
//! gradient together. Optimizers are stateful and reusable: call `reset`
//! before each independent run.

mod gradient_descent;
mod lbfgs;

pub use gradient_descent::{GradientDescentOptimizer, GradientDescentSettings, LearningRateEstimation};
pub use lbfgs::{Bound, LbfgsOptimizer, LbfgsSettings};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::AtlasResult;

/// Objective minimized by an optimizer.
pub trait CostFunction: Sync {
    /// Length of the parameter vector.
    fn parameter_count(&self) -> usize;

    /// Value and gradient at `parameters`.
    fn evaluate(&self, parameters: &DVector<f64>) -> AtlasResult<(f64, DVector<f64>)>;

    /// Largest physical displacement of any sample caused by moving the
    /// parameters by `step`. Used to estimate learning rates.
    fn max_physical_shift(&self, _parameters: &DVector<f64>, _step: &DVector<f64>) -> Option<f64> {
        None
    }
}

/// Why an optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Convergence criterion met.
    Converged,
    MaximumIterations,
    MaximumFunctionEvaluations,
    /// Gradient fell below tolerance.
    GradientTolerance,
    LineSearchFailed,
    /// Demons update changed the field less than the threshold.
    RmsChangeBelowThreshold,
    /// Parameters stopped moving.
    StepTooSmall,
}

impl StopReason {
    /// True for stops that signal a converged solution rather than an
    /// exhausted budget.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            StopReason::Converged
                | StopReason::GradientTolerance
                | StopReason::RmsChangeBelowThreshold
                | StopReason::StepTooSmall
        )
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Converged => "converged",
            StopReason::MaximumIterations => "maximum_iterations",
            StopReason::MaximumFunctionEvaluations => "maximum_function_evaluations",
            StopReason::GradientTolerance => "gradient_tolerance",
            StopReason::LineSearchFailed => "line_search_failed",
            StopReason::RmsChangeBelowThreshold => "rms_change_below_threshold",
            StopReason::StepTooSmall => "step_too_small",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of an optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerResult {
    pub parameters: DVector<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub stop_reason: StopReason,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Anisotropic quadratic `sum w_i (x_i - c_i)^2`.
    pub struct Quadratic {
        pub weights: Vec<f64>,
        pub center: Vec<f64>,
    }

    impl CostFunction for Quadratic {
        fn parameter_count(&self) -> usize {
            self.weights.len()
        }

        fn evaluate(&self, x: &DVector<f64>) -> AtlasResult<(f64, DVector<f64>)> {
            let mut value = 0.0;
            let mut grad = DVector::zeros(x.len());
            for i in 0..x.len() {
                let d = x[i] - self.center[i];
                value += self.weights[i] * d * d;
                grad[i] = 2.0 * self.weights[i] * d;
            }
            Ok((value, grad))
        }

        fn max_physical_shift(&self, _x: &DVector<f64>, step: &DVector<f64>) -> Option<f64> {
            Some(step.amax())
        }
    }

    /// Rosenbrock valley in two dimensions.
    pub struct Rosenbrock;

    impl CostFunction for Rosenbrock {
        fn parameter_count(&self) -> usize {
            2
        }

        fn evaluate(&self, x: &DVector<f64>) -> AtlasResult<(f64, DVector<f64>)> {
            let (a, b) = (x[0], x[1]);
            let value = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
            let grad = DVector::from_vec(vec![
                -2.0 * (1.0 - a) - 400.0 * a * (b - a * a),
                200.0 * (b - a * a),
            ]);
            Ok((value, grad))
        }
    }
}
