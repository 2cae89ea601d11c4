//! Limited-memory BFGS with simple box constraints.
//!
//! Search directions come from the two-loop recursion over the last
//! `max_corrections` curvature pairs. Steps are found by Armijo backtracking
//! and projected onto the box after every trial, so bounded parameters never
//! leave their range.

use std::collections::VecDeque;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{CostFunction, OptimizerResult, StopReason};
use crate::error::{AtlasError, AtlasResult};

const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 30;

/// Box constraint on one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    #[default]
    Unbounded,
    Lower(f64),
    Upper(f64),
    Both(f64, f64),
}

impl Bound {
    fn project(&self, x: f64) -> f64 {
        match *self {
            Bound::Unbounded => x,
            Bound::Lower(lo) => x.max(lo),
            Bound::Upper(hi) => x.min(hi),
            Bound::Both(lo, hi) => x.clamp(lo, hi),
        }
    }

    /// Zero gradient components that push against an active bound.
    fn project_gradient(&self, x: f64, g: f64) -> f64 {
        match *self {
            Bound::Lower(lo) | Bound::Both(lo, _) if x <= lo && g > 0.0 => 0.0,
            Bound::Upper(hi) | Bound::Both(_, hi) if x >= hi && g < 0.0 => 0.0,
            _ => g,
        }
    }
}

/// L-BFGS stopping and memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsSettings {
    pub max_iterations: usize,
    pub max_function_evaluations: usize,
    /// Number of curvature pairs kept.
    pub max_corrections: usize,
    /// Stop when the relative reduction of the cost falls below this
    /// multiple of machine epsilon.
    pub cost_function_convergence_factor: f64,
    /// Stop when the largest projected gradient component falls below this.
    pub gradient_convergence_tolerance: f64,
}

impl Default for LbfgsSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            max_function_evaluations: 200,
            max_corrections: 7,
            cost_function_convergence_factor: 1e7,
            gradient_convergence_tolerance: 1e-35,
        }
    }
}

/// Reusable L-BFGS solver.
#[derive(Debug, Clone, Default)]
pub struct LbfgsOptimizer {
    settings: LbfgsSettings,
    bounds: Vec<Bound>,
    history: VecDeque<Correction>,
    iterations: usize,
    evaluations: usize,
}

#[derive(Debug, Clone)]
struct Correction {
    s: DVector<f64>,
    y: DVector<f64>,
    rho: f64,
}

impl LbfgsOptimizer {
    pub fn new(settings: LbfgsSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &LbfgsSettings {
        &self.settings
    }

    /// Replace the settings. Counters and history are untouched.
    pub fn configure(&mut self, settings: LbfgsSettings) {
        self.settings = settings;
    }

    /// Per-parameter bounds. An empty list means unbounded.
    pub fn set_bounds(&mut self, bounds: Vec<Bound>) {
        self.bounds = bounds;
    }

    /// Clear counters, curvature history and bounds.
    pub fn reset(&mut self) {
        self.bounds.clear();
        self.history.clear();
        self.iterations = 0;
        self.evaluations = 0;
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Minimize `cost` starting from `initial`.
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
        if !self.bounds.is_empty() && self.bounds.len() != n {
            return Err(AtlasError::invalid_parameter(
                "bounds",
                format!("expected {} bounds, got {}", n, self.bounds.len()),
            ));
        }

        let mut x = self.project(initial);
        let (mut f, mut g) = self.evaluate(cost, &x)?;

        let stop_reason = loop {
            if self.projected_gradient_norm(&x, &g) <= self.settings.gradient_convergence_tolerance {
                break StopReason::GradientTolerance;
            }
            if self.iterations >= self.settings.max_iterations {
                break StopReason::MaximumIterations;
            }

            let mut direction = self.direction(&g);
            if direction.dot(&g) >= 0.0 {
                // Not a descent direction; restart from steepest descent
                self.history.clear();
                direction = -&g;
            }

            let mut step = if self.history.is_empty() {
                (1.0 / direction.norm()).min(1.0)
            } else {
                1.0
            };

            let mut accepted = None;
            let mut exhausted = false;
            for _ in 0..MAX_BACKTRACKS {
                if self.evaluations >= self.settings.max_function_evaluations {
                    exhausted = true;
                    break;
                }
                let trial = self.project(&x + &direction * step);
                let (f_trial, g_trial) = self.evaluate(cost, &trial)?;
                if f_trial <= f + ARMIJO * g.dot(&(&trial - &x)) {
                    accepted = Some((trial, f_trial, g_trial));
                    break;
                }
                step *= 0.5;
            }
            let Some((x_new, f_new, g_new)) = accepted else {
                break if exhausted {
                    StopReason::MaximumFunctionEvaluations
                } else {
                    StopReason::LineSearchFailed
                };
            };

            let s = &x_new - &x;
            let y = &g_new - &g;
            let sy = s.dot(&y);
            if sy > f64::EPSILON * y.norm_squared() {
                if self.history.len() == self.settings.max_corrections.max(1) {
                    self.history.pop_front();
                }
                self.history.push_back(Correction { s, y, rho: 1.0 / sy });
            }

            let reduction = (f - f_new) / f.abs().max(f_new.abs()).max(1.0);
            x = x_new;
            f = f_new;
            g = g_new;
            self.iterations += 1;
            trace!(
                target: "mesh_atlas::optimize",
                iteration = self.iterations,
                value = f,
                step,
                "L-BFGS step"
            );

            if reduction <= self.settings.cost_function_convergence_factor * f64::EPSILON {
                break StopReason::Converged;
            }
        };

        debug!(
            target: "mesh_atlas::optimize",
            iterations = self.iterations,
            evaluations = self.evaluations,
            value = f,
            stop = %stop_reason,
            "L-BFGS finished"
        );
        Ok(OptimizerResult {
            parameters: x,
            value: f,
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
        self.evaluations += 1;
        cost.evaluate(x)
    }

    fn project(&self, mut x: DVector<f64>) -> DVector<f64> {
        for (xi, bound) in x.iter_mut().zip(&self.bounds) {
            *xi = bound.project(*xi);
        }
        x
    }

    fn projected_gradient_norm(&self, x: &DVector<f64>, g: &DVector<f64>) -> f64 {
        if self.bounds.is_empty() {
            return g.amax();
        }
        x.iter()
            .zip(g.iter())
            .zip(&self.bounds)
            .map(|((&xi, &gi), b)| b.project_gradient(xi, gi).abs())
            .fold(0.0, f64::max)
    }

    /// Two-loop recursion: `-H g`.
    fn direction(&self, g: &DVector<f64>) -> DVector<f64> {
        let mut q = g.clone();
        let mut alphas = Vec::with_capacity(self.history.len());
        for c in self.history.iter().rev() {
            let alpha = c.rho * c.s.dot(&q);
            q.axpy(-alpha, &c.y, 1.0);
            alphas.push(alpha);
        }
        if let Some(last) = self.history.back() {
            q *= last.s.dot(&last.y) / last.y.norm_squared();
        }
        for (c, alpha) in self.history.iter().zip(alphas.into_iter().rev()) {
            let beta = c.rho * c.y.dot(&q);
            q.axpy(alpha - beta, &c.s, 1.0);
        }
        -q
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::test_support::{Quadratic, Rosenbrock};
    use approx::assert_relative_eq;

    #[test]
    fn test_quadratic_minimum() {
        let cost = Quadratic {
            weights: vec![1.0, 10.0, 0.1],
            center: vec![3.0, -2.0, 5.0],
        };
        let mut opt = LbfgsOptimizer::new(LbfgsSettings::default());
        let result = opt.minimize(&cost, DVector::zeros(3)).unwrap();
        assert_relative_eq!(
            result.parameters,
            DVector::from_vec(vec![3.0, -2.0, 5.0]),
            epsilon = 1e-3
        );
        assert!(result.value < 1e-6);
    }

    #[test]
    fn test_rosenbrock() {
        let mut opt = LbfgsOptimizer::new(LbfgsSettings {
            max_iterations: 500,
            max_function_evaluations: 5000,
            cost_function_convergence_factor: 10.0,
            ..Default::default()
        });
        let result = opt
            .minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]))
            .unwrap();
        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(result.parameters[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_bounds_are_respected() {
        let cost = Quadratic {
            weights: vec![1.0, 1.0],
            center: vec![3.0, -2.0],
        };
        let mut opt = LbfgsOptimizer::default();
        opt.set_bounds(vec![Bound::Upper(1.0), Bound::Both(-1.0, 1.0)]);
        let result = opt.minimize(&cost, DVector::zeros(2)).unwrap();
        assert_relative_eq!(result.parameters[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(result.parameters[1], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_evaluation_budget() {
        let mut opt = LbfgsOptimizer::new(LbfgsSettings {
            max_function_evaluations: 5,
            ..Default::default()
        });
        let result = opt
            .minimize(&Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]))
            .unwrap();
        assert!(result.evaluations <= 5);
        assert_eq!(result.stop_reason, StopReason::MaximumFunctionEvaluations);
    }

    #[test]
    fn test_reset_makes_runs_independent() {
        let cost = Quadratic {
            weights: vec![2.0, 0.5],
            center: vec![1.0, 1.0],
        };
        let mut opt = LbfgsOptimizer::default();
        let first = opt.minimize(&cost, DVector::zeros(2)).unwrap();
        opt.reset();
        let second = opt.minimize(&cost, DVector::zeros(2)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let mut opt = LbfgsOptimizer::default();
        let err = opt.minimize(&Rosenbrock, DVector::zeros(3)).unwrap_err();
        assert!(matches!(err, AtlasError::InvalidParameter { .. }));
    }
}
