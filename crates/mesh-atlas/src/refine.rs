//! Iterative template refinement against a population of target meshes.
//!
//! Each iteration registers the current template to every target, snaps the
//! registered copies onto their targets and replaces the template with the
//! Procrustes mean of the snapped copies. Since every snapped copy keeps the
//! template's faces and vertex order, the template topology never changes.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mesh_core::tracing_ext::{OperationTimer, log_mesh_extent, log_stage};
use mesh_core::{Mesh, max_vertex_displacement, resample_onto_target};

use crate::error::{AtlasError, AtlasResult};
use crate::procrustes::mean_shape;
use crate::registration::{Registrar, RegistrationConfig};

/// Where the refinement loop is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStage {
    Seeded,
    Registering,
    Resampling,
    Aligning,
    Converged,
    IterationLimitReached,
}

impl RefinementStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefinementStage::Seeded => "seeded",
            RefinementStage::Registering => "registering",
            RefinementStage::Resampling => "resampling",
            RefinementStage::Aligning => "aligning",
            RefinementStage::Converged => "converged",
            RefinementStage::IterationLimitReached => "iteration_limit_reached",
        }
    }
}

impl fmt::Display for RefinementStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of the refinement loop, independent of the registrar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Number of refinement iterations; at least one.
    pub iterations: usize,
    /// Optimizer budget handed to the registrar on every call.
    pub registration_iterations: usize,
    /// Procrustes convergence threshold.
    pub alignment_threshold: f64,
    /// Template movement below which an iteration counts as converged.
    pub convergence_threshold: f64,
    /// End early once an iteration converges. Off by default, in which case
    /// convergence is only reported.
    pub stop_on_convergence: bool,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            registration_iterations: 500,
            alignment_threshold: 0.1,
            convergence_threshold: 0.1,
            stop_on_convergence: false,
        }
    }
}

impl RefineParams {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_registration_iterations(mut self, iterations: usize) -> Self {
        self.registration_iterations = iterations;
        self
    }

    pub fn with_alignment_threshold(mut self, threshold: f64) -> Self {
        self.alignment_threshold = threshold;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_stop_on_convergence(mut self, stop: bool) -> Self {
        self.stop_on_convergence = stop;
        self
    }

    fn validate(&self) -> AtlasResult<()> {
        if self.iterations == 0 {
            return Err(AtlasError::invalid_parameter(
                "iterations",
                "refinement needs at least one iteration",
            ));
        }
        Ok(())
    }
}

/// Snapshot of the loop between stages.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasState {
    /// Template as of the last completed iteration.
    pub template: Mesh,
    /// Iterations completed so far.
    pub iteration: usize,
    /// Template movement in the last completed iteration.
    pub distance: Option<f64>,
    /// Stage entered most recently; the final stage once a run ends.
    pub stage: RefinementStage,
}

/// Summary of one completed iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// Largest vertex movement of the template in this iteration.
    pub distance: f64,
    /// Final registration metric per target, in target order.
    pub metric_values: Vec<f64>,
    /// How many registrations met their convergence criterion.
    pub converged_registrations: usize,
}

/// Outcome of a refinement run.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementResult {
    /// Refined template with the input template's faces.
    pub template: Mesh,
    /// Template movement in the last iteration.
    pub distance: f64,
    /// Iterations actually run, fewer than requested after an early stop.
    pub iterations: usize,
    /// One record per iteration run.
    pub history: Vec<IterationRecord>,
    /// Either `Converged` or `IterationLimitReached`.
    pub final_stage: RefinementStage,
}

/// Per-target registration outputs for one iteration.
struct Registrations {
    meshes: Vec<Mesh>,
    metric_values: Vec<f64>,
    converged: usize,
}

/// Drives a registrar through repeated register, resample and align rounds.
#[derive(Debug, Clone)]
pub struct AtlasRefinementLoop<R: Registrar> {
    registrar: R,
    config: R::Config,
    params: RefineParams,
    state: Option<AtlasState>,
}

impl<R: Registrar> AtlasRefinementLoop<R> {
    pub fn new(registrar: R, config: R::Config, params: RefineParams) -> Self {
        Self {
            registrar,
            config,
            params,
            state: None,
        }
    }

    pub fn params(&self) -> &RefineParams {
        &self.params
    }

    /// State after the most recent stage of the most recent run.
    pub fn state(&self) -> Option<&AtlasState> {
        self.state.as_ref()
    }

    /// Refine `template` against `targets`, one target at a time.
    ///
    /// # Errors
    ///
    /// `RegistrationInput` for an empty template, `InvalidParameter` for an
    /// empty target list or zero iterations. Anything failing inside an
    /// iteration comes back as `StageFailed`.
    pub fn run(&mut self, template: &Mesh, targets: &[Mesh]) -> AtlasResult<RefinementResult> {
        self.refine(template, targets, |registrar, current, targets, config, iteration| {
            let mut registrations = Registrations {
                meshes: Vec::with_capacity(targets.len()),
                metric_values: Vec::with_capacity(targets.len()),
                converged: 0,
            };
            for (index, target) in targets.iter().enumerate() {
                let (mesh, metric, converged) =
                    register_one(registrar, current, target, config, iteration, index)?;
                registrations.meshes.push(mesh);
                registrations.metric_values.push(metric);
                registrations.converged += usize::from(converged);
            }
            Ok(registrations)
        })
    }

    fn refine<F>(
        &mut self,
        template: &Mesh,
        targets: &[Mesh],
        mut register_all: F,
    ) -> AtlasResult<RefinementResult>
    where
        F: FnMut(&mut R, &Mesh, &[Mesh], &R::Config, usize) -> AtlasResult<Registrations>,
    {
        if template.vertices.is_empty() {
            return Err(AtlasError::registration_input("template has no vertices"));
        }
        if targets.is_empty() {
            return Err(AtlasError::invalid_parameter(
                "targets",
                "refinement needs at least one target mesh",
            ));
        }
        self.params.validate()?;

        let _timer = OperationTimer::for_mesh("refine_template", template);
        info!(
            target: "mesh_atlas::refine",
            registrar = self.registrar.name(),
            targets = targets.len(),
            iterations = self.params.iterations,
            "Refining template"
        );

        let config = self
            .config
            .clone()
            .with_max_iterations(self.params.registration_iterations);
        let total = self.params.iterations;
        let mut current = template.clone();
        let mut history = Vec::with_capacity(total);
        self.state = Some(AtlasState {
            template: current.clone(),
            iteration: 0,
            distance: None,
            stage: RefinementStage::Seeded,
        });

        let mut final_stage = RefinementStage::IterationLimitReached;
        for iteration in 1..=total {
            self.enter(RefinementStage::Registering, iteration, total);
            let registrations =
                register_all(&mut self.registrar, &current, targets, &config, iteration)?;

            self.enter(RefinementStage::Resampling, iteration, total);
            let correspondences = resample_all(&registrations.meshes, targets, iteration)?;

            self.enter(RefinementStage::Aligning, iteration, total);
            let next = mean_shape(&correspondences, self.params.alignment_threshold)
                .map_err(|e| e.in_stage(iteration, RefinementStage::Aligning, None))?;
            let distance = max_vertex_displacement(&next, &current).map_err(|e| {
                AtlasError::from(e).in_stage(iteration, RefinementStage::Aligning, None)
            })?;
            log_mesh_extent(&next, "refined template");

            let converged = distance < self.params.convergence_threshold;
            info!(
                target: "mesh_atlas::refine",
                iteration,
                distance,
                converged,
                converged_registrations = registrations.converged,
                "Refinement iteration finished"
            );
            history.push(IterationRecord {
                iteration,
                distance,
                metric_values: registrations.metric_values,
                converged_registrations: registrations.converged,
            });
            current = next;
            if let Some(state) = self.state.as_mut() {
                state.template = current.clone();
                state.iteration = iteration;
                state.distance = Some(distance);
            }

            if converged {
                final_stage = RefinementStage::Converged;
                if self.params.stop_on_convergence {
                    break;
                }
            } else {
                final_stage = RefinementStage::IterationLimitReached;
            }
        }
        if let Some(state) = self.state.as_mut() {
            state.stage = final_stage;
        }

        Ok(RefinementResult {
            template: current,
            distance: history.last().map_or(0.0, |r| r.distance),
            iterations: history.len(),
            history,
            final_stage,
        })
    }

    fn enter(&mut self, stage: RefinementStage, iteration: usize, total: usize) {
        log_stage("refine_template", iteration, total, stage.as_str());
        if let Some(state) = self.state.as_mut() {
            state.stage = stage;
        }
    }
}

impl<R> AtlasRefinementLoop<R>
where
    R: Registrar + Clone + Send,
{
    /// Like [`run`](Self::run), registering all targets of an iteration
    /// concurrently with one registrar clone per target.
    ///
    /// Results do not depend on scheduling. When several targets fail, which
    /// failure is reported is unspecified.
    pub fn run_parallel(
        &mut self,
        template: &Mesh,
        targets: &[Mesh],
    ) -> AtlasResult<RefinementResult> {
        self.refine(template, targets, |registrar, current, targets, config, iteration| {
            let mut locals: Vec<R> = targets.iter().map(|_| registrar.clone()).collect();
            let outputs: Vec<(Mesh, f64, bool)> = locals
                .par_iter_mut()
                .zip(targets.par_iter())
                .enumerate()
                .map(|(index, (local, target))| {
                    register_one(local, current, target, config, iteration, index)
                })
                .collect::<AtlasResult<_>>()?;

            let mut registrations = Registrations {
                meshes: Vec::with_capacity(outputs.len()),
                metric_values: Vec::with_capacity(outputs.len()),
                converged: 0,
            };
            for (mesh, metric, converged) in outputs {
                registrations.meshes.push(mesh);
                registrations.metric_values.push(metric);
                registrations.converged += usize::from(converged);
            }
            Ok(registrations)
        })
    }
}

fn register_one<R: Registrar>(
    registrar: &mut R,
    template: &Mesh,
    target: &Mesh,
    config: &R::Config,
    iteration: usize,
    index: usize,
) -> AtlasResult<(Mesh, f64, bool)> {
    let registration = registrar
        .register(template, target, config)
        .map_err(|e| e.in_stage(iteration, RefinementStage::Registering, Some(index)))?;
    debug!(
        target: "mesh_atlas::refine",
        iteration,
        target_index = index,
        metric = registration.metric_value,
        stop = %registration.stop_reason,
        "Registered template to target"
    );
    let converged = registration.converged();
    Ok((registration.mesh, registration.metric_value, converged))
}

/// Snap every registered copy onto the target it was registered to.
fn resample_all(
    registered: &[Mesh],
    targets: &[Mesh],
    iteration: usize,
) -> AtlasResult<Vec<Mesh>> {
    registered
        .par_iter()
        .zip(targets.par_iter())
        .enumerate()
        .map(|(index, (mesh, target))| {
            resample_onto_target(mesh, target).map_err(|e| {
                AtlasError::from(e).in_stage(iteration, RefinementStage::Resampling, Some(index))
            })
        })
        .collect()
}

/// Refine `template` against `targets` and return the refined template.
pub fn refine_template_from_population<R: Registrar>(
    template: &Mesh,
    targets: &[Mesh],
    registrar: R,
    config: R::Config,
    params: RefineParams,
) -> AtlasResult<Mesh> {
    AtlasRefinementLoop::new(registrar, config, params)
        .run(template, targets)
        .map(|result| result.template)
}
