//! atlas refine command - iterative template refinement over a population.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_atlas::{
    AtlasConfig, DiffeomorphicConfig, IterationRecord, MeanSquaresConfig, PointSetEntropyConfig,
    RefinementStage, RegistrarConfig,
};
use serde::Serialize;

use crate::{Cli, Method, OutputFormat, output};

pub struct RefineOptions {
    pub config: Option<PathBuf>,
    pub iterations: Option<usize>,
    pub registration_iterations: Option<usize>,
    pub method: Option<Method>,
    pub parallel: bool,
    pub stop_on_convergence: bool,
    pub save_config: Option<PathBuf>,
}

#[derive(Serialize)]
struct RefineResult {
    output: String,
    registrar: &'static str,
    targets: usize,
    iterations: usize,
    distance: f64,
    final_stage: RefinementStage,
    history: Vec<IterationRecord>,
}

pub fn run(
    template_path: &Path,
    target_paths: &[PathBuf],
    output_path: &Path,
    options: &RefineOptions,
    cli: &Cli,
) -> Result<()> {
    let config = effective_config(options)?;
    if let Some(path) = &options.save_config {
        config.save(path)?;
    }

    let template = super::load(template_path)?;
    let targets = super::load_all(target_paths)?;

    output::info(
        &format!(
            "Refining against {} targets with {} registration, {} iterations",
            targets.len(),
            config.registrar.name(),
            config.refine.iterations
        ),
        cli.format,
        cli.quiet,
    );

    let refined = config.run(&template, &targets)?;
    refined
        .template
        .save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    let result = RefineResult {
        output: output_path.display().to_string(),
        registrar: config.registrar.name(),
        targets: targets.len(),
        iterations: refined.iterations,
        distance: refined.distance,
        final_stage: refined.final_stage,
        history: refined.history,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Atlas Refinement".bold().underline());
            println!("  {}: {}", "Registrar".cyan(), result.registrar);
            println!("  {}: {}", "Targets".cyan(), result.targets);
            for record in &result.history {
                println!(
                    "  {} {}: moved {:.4}, {}/{} registrations converged",
                    "Iteration".cyan(),
                    record.iteration,
                    record.distance,
                    record.converged_registrations,
                    record.metric_values.len()
                );
            }
            let stage = result.final_stage.to_string();
            println!(
                "  {}: {}",
                "Final stage".cyan(),
                if result.final_stage == RefinementStage::Converged {
                    stage.green()
                } else {
                    stage.yellow()
                }
            );
            output::success(
                &format!("Saved {}", output_path.display()),
                cli.format,
                cli.quiet,
            );
        }
    }

    Ok(())
}

/// Configuration file, or defaults, with command-line overrides applied.
fn effective_config(options: &RefineOptions) -> Result<AtlasConfig> {
    let mut config = match &options.config {
        Some(path) => AtlasConfig::from_file(path)?,
        None => AtlasConfig::default(),
    };

    if let Some(method) = options.method {
        config.registrar = match method {
            Method::MeanSquares => RegistrarConfig::MeanSquares(MeanSquaresConfig::default()),
            Method::Diffeomorphic => RegistrarConfig::Diffeomorphic(DiffeomorphicConfig::default()),
            Method::PointSet => RegistrarConfig::PointSet(PointSetEntropyConfig::for_refinement()),
        };
    }
    if let Some(iterations) = options.iterations {
        config.refine.iterations = iterations;
    }
    if let Some(iterations) = options.registration_iterations {
        config.refine.registration_iterations = iterations;
    }
    if options.parallel {
        config.parallel = true;
    }
    if options.stop_on_convergence {
        config.refine.stop_on_convergence = true;
    }
    Ok(config)
}
