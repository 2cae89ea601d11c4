//! atlas register command - take a template mesh onto a target.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use mesh_atlas::{
    DiffeomorphicConfig, DiffeomorphicRegistrar, MeanSquaresConfig, MeanSquaresRegistrar,
    PointSetEntropyConfig, PointSetEntropyRegistrar, Registrar, Registration, RegistrationConfig,
    StopReason, Transform,
};
use mesh_core::Mesh;
use serde::Serialize;
use tracing::info;

use crate::{Cli, Method, OutputFormat, output};

pub struct RegisterOptions {
    pub method: Method,
    pub iterations: Option<usize>,
    pub seed: Option<u64>,
    pub resample_rate: f64,
    pub resample_from_target: bool,
    pub initial_transform: Option<PathBuf>,
    pub save_transform: Option<PathBuf>,
}

#[derive(Serialize)]
struct RegisterResult {
    template: String,
    target: String,
    output: String,
    method: &'static str,
    transform: &'static str,
    metric_value: f64,
    iterations: usize,
    stop_reason: StopReason,
    converged: bool,
    resampled: bool,
}

pub fn run(
    template_path: &Path,
    target_path: &Path,
    output_path: &Path,
    options: &RegisterOptions,
    cli: &Cli,
) -> Result<()> {
    let template = super::load(template_path)?;
    let target = super::load(target_path)?;

    if options.method != Method::PointSet
        && (options.initial_transform.is_some() || options.seed.is_some())
    {
        bail!("--transform and --seed only apply to point set registration");
    }

    output::info(
        &format!(
            "Registering {} onto {}",
            template_path.display(),
            target_path.display()
        ),
        cli.format,
        cli.quiet,
    );

    let (method, registration) = match options.method {
        Method::MeanSquares => {
            let config = with_budget(MeanSquaresConfig::default(), options.iterations);
            let registration =
                register_with(MeanSquaresRegistrar::new(), &config, &template, &target)?;
            ("mean_squares", registration)
        }
        Method::Diffeomorphic => {
            let config = with_budget(DiffeomorphicConfig::default(), options.iterations);
            let registration =
                register_with(DiffeomorphicRegistrar::new(), &config, &template, &target)?;
            ("diffeomorphic", registration)
        }
        Method::PointSet => {
            let config = point_set_config(options)?;
            let registration =
                register_with(PointSetEntropyRegistrar::new(), &config, &template, &target)?;
            ("point_set", registration)
        }
    };

    // The point set registrar snaps onto the target itself
    let snap_here = options.resample_from_target && options.method != Method::PointSet;
    let registered = if snap_here {
        mesh_core::resample_onto_target(&registration.mesh, &target)?
    } else {
        registration.mesh.clone()
    };

    registered
        .save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    if let Some(path) = &options.save_transform {
        std::fs::write(path, registration.transform.to_json()?)
            .with_context(|| format!("Failed to write transform to {:?}", path))?;
    }

    let result = RegisterResult {
        template: template_path.display().to_string(),
        target: target_path.display().to_string(),
        output: output_path.display().to_string(),
        method,
        transform: registration.transform.kind(),
        metric_value: registration.metric_value,
        iterations: registration.iterations,
        stop_reason: registration.stop_reason,
        converged: registration.converged(),
        resampled: options.resample_from_target,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Registration".bold().underline());
            println!("  {}: {}", "Method".cyan(), result.method);
            println!("  {}: {}", "Transform".cyan(), result.transform);
            println!("  {}: {:.6}", "Metric".cyan(), result.metric_value);
            println!("  {}: {}", "Iterations".cyan(), result.iterations);
            let stop = result.stop_reason.to_string();
            println!(
                "  {}: {}",
                "Stopped".cyan(),
                if result.converged {
                    stop.green()
                } else {
                    stop.yellow()
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

fn with_budget<C: RegistrationConfig>(config: C, iterations: Option<usize>) -> C {
    match iterations {
        Some(n) => config.with_max_iterations(n),
        None => config,
    }
}

fn point_set_config(options: &RegisterOptions) -> Result<PointSetEntropyConfig> {
    let mut config = with_budget(PointSetEntropyConfig::default(), options.iterations)
        .with_resample_rate(options.resample_rate)
        .with_resample_from_target(options.resample_from_target);
    if let Some(seed) = options.seed {
        config = config.with_seed(seed);
    }
    if let Some(path) = &options.initial_transform {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transform from {:?}", path))?;
        match Transform::from_json(&json)? {
            Transform::Affine(affine) => config = config.with_initial_transform(affine),
            other => bail!(
                "initial transform must be affine, {:?} holds a {} transform",
                path,
                other.kind()
            ),
        }
    }
    Ok(config)
}

fn register_with<R: Registrar>(
    mut registrar: R,
    config: &R::Config,
    template: &Mesh,
    target: &Mesh,
) -> Result<Registration> {
    let registration = registrar.register(template, target, config)?;
    info!(
        registrar = registrar.name(),
        metric = registration.metric_value,
        iterations = registration.iterations,
        "Registration finished"
    );
    Ok(registration)
}
