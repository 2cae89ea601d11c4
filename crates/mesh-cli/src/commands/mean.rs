//! atlas mean command - Procrustes mean of meshes in correspondence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use colored::Colorize;
use mesh_atlas::{ProcrustesParams, generalized_procrustes};
use nalgebra::Point3;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeanResult {
    output: String,
    meshes: usize,
    vertices: usize,
    iterations: usize,
    mean_points_difference: f64,
    converged: bool,
}

pub fn run(inputs: &[PathBuf], output_path: &Path, threshold: f64, cli: &Cli) -> Result<()> {
    let meshes = super::load_all(inputs)?;
    let Some(first) = meshes.first() else {
        bail!("no input meshes");
    };

    let shapes: Vec<Vec<Point3<f64>>> = meshes.iter().map(|m| m.positions()).collect();
    let params = ProcrustesParams::default().with_convergence_threshold(threshold);
    let alignment = generalized_procrustes(&shapes, &params)?;

    let mean = first.with_positions(alignment.mean)?;
    mean.save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    let result = MeanResult {
        output: output_path.display().to_string(),
        meshes: meshes.len(),
        vertices: mean.vertex_count(),
        iterations: alignment.iterations,
        mean_points_difference: alignment.mean_points_difference,
        converged: alignment.converged,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Procrustes Mean".bold().underline());
            println!("  {}: {}", "Meshes".cyan(), result.meshes);
            println!("  {}: {}", "Vertices".cyan(), result.vertices);
            println!("  {}: {}", "Iterations".cyan(), result.iterations);
            println!(
                "  {}: {:.6}",
                "Last change".cyan(),
                result.mean_points_difference
            );
            if !result.converged {
                println!("  {}", "Did not converge".yellow());
            }
            output::success(
                &format!("Saved {}", output_path.display()),
                cli.format,
                cli.quiet,
            );
        }
    }

    Ok(())
}
