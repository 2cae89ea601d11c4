//! atlas resample command - snap template vertices onto a target.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_core::{max_vertex_displacement, resample_onto_target};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ResampleResult {
    output: String,
    vertices: usize,
    faces: usize,
    max_displacement: f64,
}

pub fn run(template_path: &Path, target_path: &Path, output_path: &Path, cli: &Cli) -> Result<()> {
    let template = super::load(template_path)?;
    let target = super::load(target_path)?;

    let resampled = resample_onto_target(&template, &target)?;
    let max_displacement = max_vertex_displacement(&resampled, &template)?;
    resampled
        .save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    let result = ResampleResult {
        output: output_path.display().to_string(),
        vertices: resampled.vertex_count(),
        faces: resampled.face_count(),
        max_displacement,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Resampling".bold().underline());
            println!("  {}: {}", "Vertices".cyan(), result.vertices);
            println!("  {}: {}", "Faces".cyan(), result.faces);
            println!(
                "  {}: {:.4}",
                "Largest vertex move".cyan(),
                result.max_displacement
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
