//! atlas rasterize command - meshes to signed distance fields on one grid.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_volume::{RasterizeParams, load_nrrd, rasterize, save_nrrd};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct RasterizeResult {
    fields: Vec<String>,
    size: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    from_reference: bool,
}

pub fn run(
    inputs: &[PathBuf],
    output_dir: &Path,
    reference: Option<&Path>,
    resolution: usize,
    buffer: usize,
    margin: usize,
    cli: &Cli,
) -> Result<()> {
    let meshes = super::load_all(inputs)?;
    let reference = reference
        .map(|path| {
            load_nrrd(path).with_context(|| format!("Failed to load reference field {:?}", path))
        })
        .transpose()?;

    let params = RasterizeParams::default()
        .with_resolution(resolution)
        .with_buffer(buffer)
        .with_margin(margin);

    output::info(
        &format!("Rasterizing {} meshes", meshes.len()),
        cli.format,
        cli.quiet,
    );
    let fields = rasterize(&meshes, reference.as_ref(), &params)?;

    let mut written = Vec::with_capacity(fields.len());
    for (field, input) in fields.iter().zip(inputs) {
        let path = super::output_path(output_dir, input, "nrrd")?;
        save_nrrd(field, &path)?;
        written.push(path.display().to_string());
    }

    let Some(geometry) = fields.first().map(|f| &f.geometry) else {
        return Ok(());
    };
    let result = RasterizeResult {
        fields: written,
        size: geometry.size,
        spacing: [geometry.spacing.x, geometry.spacing.y, geometry.spacing.z],
        origin: [geometry.origin.x, geometry.origin.y, geometry.origin.z],
        from_reference: reference.is_some(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Rasterization".bold().underline());
            println!(
                "  {}: {} x {} x {}",
                "Grid".cyan(),
                result.size[0],
                result.size[1],
                result.size[2]
            );
            println!(
                "  {}: ({:.3}, {:.3}, {:.3})",
                "Spacing".cyan(),
                result.spacing[0],
                result.spacing[1],
                result.spacing[2]
            );
            for path in &result.fields {
                println!("  {}: {}", "Wrote".cyan(), path);
            }
        }
    }

    Ok(())
}
