//! Field commands - common space, downsampling and surface extraction.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use mesh_volume::{
    VolumetricField, binary_volume_to_mesh, downsample as downsample_fields, extract_isosurface,
    load_nrrd, paste_to_common_space, save_nrrd,
};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct FieldsResult {
    fields: Vec<String>,
    size: [usize; 3],
    spacing: [f64; 3],
}

#[derive(Serialize)]
struct SurfaceResult {
    output: String,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_value: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<f32>,
}

fn load_fields(paths: &[PathBuf]) -> Result<Vec<VolumetricField>> {
    paths
        .iter()
        .map(|p| load_nrrd(p).with_context(|| format!("Failed to load field from {:?}", p)))
        .collect()
}

fn write_fields(
    fields: &[VolumetricField],
    inputs: &[PathBuf],
    output_dir: &Path,
    title: &str,
    cli: &Cli,
) -> Result<()> {
    let mut written = Vec::with_capacity(fields.len());
    for (field, input) in fields.iter().zip(inputs) {
        let path = super::output_path(output_dir, input, "nrrd")?;
        save_nrrd(field, &path)?;
        written.push(path.display().to_string());
    }
    let Some(geometry) = fields.first().map(|f| &f.geometry) else {
        return Ok(());
    };
    let result = FieldsResult {
        fields: written,
        size: geometry.size,
        spacing: [geometry.spacing.x, geometry.spacing.y, geometry.spacing.z],
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", title.bold().underline());
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

pub fn common_space(inputs: &[PathBuf], output_dir: &Path, cli: &Cli) -> Result<()> {
    let fields = load_fields(inputs)?;
    let pasted = paste_to_common_space(&fields)?;
    write_fields(&pasted, inputs, output_dir, "Common Space", cli)
}

pub fn downsample(inputs: &[PathBuf], ratio: f64, output_dir: &Path, cli: &Cli) -> Result<()> {
    let fields = load_fields(inputs)?;
    let smaller = downsample_fields(&fields, ratio)?;
    write_fields(&smaller, inputs, output_dir, "Downsampled", cli)
}

pub fn surface(
    input: &Path,
    output_path: &Path,
    object_value: Option<f32>,
    level: f32,
    cli: &Cli,
) -> Result<()> {
    let field = load_nrrd(input).with_context(|| format!("Failed to load field from {:?}", input))?;
    let mesh = match object_value {
        Some(value) => binary_volume_to_mesh(&field, value)?,
        None => extract_isosurface(&field, level)?,
    };
    mesh.save(output_path)
        .with_context(|| format!("Failed to save mesh to {:?}", output_path))?;

    let result = SurfaceResult {
        output: output_path.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        object_value,
        level: object_value.is_none().then_some(level),
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Surface".bold().underline());
            println!("  {}: {}", "Vertices".cyan(), result.vertices);
            println!("  {}: {}", "Faces".cyan(), result.faces);
            output::success(
                &format!("Saved {}", output_path.display()),
                cli.format,
                cli.quiet,
            );
        }
    }
    Ok(())
}
