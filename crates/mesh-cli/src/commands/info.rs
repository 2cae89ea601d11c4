//! atlas info command - display mesh statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    centroid: Option<[f64; 3]>,
    surface_area: f64,
    valid_indices: bool,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh = super::load(input)?;

    let bounds = mesh.bounds().map(|(min, max)| {
        let dims = max - min;
        BoundsInfo {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    });

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: mesh.vertex_count(),
        faces: mesh.face_count(),
        bounds,
        centroid: mesh.centroid().map(|c| [c.x, c.y, c.z]),
        surface_area: mesh.surface_area(),
        valid_indices: mesh.validate_indices().is_ok(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&info, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Mesh Information".bold().underline());
            println!("  {}: {}", "File".cyan(), input.display());
            println!("  {}: {}", "Vertices".cyan(), info.vertices);
            println!("  {}: {}", "Faces".cyan(), info.faces);

            if let Some(ref b) = info.bounds {
                println!(
                    "  {}: {:.2} x {:.2} x {:.2}",
                    "Dimensions".cyan(),
                    b.dimensions[0],
                    b.dimensions[1],
                    b.dimensions[2]
                );
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2})",
                    "Min bounds".cyan(),
                    b.min[0],
                    b.min[1],
                    b.min[2]
                );
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2})",
                    "Max bounds".cyan(),
                    b.max[0],
                    b.max[1],
                    b.max[2]
                );
            }
            if let Some(c) = info.centroid {
                println!(
                    "  {}: ({:.2}, {:.2}, {:.2})",
                    "Centroid".cyan(),
                    c[0],
                    c[1],
                    c[2]
                );
            }
            println!("  {}: {:.2}", "Surface area".cyan(), info.surface_area);
            println!(
                "  {}: {}",
                "Face indices".cyan(),
                if info.valid_indices {
                    "valid".green()
                } else {
                    "out of range".red()
                }
            );
        }
    }

    Ok(())
}
