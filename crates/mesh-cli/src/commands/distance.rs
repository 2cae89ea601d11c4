//! atlas distance command - compare two meshes.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use mesh_core::{max_vertex_displacement, symmetric_hausdorff_distance};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct DistanceResult {
    first: String,
    second: String,
    /// Only defined for meshes in correspondence.
    #[serde(skip_serializing_if = "Option::is_none")]
    max_vertex_displacement: Option<f64>,
    hausdorff: f64,
}

pub fn run(first_path: &Path, second_path: &Path, cli: &Cli) -> Result<()> {
    let first = super::load(first_path)?;
    let second = super::load(second_path)?;

    let displacement = if first.vertex_count() == second.vertex_count() {
        Some(max_vertex_displacement(&first, &second)?)
    } else {
        None
    };
    let hausdorff = symmetric_hausdorff_distance(&first, &second)?;

    let result = DistanceResult {
        first: first_path.display().to_string(),
        second: second_path.display().to_string(),
        max_vertex_displacement: displacement,
        hausdorff,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Distance".bold().underline());
            match result.max_vertex_displacement {
                Some(d) => println!("  {}: {:.6}", "Max vertex displacement".cyan(), d),
                None => println!(
                    "  {}: {}",
                    "Max vertex displacement".cyan(),
                    "vertex counts differ".yellow()
                ),
            }
            println!("  {}: {:.6}", "Hausdorff".cyan(), result.hausdorff);
        }
    }

    Ok(())
}
