//! atlas features command - flattened vertex coordinates as CSV.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mesh_atlas::make_point_features;
use serde::Serialize;

use crate::{Cli, output};

#[derive(Serialize)]
struct FeaturesResult {
    output: String,
    rows: usize,
    columns: usize,
}

pub fn run(inputs: &[PathBuf], step: usize, output_path: &Path, cli: &Cli) -> Result<()> {
    let meshes = super::load_all(inputs)?;
    let features = make_point_features(&meshes, step)?;

    let mut csv = String::new();
    for row in features.row_iter() {
        let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        writeln!(csv, "{}", line.join(","))?;
    }
    std::fs::write(output_path, csv)
        .with_context(|| format!("Failed to write features to {:?}", output_path))?;

    let result = FeaturesResult {
        output: output_path.display().to_string(),
        rows: features.nrows(),
        columns: features.ncols(),
    };
    output::print(&result, cli.format, cli.quiet);
    output::success(
        &format!(
            "Wrote {} x {} features to {}",
            result.rows,
            result.columns,
            output_path.display()
        ),
        cli.format,
        cli.quiet,
    );
    Ok(())
}
