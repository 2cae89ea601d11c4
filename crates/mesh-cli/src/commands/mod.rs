//! Subcommand implementations.

pub mod distance;
pub mod features;
pub mod fields;
pub mod info;
pub mod mean;
pub mod rasterize;
pub mod refine;
pub mod register;
pub mod resample;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mesh_core::Mesh;

/// Load a mesh, naming the path on failure.
pub(crate) fn load(path: &Path) -> Result<Mesh> {
    Mesh::load(path).with_context(|| format!("Failed to load mesh from {:?}", path))
}

/// Load several meshes in order.
pub(crate) fn load_all(paths: &[PathBuf]) -> Result<Vec<Mesh>> {
    paths.iter().map(|p| load(p)).collect()
}

/// `dir/<stem of input>.<extension>`, creating `dir` when missing.
pub(crate) fn output_path(dir: &Path, input: &Path, extension: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "field".to_string());
    Ok(dir.join(format!("{stem}.{extension}")))
}
