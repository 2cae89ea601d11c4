//! atlas: command-line interface for building shape atlases from meshes.
//!
//! Registers template meshes onto targets, resamples them into
//! correspondence, averages populations with Procrustes alignment and runs
//! the iterative refinement loop. Volumetric helpers rasterize meshes into
//! NRRD distance fields and back.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=mesh_atlas=info` - Registration and refinement summaries
//! - `RUST_LOG=mesh_atlas::refine=debug` - Per-target refinement progress
//! - `RUST_LOG=mesh_core::timing=debug` - Performance timing
//! - `RUST_LOG=debug` - All debug output
//!
//! # Example
//!
//! ```bash
//! # Three refinement iterations over a population
//! RUST_LOG=mesh_atlas=info atlas refine template.obj femur_*.stl -o atlas.obj --iterations 3
//!
//! # Register with a saved configuration
//! atlas refine template.obj femur_*.stl -o atlas.obj --config atlas.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{distance, features, fields, info, mean, rasterize, refine, register, resample};

/// atlas - Build statistical shape atlases from triangle meshes.
///
/// Register, resample and average meshes into a common template.
#[derive(Parser)]
#[command(name = "atlas")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

/// Registration algorithm.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// B-spline deformation of distance fields under mean squares
    MeanSquares,
    /// Diffeomorphic demons on distance fields
    Diffeomorphic,
    /// Affine registration of vertex positions
    PointSet,
}

#[derive(Subcommand)]
enum Commands {
    /// Display mesh statistics
    Info {
        /// Input mesh file
        input: PathBuf,
    },

    /// Rasterize meshes into signed distance fields on one grid
    Rasterize {
        /// Input mesh files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for NRRD fields
        #[arg(short, long)]
        output: PathBuf,

        /// Copy the grid of this NRRD field instead of fitting one
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Voxels per axis
        #[arg(long, default_value = "100")]
        resolution: usize,

        /// Voxels per axis not spanned by the bounding box
        #[arg(long, default_value = "10")]
        buffer: usize,

        /// Voxels of padding before the bounding box
        #[arg(long, default_value = "5")]
        margin: usize,
    },

    /// Register a template mesh onto a target mesh
    Register {
        /// Template mesh
        template: PathBuf,

        /// Target mesh
        target: PathBuf,

        /// Output path for the registered template
        #[arg(short, long)]
        output: PathBuf,

        /// Registration algorithm
        #[arg(long, default_value = "point-set")]
        method: Method,

        /// Optimizer iteration budget
        #[arg(long)]
        iterations: Option<usize>,

        /// Seed for point subsampling
        #[arg(long)]
        seed: Option<u64>,

        /// Fraction of points used by point set registration, in (0, 1]
        #[arg(long, default_value = "1.0")]
        resample_rate: f64,

        /// Snap the registered template onto the target's vertices
        #[arg(long)]
        resample_from_target: bool,

        /// Initial affine transform as JSON (point set registration only)
        #[arg(long)]
        transform: Option<PathBuf>,

        /// Write the resulting transform as JSON
        #[arg(long)]
        save_transform: Option<PathBuf>,
    },

    /// Snap every template vertex onto its nearest target vertex
    Resample {
        /// Template mesh
        template: PathBuf,

        /// Target mesh
        target: PathBuf,

        /// Output mesh path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Procrustes mean of meshes in correspondence
    Mean {
        /// Input meshes with equal vertex counts
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output mesh path
        #[arg(short, long)]
        output: PathBuf,

        /// Procrustes convergence threshold
        #[arg(long, default_value = "0.1")]
        threshold: f64,
    },

    /// Refine a template against a population of target meshes
    Refine {
        /// Initial template mesh
        template: PathBuf,

        /// Target meshes
        #[arg(required = true)]
        targets: Vec<PathBuf>,

        /// Output path for the refined template
        #[arg(short, long)]
        output: PathBuf,

        /// TOML run configuration
        #[arg(long)]
        config: Option<PathBuf>,

        /// Refinement iterations
        #[arg(long)]
        iterations: Option<usize>,

        /// Optimizer budget per registration
        #[arg(long)]
        registration_iterations: Option<usize>,

        /// Registration algorithm, replacing the configured one
        #[arg(long)]
        method: Option<Method>,

        /// Register targets concurrently
        #[arg(long)]
        parallel: bool,

        /// Stop once the template moves less than the convergence threshold
        #[arg(long)]
        stop_on_convergence: bool,

        /// Write the effective configuration as TOML
        #[arg(long)]
        save_config: Option<PathBuf>,
    },

    /// Paste fields of equal spacing into their largest common grid
    CommonSpace {
        /// Input NRRD fields
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Downsample fields by a ratio greater than one
    Downsample {
        /// Input NRRD fields
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Spacing multiplier
        #[arg(long)]
        ratio: f64,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compare two meshes
    Distance {
        /// First mesh
        first: PathBuf,

        /// Second mesh
        second: PathBuf,
    },

    /// Write flattened vertex coordinates of meshes as CSV rows
    Features {
        /// Input meshes with equal vertex counts
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Keep every n-th vertex
        #[arg(long, default_value = "1")]
        step: usize,

        /// Output CSV path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Extract a surface mesh from a field
    Surface {
        /// Input NRRD field
        input: PathBuf,

        /// Output mesh path
        #[arg(short, long)]
        output: PathBuf,

        /// Treat the field as binary and mesh voxels with this value
        #[arg(long, conflicts_with = "level")]
        object_value: Option<f32>,

        /// Iso level of a distance field
        #[arg(long, default_value = "0.0")]
        level: f32,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over the -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "mesh_atlas=info,mesh_volume=info,mesh_core=info",
            2 => "mesh_atlas=debug,mesh_volume=debug,mesh_core=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Info { input } => info::run(input, &cli),
        Commands::Rasterize {
            inputs,
            output,
            reference,
            resolution,
            buffer,
            margin,
        } => rasterize::run(
            inputs,
            output,
            reference.as_deref(),
            *resolution,
            *buffer,
            *margin,
            &cli,
        ),
        Commands::Register {
            template,
            target,
            output,
            method,
            iterations,
            seed,
            resample_rate,
            resample_from_target,
            transform,
            save_transform,
        } => register::run(
            template,
            target,
            output,
            &register::RegisterOptions {
                method: *method,
                iterations: *iterations,
                seed: *seed,
                resample_rate: *resample_rate,
                resample_from_target: *resample_from_target,
                initial_transform: transform.clone(),
                save_transform: save_transform.clone(),
            },
            &cli,
        ),
        Commands::Resample {
            template,
            target,
            output,
        } => resample::run(template, target, output, &cli),
        Commands::Mean {
            inputs,
            output,
            threshold,
        } => mean::run(inputs, output, *threshold, &cli),
        Commands::Refine {
            template,
            targets,
            output,
            config,
            iterations,
            registration_iterations,
            method,
            parallel,
            stop_on_convergence,
            save_config,
        } => refine::run(
            template,
            targets,
            output,
            &refine::RefineOptions {
                config: config.clone(),
                iterations: *iterations,
                registration_iterations: *registration_iterations,
                method: *method,
                parallel: *parallel,
                stop_on_convergence: *stop_on_convergence,
                save_config: save_config.clone(),
            },
            &cli,
        ),
        Commands::CommonSpace { inputs, output } => fields::common_space(inputs, output, &cli),
        Commands::Downsample {
            inputs,
            ratio,
            output,
        } => fields::downsample(inputs, *ratio, output, &cli),
        Commands::Distance { first, second } => distance::run(first, second, &cli),
        Commands::Features {
            inputs,
            step,
            output,
        } => features::run(inputs, *step, output, &cli),
        Commands::Surface {
            input,
            output,
            object_value,
            level,
        } => fields::surface(input, output, *object_value, *level, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            report_error(e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Print an error with its code and suggestion when it comes from one of
/// the library crates.
fn report_error(e: &anyhow::Error) {
    eprintln!("{}: {}", "Error".red().bold(), e);
    if let Some(atlas_err) = e.downcast_ref::<mesh_atlas::AtlasError>() {
        eprintln!("  {}: {}", "Code".cyan(), atlas_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            atlas_err.recovery_suggestion()
        );
        let root = atlas_err.root_cause();
        if !std::ptr::eq(root, atlas_err) {
            eprintln!("  {}: {}", "Root cause".yellow(), root);
        }
    } else if let Some(volume_err) = e.downcast_ref::<mesh_volume::VolumeError>() {
        eprintln!("  {}: {}", "Code".cyan(), volume_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            volume_err.recovery_suggestion()
        );
        if let Some(path) = volume_err.path() {
            eprintln!("  {}: {}", "Location".yellow(), path.display());
        }
    } else if let Some(mesh_err) = e.downcast_ref::<mesh_core::MeshError>() {
        eprintln!("  {}: {}", "Code".cyan(), mesh_err.code());
        eprintln!(
            "  {}: {}",
            "Suggestion".green(),
            mesh_err.recovery_suggestion()
        );
        if let Some(location) = mesh_err.location() {
            eprintln!("  {}: {}", "Location".yellow(), location);
        }
    }
    for cause in e.chain().skip(1) {
        eprintln!("  {}: {}", "Caused by".yellow(), cause);
    }
}
