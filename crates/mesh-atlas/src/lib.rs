//! Mesh registration and iterative shape atlas construction.
//!
//! - **Registration**: three [`Registrar`]s taking a template mesh onto a
//!   target, over distance fields or directly over vertex positions
//! - **Transforms**: identity, rigid, affine, B-spline and displacement field,
//!   serializable as JSON
//! - **Procrustes**: rigid generalized Procrustes mean of meshes in
//!   correspondence
//! - **Refinement**: the register, resample and align loop that turns a
//!   template and a population into an atlas
//! - **Features**: flattened vertex coordinates for shape statistics
//! - **Configuration**: one TOML document describing a whole run
//!
//! # Example
//!
//! ```no_run
//! use mesh_atlas::{PointSetEntropyConfig, PointSetEntropyRegistrar, RefineParams};
//! use mesh_atlas::refine_template_from_population;
//! use mesh_core::Mesh;
//!
//! let template = Mesh::load("template.obj").unwrap();
//! let targets = vec![
//!     Mesh::load("femur_01.stl").unwrap(),
//!     Mesh::load("femur_02.stl").unwrap(),
//! ];
//!
//! let atlas = refine_template_from_population(
//!     &template,
//!     &targets,
//!     PointSetEntropyRegistrar::new(),
//!     PointSetEntropyConfig::for_refinement(),
//!     RefineParams::default().with_iterations(3),
//! )
//! .unwrap();
//! assert_eq!(atlas.faces, template.faces);
//! ```

mod error;

pub mod config;
pub mod features;
pub mod optimize;
pub mod procrustes;
pub mod refine;
pub mod registration;
pub mod transform;

pub use config::{AtlasConfig, RegistrarConfig};
pub use error::{AtlasError, AtlasErrorCode, AtlasRecoverySuggestion, AtlasResult};
pub use features::make_point_features;
pub use optimize::StopReason;
pub use procrustes::{ProcrustesAlignment, ProcrustesParams, generalized_procrustes, mean_shape};
pub use refine::{
    AtlasRefinementLoop, AtlasState, IterationRecord, RefineParams, RefinementResult,
    RefinementStage, refine_template_from_population,
};
pub use registration::{
    DiffeomorphicConfig, DiffeomorphicRegistrar, MeanSquaresConfig, MeanSquaresRegistrar,
    PointSetEntropyConfig, PointSetEntropyRegistrar, PointSetMetric, Registrar, Registration,
    RegistrationConfig,
};
pub use transform::{
    AffineTransform, BSplineTransform, DisplacementFieldTransform, RigidTransform, Transform,
    apply_transform_to_mesh,
};
