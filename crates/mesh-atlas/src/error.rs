// Allow unused_assignments lint for error struct fields that are used in thiserror Display macros
// but appear as "never read" to the compiler.
#![allow(unused_assignments)]

//! Error types for registration and atlas construction.
//!
//! Codes follow the pattern `ATLAS-XXXX` where:
//! - 1xxx = Input validation errors
//! - 2xxx = Solver errors
//! - 3xxx = Refinement errors
//! - 4xxx = Configuration and persistence errors
//! - 5xxx = Wrapped lower-level errors

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::refine::RefinementStage;

/// Result type alias for atlas operations.
pub type AtlasResult<T> = Result<T, AtlasError>;

/// Machine-readable error codes for atlas operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtlasErrorCode {
    /// ATLAS-1001: Template or target unusable for registration
    RegistrationInput = 1001,
    /// ATLAS-1002: Parameter out of range
    InvalidParameter = 1002,

    /// ATLAS-2001: Metric could not be evaluated
    Metric = 2001,

    /// ATLAS-3001: A refinement stage failed
    StageFailed = 3001,

    /// ATLAS-4001: Malformed configuration
    ConfigParse = 4001,
    /// ATLAS-4002: Configuration file unreadable or unwritable
    ConfigIo = 4002,
    /// ATLAS-4003: Malformed transform document
    TransformParse = 4003,

    /// ATLAS-5001: Underlying mesh error
    Mesh = 5001,
    /// ATLAS-5002: Underlying volume error
    Volume = 5002,
}

impl AtlasErrorCode {
    /// Returns the error code as a string in the format `ATLAS-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AtlasErrorCode::RegistrationInput => "ATLAS-1001",
            AtlasErrorCode::InvalidParameter => "ATLAS-1002",
            AtlasErrorCode::Metric => "ATLAS-2001",
            AtlasErrorCode::StageFailed => "ATLAS-3001",
            AtlasErrorCode::ConfigParse => "ATLAS-4001",
            AtlasErrorCode::ConfigIo => "ATLAS-4002",
            AtlasErrorCode::TransformParse => "ATLAS-4003",
            AtlasErrorCode::Mesh => "ATLAS-5001",
            AtlasErrorCode::Volume => "ATLAS-5002",
        }
    }
}

impl std::fmt::Display for AtlasErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for atlas errors.
#[derive(Debug, Clone, PartialEq)]
pub enum AtlasRecoverySuggestion {
    /// Check that template and targets are non-empty surfaces.
    CheckInputMeshes,
    /// Resample meshes onto one template before aligning them.
    ResampleToTemplate,
    /// Move the meshes closer or enlarge the rasterization margin.
    IncreaseOverlap,
    /// Fix the configuration value named in the message.
    FixConfiguration,
    /// Inspect the wrapped error of a refinement stage.
    InspectStage {
        iteration: usize,
        stage: RefinementStage,
    },
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for AtlasRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtlasRecoverySuggestion::CheckInputMeshes => {
                write!(f, "Check that the template and every target have vertices")
            }
            AtlasRecoverySuggestion::ResampleToTemplate => write!(
                f,
                "Resample every mesh onto the same template so vertex counts and faces agree"
            ),
            AtlasRecoverySuggestion::IncreaseOverlap => write!(
                f,
                "Roughly pre-align the meshes, or raise the rasterization margin"
            ),
            AtlasRecoverySuggestion::FixConfiguration => {
                write!(f, "Correct the configuration value named in the message")
            }
            AtlasRecoverySuggestion::InspectStage { iteration, stage } => write!(
                f,
                "Iteration {} failed while {}; see the underlying error",
                iteration, stage
            ),
            AtlasRecoverySuggestion::None => {
                write!(f, "No specific suggestion available")
            }
        }
    }
}

/// Errors that can occur during registration and atlas construction.
#[derive(Debug, Error, Diagnostic)]
pub enum AtlasError {
    /// Template or target has no vertices, or a registrar option is out of range.
    #[error("registration input error: {details}")]
    #[diagnostic(
        code(atlas::registration::input),
        help("Registration needs a non-empty template and target; resample_rate must lie in (0, 1].")
    )]
    RegistrationInput { details: String },

    /// Parameter out of range.
    #[error("invalid parameter {name}: {details}")]
    #[diagnostic(code(atlas::parameter::invalid))]
    InvalidParameter { name: &'static str, details: String },

    /// Metric has nothing to compare.
    #[error("metric evaluation failed: {details}")]
    #[diagnostic(
        code(atlas::metric::empty),
        help("The moving image left the fixed domain entirely. Check the initial alignment.")
    )]
    Metric { details: String },

    /// A refinement stage failed; wraps the underlying error.
    #[error("refinement iteration {iteration} failed while {stage}{}", target.map(|t| format!(" target #{}", t)).unwrap_or_default())]
    #[diagnostic(code(atlas::refine::stage_failed))]
    StageFailed {
        iteration: usize,
        stage: RefinementStage,
        target: Option<usize>,
        #[source]
        source: Box<AtlasError>,
    },

    /// Malformed TOML configuration.
    #[error("invalid configuration{}: {details}", path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    #[diagnostic(
        code(atlas::config::parse),
        help("See AtlasConfig::default().to_toml_string() for a complete example.")
    )]
    ConfigParse {
        path: Option<PathBuf>,
        details: String,
    },

    /// Configuration file unreadable or unwritable.
    #[error("failed to access configuration {path}")]
    #[diagnostic(code(atlas::config::io))]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed transform JSON.
    #[error("invalid transform: {details}")]
    #[diagnostic(code(atlas::transform::parse))]
    TransformParse { details: String },

    /// Underlying mesh error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(atlas::mesh::error))]
    Mesh(#[from] mesh_core::MeshError),

    /// Underlying volume error.
    #[error("volume operation failed: {0}")]
    #[diagnostic(code(atlas::volume::error))]
    Volume(#[from] mesh_volume::VolumeError),
}

impl AtlasError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> AtlasErrorCode {
        match self {
            AtlasError::RegistrationInput { .. } => AtlasErrorCode::RegistrationInput,
            AtlasError::InvalidParameter { .. } => AtlasErrorCode::InvalidParameter,
            AtlasError::Metric { .. } => AtlasErrorCode::Metric,
            AtlasError::StageFailed { .. } => AtlasErrorCode::StageFailed,
            AtlasError::ConfigParse { .. } => AtlasErrorCode::ConfigParse,
            AtlasError::ConfigIo { .. } => AtlasErrorCode::ConfigIo,
            AtlasError::TransformParse { .. } => AtlasErrorCode::TransformParse,
            AtlasError::Mesh(_) => AtlasErrorCode::Mesh,
            AtlasError::Volume(_) => AtlasErrorCode::Volume,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> AtlasRecoverySuggestion {
        match self {
            AtlasError::RegistrationInput { .. } => AtlasRecoverySuggestion::CheckInputMeshes,
            AtlasError::InvalidParameter { .. }
            | AtlasError::ConfigParse { .. }
            | AtlasError::TransformParse { .. } => AtlasRecoverySuggestion::FixConfiguration,
            AtlasError::Metric { .. } => AtlasRecoverySuggestion::IncreaseOverlap,
            AtlasError::StageFailed {
                iteration, stage, ..
            } => AtlasRecoverySuggestion::InspectStage {
                iteration: *iteration,
                stage: *stage,
            },
            AtlasError::Mesh(mesh_core::MeshError::CorrespondenceMismatch { .. }) => {
                AtlasRecoverySuggestion::ResampleToTemplate
            }
            AtlasError::Mesh(_) => AtlasRecoverySuggestion::CheckInputMeshes,
            AtlasError::ConfigIo { .. } | AtlasError::Volume(_) => AtlasRecoverySuggestion::None,
        }
    }

    /// The innermost error, unwrapping any stage failures.
    pub fn root_cause(&self) -> &AtlasError {
        match self {
            AtlasError::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    // Constructor helpers

    /// Create a RegistrationInput error.
    pub fn registration_input(details: impl Into<String>) -> Self {
        AtlasError::RegistrationInput {
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        AtlasError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Create a Metric error.
    pub fn metric(details: impl Into<String>) -> Self {
        AtlasError::Metric {
            details: details.into(),
        }
    }

    /// Create a CorrespondenceMismatch error wrapped as a mesh error.
    pub fn correspondence_mismatch(expected: usize, found: usize, mesh_index: usize) -> Self {
        AtlasError::Mesh(mesh_core::MeshError::correspondence_mismatch(
            expected, found, mesh_index,
        ))
    }

    /// Wrap `self` as the failure of a refinement stage.
    pub fn in_stage(self, iteration: usize, stage: RefinementStage, target: Option<usize>) -> Self {
        AtlasError::StageFailed {
            iteration,
            stage,
            target,
            source: Box::new(self),
        }
    }
}
