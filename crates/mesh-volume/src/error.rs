// Allow unused_assignments lint for error struct fields that are used in thiserror Display macros
// but appear as "never read" to the compiler.
#![allow(unused_assignments)]

//! Error types for volumetric field operations.
//!
//! Codes follow the pattern `VOL-XXXX` where:
//! - 1xxx = Input validation errors
//! - 2xxx = Grid compatibility errors
//! - 3xxx = Persistence errors

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias for volume operations.
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Machine-readable error codes for volume operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeErrorCode {
    /// VOL-1001: Empty or degenerate geometry
    InvalidGeometry = 1001,
    /// VOL-1002: Downsampling ratio out of range
    InvalidRatio = 1002,
    /// VOL-1003: Value buffer does not match the grid
    ValueCountMismatch = 1003,
    /// VOL-1004: Operation parameter out of range
    InvalidParameter = 1004,

    /// VOL-2001: Fields do not share spacing
    SpacingMismatch = 2001,

    /// VOL-3001: Failed to read a field file
    IoRead = 3001,
    /// VOL-3002: Failed to write a field file
    IoWrite = 3002,
    /// VOL-3003: Malformed field file
    Parse = 3003,

    /// VOL-4001: Underlying mesh error
    Mesh = 4001,
}

impl VolumeErrorCode {
    /// Returns the error code as a string in the format `VOL-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeErrorCode::InvalidGeometry => "VOL-1001",
            VolumeErrorCode::InvalidRatio => "VOL-1002",
            VolumeErrorCode::ValueCountMismatch => "VOL-1003",
            VolumeErrorCode::InvalidParameter => "VOL-1004",
            VolumeErrorCode::SpacingMismatch => "VOL-2001",
            VolumeErrorCode::IoRead => "VOL-3001",
            VolumeErrorCode::IoWrite => "VOL-3002",
            VolumeErrorCode::Parse => "VOL-3003",
            VolumeErrorCode::Mesh => "VOL-4001",
        }
    }
}

impl std::fmt::Display for VolumeErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for volume errors.
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeRecoverySuggestion {
    /// Check the input meshes.
    CheckInputMeshes,
    /// Rasterize all fields against one reference.
    UseSharedReference,
    /// Pick a ratio that keeps at least one voxel per axis.
    AdjustRatio,
    /// Re-export the field file.
    ReexportField,
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for VolumeRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeRecoverySuggestion::CheckInputMeshes => {
                write!(f, "Check that every input mesh has vertices and a closed surface")
            }
            VolumeRecoverySuggestion::UseSharedReference => {
                write!(
                    f,
                    "Rasterize the fields together, or pass the first field as the reference"
                )
            }
            VolumeRecoverySuggestion::AdjustRatio => write!(
                f,
                "Use a finite ratio greater than 1.0 and no larger than the smallest grid size"
            ),
            VolumeRecoverySuggestion::ReexportField => {
                write!(f, "Re-export the field as NRRD with raw float data")
            }
            VolumeRecoverySuggestion::None => {
                write!(f, "No specific suggestion available")
            }
        }
    }
}

/// Errors that can occur during volume operations.
#[derive(Debug, Error, Diagnostic)]
pub enum VolumeError {
    /// Empty mesh, empty object or degenerate grid.
    #[error("invalid geometry: {details}")]
    #[diagnostic(
        code(volume::geometry::invalid),
        help(
            "Rasterization needs meshes with vertices and a non-zero extent, and distance transforms need at least one inside voxel."
        )
    )]
    InvalidGeometry { details: String },

    /// Fields that must share spacing do not.
    #[error(
        "spacing mismatch: field #{index} has spacing {found} on axis {axis}, expected {expected}"
    )]
    #[diagnostic(
        code(volume::grid::spacing_mismatch),
        help("Fields pasted into a common space must be rasterized with the same spacing.")
    )]
    SpacingMismatch {
        index: usize,
        axis: usize,
        expected: f64,
        found: f64,
    },

    /// Downsampling ratio out of range.
    #[error("invalid downsampling ratio {ratio}: {details}")]
    #[diagnostic(
        code(volume::resample::invalid_ratio),
        help("The ratio must be finite, greater than 1.0 and small enough to keep a voxel per axis.")
    )]
    InvalidRatio { ratio: f64, details: String },

    /// Value buffer length does not match the grid.
    #[error("grid {size:?} needs {expected} values, got {found}")]
    #[diagnostic(code(volume::field::value_count))]
    ValueCountMismatch {
        size: [usize; 3],
        expected: usize,
        found: usize,
    },

    /// Operation parameter out of range.
    #[error("invalid parameter {name}: {details}")]
    #[diagnostic(code(volume::parameter::invalid))]
    InvalidParameter { name: &'static str, details: String },

    /// Error reading a field file.
    #[error("failed to read field from {path}")]
    #[diagnostic(
        code(volume::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing a field file.
    #[error("failed to write field to {path}")]
    #[diagnostic(code(volume::io::write), help("Check that the directory exists and is writable"))]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed field file.
    #[error("failed to parse field from {path}: {details}")]
    #[diagnostic(
        code(volume::parse::error),
        help("Only NRRD files with raw little-endian float data are supported.")
    )]
    Parse { path: PathBuf, details: String },

    /// Underlying mesh error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(volume::mesh::error))]
    Mesh(#[from] mesh_core::MeshError),
}

impl VolumeError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> VolumeErrorCode {
        match self {
            VolumeError::InvalidGeometry { .. } => VolumeErrorCode::InvalidGeometry,
            VolumeError::SpacingMismatch { .. } => VolumeErrorCode::SpacingMismatch,
            VolumeError::InvalidRatio { .. } => VolumeErrorCode::InvalidRatio,
            VolumeError::ValueCountMismatch { .. } => VolumeErrorCode::ValueCountMismatch,
            VolumeError::InvalidParameter { .. } => VolumeErrorCode::InvalidParameter,
            VolumeError::IoRead { .. } => VolumeErrorCode::IoRead,
            VolumeError::IoWrite { .. } => VolumeErrorCode::IoWrite,
            VolumeError::Parse { .. } => VolumeErrorCode::Parse,
            VolumeError::Mesh(_) => VolumeErrorCode::Mesh,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> VolumeRecoverySuggestion {
        match self {
            VolumeError::InvalidGeometry { .. } => VolumeRecoverySuggestion::CheckInputMeshes,
            VolumeError::SpacingMismatch { .. } => VolumeRecoverySuggestion::UseSharedReference,
            VolumeError::InvalidRatio { .. } => VolumeRecoverySuggestion::AdjustRatio,
            VolumeError::ValueCountMismatch { .. } | VolumeError::InvalidParameter { .. } => {
                VolumeRecoverySuggestion::None
            }
            VolumeError::IoRead { .. } | VolumeError::IoWrite { .. } => {
                VolumeRecoverySuggestion::None
            }
            VolumeError::Parse { .. } => VolumeRecoverySuggestion::ReexportField,
            VolumeError::Mesh(_) => VolumeRecoverySuggestion::CheckInputMeshes,
        }
    }

    /// Returns the offending file path, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            VolumeError::IoRead { path, .. }
            | VolumeError::IoWrite { path, .. }
            | VolumeError::Parse { path, .. } => Some(path),
            _ => None,
        }
    }

    // Constructor helpers

    /// Create an InvalidGeometry error.
    pub fn invalid_geometry(details: impl Into<String>) -> Self {
        VolumeError::InvalidGeometry {
            details: details.into(),
        }
    }

    /// Create a SpacingMismatch error.
    pub fn spacing_mismatch(index: usize, axis: usize, expected: f64, found: f64) -> Self {
        VolumeError::SpacingMismatch {
            index,
            axis,
            expected,
            found,
        }
    }

    /// Create an InvalidRatio error.
    pub fn invalid_ratio(ratio: f64, details: impl Into<String>) -> Self {
        VolumeError::InvalidRatio {
            ratio,
            details: details.into(),
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        VolumeError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VolumeError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a Parse error.
    pub fn parse(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        VolumeError::Parse {
            path: path.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = VolumeError::spacing_mismatch(2, 1, 0.5, 0.6);
        assert_eq!(err.code(), VolumeErrorCode::SpacingMismatch);
        assert_eq!(err.code().as_str(), "VOL-2001");

        let err = VolumeError::invalid_ratio(0.5, "must be > 1");
        assert_eq!(err.code().as_str(), "VOL-1002");
    }

    #[test]
    fn test_ratio_suggestion() {
        let err = VolumeError::invalid_ratio(f64::NAN, "not finite");
        assert_eq!(
            err.recovery_suggestion(),
            VolumeRecoverySuggestion::AdjustRatio
        );
    }

    #[test]
    fn test_error_display() {
        let err = VolumeError::spacing_mismatch(3, 2, 1.0, 1.25);
        let display = format!("{}", err);
        assert!(display.contains("field #3"));
        assert!(display.contains("axis 2"));
    }

    #[test]
    fn test_from_mesh_error() {
        let mesh_err = mesh_core::MeshError::invalid_geometry("empty");
        let err: VolumeError = mesh_err.into();
        assert!(matches!(err, VolumeError::Mesh(_)));
        assert_eq!(err.code(), VolumeErrorCode::Mesh);
    }
}
