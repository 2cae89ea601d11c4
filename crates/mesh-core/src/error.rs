//! Errors for mesh I/O, geometry checks and correspondence.
//!
//! Every [`MeshError`] has a stable code, a suggested fix and, where one
//! exists, the vertex, face, population member or file it refers to.
//! Terminal rendering goes through miette.
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-1xxx`: I/O errors (file reading, writing, parsing)
//! - `MESH-2xxx`: Geometry and correspondence errors
//! - `MESH-3xxx`: Parameter errors
//! - `MESH-4xxx`: Format errors
//!
//! # Example
//!
//! ```rust,ignore
//! use mesh_core::{MeshError, ErrorCode};
//!
//! let err = MeshError::correspondence_mismatch(1000, 998, 3);
//! println!("Error code: {}", err.code()); // MESH-2010
//! println!("Recovery: {}", err.recovery_suggestion());
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

pub type MeshResult<T> = Result<T, MeshError>;

/// Stable error codes, printed as `MESH-XXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// MESH-1001: Failed to read file
    IoRead = 1001,
    /// MESH-1002: Failed to write file
    IoWrite = 1002,
    /// MESH-1003: Failed to parse file format
    ParseError = 1003,

    // Geometry errors (2xxx)
    /// MESH-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// MESH-2002: Vertex has NaN or Infinity coordinate
    InvalidCoordinate = 2002,
    /// MESH-2003: Mesh is empty or degenerate
    InvalidGeometry = 2003,
    /// MESH-2010: Meshes are not in vertex correspondence
    CorrespondenceMismatch = 2010,

    // Parameter errors (3xxx)
    /// MESH-3001: Operation parameter out of range
    InvalidParameter = 3001,

    // Format errors (4xxx)
    /// MESH-4001: Unsupported file format
    UnsupportedFormat = 4001,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ParseError => "MESH-1003",
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::InvalidCoordinate => "MESH-2002",
            ErrorCode::InvalidGeometry => "MESH-2003",
            ErrorCode::CorrespondenceMismatch => "MESH-2010",
            ErrorCode::InvalidParameter => "MESH-3001",
            ErrorCode::UnsupportedFormat => "MESH-4001",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the caller can do about a [`MeshError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySuggestion {
    /// Save the mesh again, optionally in a specific format.
    ExportAgain { format: Option<&'static str> },
    /// Convert the file to one of the readable formats.
    ConvertTo { formats: &'static [&'static str] },
    /// Inspect the input for the listed problems.
    CheckInput { checks: &'static [&'static str] },
    /// Change the named parameter.
    AdjustParameter { name: &'static str, details: String },
    /// Resample the inputs onto a common template first.
    EstablishCorrespondence,
    None,
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoverySuggestion::ExportAgain { format: Some(format) } => {
                write!(f, "Save the mesh again as {format}")
            }
            RecoverySuggestion::ExportAgain { format: None } => {
                write!(f, "Save the mesh again from the segmentation tool")
            }
            RecoverySuggestion::ConvertTo { formats } => {
                write!(f, "Convert the mesh to {}", formats.join(" or "))
            }
            RecoverySuggestion::CheckInput { checks } => {
                write!(f, "Check the input for {}", checks.join(" and "))
            }
            RecoverySuggestion::AdjustParameter { name, details } => {
                write!(f, "Change {name}: {details}")
            }
            RecoverySuggestion::EstablishCorrespondence => {
                write!(
                    f,
                    "Register and resample every mesh from one template so they share topology"
                )
            }
            RecoverySuggestion::None => write!(f, "No automatic recovery available"),
        }
    }
}

/// Part of the input a [`MeshError`] points at.
#[derive(Debug, Clone)]
pub enum MeshLocation {
    /// Error at a specific vertex.
    Vertex { index: usize },
    /// Error at a specific face.
    Face {
        index: usize,
        vertices: Option<[u32; 3]>,
    },
    /// Error at a specific member of a mesh population.
    Population { index: usize },
    /// Error in a file.
    File { path: PathBuf },
}

impl std::fmt::Display for MeshLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshLocation::Vertex { index } => write!(f, "vertex {}", index),
            MeshLocation::Face { index, vertices } => {
                write!(f, "face {}", index)?;
                if let Some(v) = vertices {
                    write!(f, " [{}, {}, {}]", v[0], v[1], v[2])?;
                }
                Ok(())
            }
            MeshLocation::Population { index } => write!(f, "mesh #{} of the population", index),
            MeshLocation::File { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Errors that can occur during mesh operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}")]
    #[diagnostic(
        code(mesh::io::read),
        help("Check that the file exists and is readable. Try: ls -la {}", path.display())
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(mesh::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing mesh file format.
    #[error("failed to parse mesh from {path}: {details}")]
    #[diagnostic(
        code(mesh::parse::error),
        help(
            "The file may be corrupted or in an unsupported format variant. Try re-exporting from the original software."
        )
    )]
    ParseError { path: PathBuf, details: String },

    /// Unsupported file format.
    #[error("unsupported mesh format: {extension:?}")]
    #[diagnostic(code(mesh::format::unsupported), help("Supported formats: STL, OBJ, PLY"))]
    UnsupportedFormat { extension: Option<String> },

    /// Empty or degenerate mesh input.
    #[error("invalid geometry: {details}")]
    #[diagnostic(
        code(mesh::geometry::invalid),
        help("The operation needs a mesh with at least one vertex and a non-degenerate extent.")
    )]
    InvalidGeometry { details: String },

    /// Meshes that must be in correspondence have different vertex counts.
    #[error(
        "correspondence mismatch: mesh #{mesh_index} has {found} vertices, expected {expected}"
    )]
    #[diagnostic(
        code(mesh::correspondence::mismatch),
        help(
            "Correspondence meshes must share vertex count and topology. Resample every mesh from the same template first."
        )
    )]
    CorrespondenceMismatch {
        expected: usize,
        found: usize,
        mesh_index: usize,
    },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Check the mesh export settings; faces must only reference existing vertices.")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Invalid coordinate value (NaN or Infinity).
    #[error("invalid coordinate at vertex {vertex_index}: {coordinate} is {value}")]
    #[diagnostic(
        code(mesh::validation::coordinate),
        help(
            "Check for numerical issues in the source data. This often happens with very small or very large values."
        )
    )]
    InvalidCoordinate {
        vertex_index: usize,
        coordinate: &'static str,
        value: f64,
    },

    /// Operation parameter out of range.
    #[error("invalid parameter {name}: {details}")]
    #[diagnostic(code(mesh::parameter::invalid))]
    InvalidParameter { name: &'static str, details: String },
}

impl MeshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ParseError { .. } => ErrorCode::ParseError,
            MeshError::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            MeshError::InvalidGeometry { .. } => ErrorCode::InvalidGeometry,
            MeshError::CorrespondenceMismatch { .. } => ErrorCode::CorrespondenceMismatch,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            MeshError::InvalidParameter { .. } => ErrorCode::InvalidParameter,
        }
    }

    /// Suggested fix for this error.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            MeshError::IoRead { .. } => RecoverySuggestion::CheckInput {
                checks: &["a missing file", "read permissions"],
            },
            MeshError::IoWrite { .. } => RecoverySuggestion::CheckInput {
                checks: &["a missing output directory", "free disk space"],
            },
            MeshError::ParseError { .. } => RecoverySuggestion::ExportAgain {
                format: Some("binary STL"),
            },
            MeshError::UnsupportedFormat { .. } => RecoverySuggestion::ConvertTo {
                formats: &["STL", "OBJ", "PLY"],
            },
            MeshError::InvalidGeometry { .. } => RecoverySuggestion::CheckInput {
                checks: &["empty meshes", "failed segmentations"],
            },
            MeshError::CorrespondenceMismatch { .. } => RecoverySuggestion::EstablishCorrespondence,
            MeshError::InvalidVertexIndex { .. } => RecoverySuggestion::ExportAgain { format: None },
            MeshError::InvalidCoordinate { .. } => RecoverySuggestion::CheckInput {
                checks: &["non-finite coordinates", "unit scaling"],
            },
            MeshError::InvalidParameter { name, details } => RecoverySuggestion::AdjustParameter {
                name: *name,
                details: details.clone(),
            },
        }
    }

    /// Where in the input the error was found.
    pub fn location(&self) -> Option<MeshLocation> {
        match self {
            MeshError::InvalidVertexIndex { face_index, .. } => Some(MeshLocation::Face {
                index: *face_index,
                vertices: None,
            }),
            MeshError::InvalidCoordinate { vertex_index, .. } => Some(MeshLocation::Vertex {
                index: *vertex_index,
            }),
            MeshError::CorrespondenceMismatch { mesh_index, .. } => {
                Some(MeshLocation::Population { index: *mesh_index })
            }
            MeshError::ParseError { path, .. }
            | MeshError::IoRead { path, .. }
            | MeshError::IoWrite { path, .. } => Some(MeshLocation::File { path: path.clone() }),
            _ => None,
        }
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        MeshError::ParseError {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create an InvalidGeometry error.
    pub fn invalid_geometry(details: impl Into<String>) -> Self {
        MeshError::InvalidGeometry {
            details: details.into(),
        }
    }

    /// Create a CorrespondenceMismatch error.
    pub fn correspondence_mismatch(expected: usize, found: usize, mesh_index: usize) -> Self {
        MeshError::CorrespondenceMismatch {
            expected,
            found,
            mesh_index,
        }
    }

    /// Create an InvalidVertexIndex error.
    pub fn invalid_vertex_index(face_index: usize, vertex_index: u32, vertex_count: usize) -> Self {
        MeshError::InvalidVertexIndex {
            face_index,
            vertex_index,
            vertex_count,
        }
    }

    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(vertex_index: usize, coordinate: &'static str, value: f64) -> Self {
        MeshError::InvalidCoordinate {
            vertex_index,
            coordinate,
            value,
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: &'static str, details: impl Into<String>) -> Self {
        MeshError::InvalidParameter {
            name,
            details: details.into(),
        }
    }

    /// Create an UnsupportedFormat error.
    pub fn unsupported_format(extension: Option<String>) -> Self {
        MeshError::UnsupportedFormat { extension }
    }
}
