//! Mesh model and correspondence primitives for shape atlas construction.
//!
//! This crate holds the parts of the atlas pipeline that work on plain
//! vertex/face data:
//!
//! - **Types**: [`Mesh`], [`Vertex`], [`Aabb`], and the correspondence
//!   predicate [`Mesh::is_correspondent`]
//! - **I/O**: STL, OBJ, and PLY via [`Mesh::load`] and [`Mesh::save`]
//! - **Spatial index**: a bucketed KD-tree with deterministic tie-breaking
//! - **Resampling**: snapping a template onto a target's vertices while
//!   keeping the template's topology
//! - **Distances**: index-aligned displacement and symmetric Hausdorff
//!
//! # Quick Start
//!
//! ```no_run
//! use mesh_core::{Mesh, resample_onto_target};
//!
//! let template = Mesh::load("template.obj").unwrap();
//! let target = Mesh::load("femur_07.stl").unwrap();
//!
//! let corresponded = resample_onto_target(&template, &target).unwrap();
//! assert_eq!(corresponded.faces, template.faces);
//! corresponded.save("femur_07_corr.obj").unwrap();
//! ```
//!
//! # Ownership
//!
//! Operations never mutate the meshes they are given. Anything that changes
//! geometry returns a fresh [`Mesh`].

mod error;
mod types;

pub mod distance;
pub mod io;
pub mod primitives;
pub mod resample;
pub mod spatial;
pub mod tracing_ext;

pub use distance::{max_vertex_displacement, symmetric_hausdorff_distance};
pub use error::{ErrorCode, MeshError, MeshLocation, MeshResult, RecoverySuggestion};
pub use io::{MeshFormat, load_mesh, save_mesh};
pub use resample::{nearest_target_indices, resample_onto_index, resample_onto_target};
pub use spatial::{DEFAULT_BUCKET_SIZE, Neighbor, SpatialIndex, build_index};
pub use types::{Aabb, Mesh, Triangle, Vertex};

impl Mesh {
    /// Load a mesh from a file, picking the format from the extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> MeshResult<Self> {
        io::load_mesh(path.as_ref())
    }

    /// Save the mesh to a file, picking the format from the extension.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> MeshResult<()> {
        io::save_mesh(self, path.as_ref())
    }
}
