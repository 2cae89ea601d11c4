//! Volumetric distance fields for mesh registration.
//!
//! - **Fields**: [`VolumetricField`] on a [`GridGeometry`] with origin,
//!   spacing, size and direction
//! - **Rasterization**: meshes to signed distance fields on a shared grid
//! - **Distance transform**: exact signed Euclidean distance of binary volumes
//! - **Common space**: pasting fields into one grid and downsampling
//! - **Extraction**: isosurfaces and binary volumes back to meshes
//! - **Persistence**: NRRD read and write
//!
//! # Example
//!
//! ```no_run
//! use mesh_core::Mesh;
//! use mesh_volume::{RasterizeParams, rasterize};
//!
//! let a = Mesh::load("femur_01.stl").unwrap();
//! let b = Mesh::load("femur_02.stl").unwrap();
//!
//! let fields = rasterize(&[a, b], None, &RasterizeParams::default()).unwrap();
//! assert_eq!(fields[0].geometry, fields[1].geometry);
//! ```

mod error;

pub mod common_space;
pub mod distance;
pub mod extract;
pub mod field;
pub mod nrrd;
pub mod rasterize;

pub use common_space::{SPACING_TOLERANCE, downsample, paste_to_common_space, resample_field};
pub use distance::signed_distance_transform;
pub use error::{VolumeError, VolumeErrorCode, VolumeRecoverySuggestion, VolumeResult};
pub use extract::{binary_volume_to_mesh, binary_volumes_to_meshes, extract_isosurface};
pub use field::{GridGeometry, VolumetricField};
pub use nrrd::{load_nrrd, save_nrrd};
pub use rasterize::{
    RasterizeParams, grid_for_meshes, rasterize, rasterize_surface_to_binary_volume,
};
