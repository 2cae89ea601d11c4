//! Timing and progress logging shared by the atlas crates.
//!
//! Nothing is printed unless the application installs a subscriber. Useful
//! targets:
//!
//! - `mesh_core::timing`: one INFO line per finished operation
//! - `mesh_core::progress`: DEBUG line per iteration or stage change
//! - `mesh_core::mesh_state`: DEBUG extent of intermediate meshes

use std::time::Instant;

use nalgebra::Vector3;
use tracing::{Span, debug, info};

use crate::Mesh;

/// Logs how long an operation took when dropped.
///
/// The operation runs inside an `atlas_operation` span for as long as the
/// timer lives.
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
    _span: tracing::span::EnteredSpan,
}

impl OperationTimer {
    pub fn new(name: &'static str) -> Self {
        Self::start(name, tracing::info_span!("atlas_operation", operation = name))
    }

    /// Timer whose span records the size of the mesh being processed.
    pub fn for_mesh(name: &'static str, mesh: &Mesh) -> Self {
        let span = tracing::info_span!(
            "atlas_operation",
            operation = name,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count()
        );
        Self::start(name, span)
    }

    fn start(name: &'static str, span: Span) -> Self {
        debug!(target: "mesh_core::timing", operation = name, "Started");
        Self {
            name,
            start: Instant::now(),
            _span: span.entered(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "mesh_core::timing",
            operation = self.name,
            elapsed_ms = self.elapsed_ms(),
            "Finished"
        );
    }
}

/// Log the size and bounding box extent of an intermediate mesh.
pub fn log_mesh_extent(mesh: &Mesh, context: &str) {
    let extent = mesh
        .bounds()
        .map(|(min, max)| max - min)
        .unwrap_or_else(Vector3::zeros);
    debug!(
        target: "mesh_core::mesh_state",
        context,
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        extent = ?[extent.x, extent.y, extent.z],
        "Mesh extent"
    );
}

/// Log that `operation` reached `stage` of iteration `current` out of `total`.
pub fn log_stage(operation: &str, current: usize, total: usize, stage: &str) {
    debug!(
        target: "mesh_core::progress",
        operation,
        current,
        total,
        stage,
        "Progress"
    );
}
