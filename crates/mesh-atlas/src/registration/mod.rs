//! Template-to-target registration.
//!
//! Three registrars share one interface:
//!
//! | Registrar | Works on | Transform |
//! |-----------|----------|-----------|
//! | [`MeanSquaresRegistrar`] | signed distance fields | cubic B-spline |
//! | [`DiffeomorphicRegistrar`] | signed distance fields | displacement field |
//! | [`PointSetEntropyRegistrar`] | vertex positions | affine |
//!
//! A registrar owns its optimizer and resets it at the start of every
//! [`Registrar::register`] call, so one instance can be reused across
//! targets without carrying state between them.

mod diffeomorphic;
mod mean_squares;
mod point_set;

pub use diffeomorphic::{DiffeomorphicConfig, DiffeomorphicRegistrar};
pub use mean_squares::{MeanSquaresConfig, MeanSquaresRegistrar};
pub use point_set::{PointSetEntropyConfig, PointSetEntropyRegistrar, PointSetMetric};

use mesh_core::Mesh;
use mesh_volume::{RasterizeParams, VolumetricField, rasterize};
use tracing::debug;

use crate::error::{AtlasError, AtlasResult};
use crate::optimize::StopReason;
use crate::transform::Transform;

/// Options shared by every registrar's configuration.
pub trait RegistrationConfig: Clone + Send + Sync + std::fmt::Debug {
    /// Iteration budget of the optimizer.
    fn max_iterations(&self) -> usize;

    /// Same configuration with a different iteration budget.
    fn with_max_iterations(self, iterations: usize) -> Self;
}

/// Registers a template mesh onto a target mesh.
pub trait Registrar {
    type Config: RegistrationConfig;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Find the transform taking `template` onto `target` and apply it.
    ///
    /// Neither input is modified. Running out of iterations is not an
    /// error: the best transform found is returned with its stop reason.
    ///
    /// # Errors
    ///
    /// `RegistrationInput` when either mesh has no vertices, or when the
    /// configuration is out of range.
    fn register(
        &mut self,
        template: &Mesh,
        target: &Mesh,
        config: &Self::Config,
    ) -> AtlasResult<Registration>;
}

/// Result of one registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub transform: Transform,
    /// Template mesh with the transform applied; faces are the template's.
    pub mesh: Mesh,
    /// Final metric value; lower is better.
    pub metric_value: f64,
    pub iterations: usize,
    pub stop_reason: StopReason,
}

impl Registration {
    pub fn converged(&self) -> bool {
        self.stop_reason.is_converged()
    }
}

/// Reject empty inputs before any work.
pub(crate) fn check_inputs(template: &Mesh, target: &Mesh) -> AtlasResult<()> {
    if template.vertices.is_empty() {
        return Err(AtlasError::registration_input("template has no vertices"));
    }
    if target.vertices.is_empty() {
        return Err(AtlasError::registration_input("target has no vertices"));
    }
    Ok(())
}

/// Rasterize template and target together on the grid of their union
/// bounding box, so neither is clipped.
///
/// Returns `(fixed, moving)`: the template field and the target field.
pub(crate) fn rasterize_pair(
    template: &Mesh,
    target: &Mesh,
    params: &RasterizeParams,
) -> AtlasResult<(VolumetricField, VolumetricField)> {
    let mut fields = rasterize(&[template.clone(), target.clone()], None, params)?.into_iter();
    let (Some(fixed), Some(moving)) = (fields.next(), fields.next()) else {
        return Err(AtlasError::registration_input(
            "rasterization produced fewer than two fields",
        ));
    };
    debug!(
        size = ?fixed.geometry.size,
        spacing = ?fixed.geometry.spacing,
        "Rasterized registration pair"
    );
    Ok((fixed, moving))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::primitives;
    use nalgebra::{Point3, Vector3};

    fn raster() -> RasterizeParams {
        RasterizeParams::default()
            .with_resolution(30)
            .with_buffer(6)
            .with_margin(3)
    }

    #[test]
    fn test_pair_grid_covers_target_beyond_template() {
        let template = primitives::uv_sphere(5.0, 10, 14);
        let mut target = primitives::uv_sphere(5.0, 10, 14);
        target.translate(Vector3::new(20.0, 0.0, 0.0));

        let (fixed, moving) = rasterize_pair(&template, &target, &raster()).unwrap();
        assert_eq!(fixed.geometry, moving.geometry);

        // Both centers are inside their own surface
        assert!(fixed.sample(&Point3::origin()).unwrap() < 0.0);
        assert!(moving.sample(&Point3::new(20.0, 0.0, 0.0)).unwrap() < 0.0);
        // The far cap of the target is on the grid
        assert!(moving.sample(&Point3::new(24.5, 0.0, 0.0)).is_some());
        assert!(moving.count_where(|v| v < 0.0) > 0);
    }
}
