//! Bringing population fields onto shared grids.

use nalgebra::{Matrix3, Point3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{VolumeError, VolumeResult};
use crate::field::{GridGeometry, VolumetricField};

/// Per-axis tolerance when comparing spacings.
pub const SPACING_TOLERANCE: f64 = 1e-7;

/// Paste every field into a zero-filled grid large enough for all of them.
///
/// The common grid has the per-axis maximum size, the first field's spacing,
/// a zero origin and identity direction. Each field's voxels are copied at
/// index (0, 0, 0).
///
/// # Errors
///
/// `SpacingMismatch` when any field's spacing differs from the first by more
/// than [`SPACING_TOLERANCE`] on some axis.
pub fn paste_to_common_space(fields: &[VolumetricField]) -> VolumeResult<Vec<VolumetricField>> {
    let Some(first) = fields.first() else {
        return Ok(Vec::new());
    };
    let spacing = first.geometry.spacing;

    for (index, field) in fields.iter().enumerate().skip(1) {
        for axis in 0..3 {
            let found = field.geometry.spacing[axis];
            if (found - spacing[axis]).abs() > SPACING_TOLERANCE {
                return Err(VolumeError::spacing_mismatch(
                    index,
                    axis,
                    spacing[axis],
                    found,
                ));
            }
        }
    }

    let mut size = first.geometry.size;
    for field in &fields[1..] {
        for axis in 0..3 {
            size[axis] = size[axis].max(field.geometry.size[axis]);
        }
    }
    let common = GridGeometry {
        origin: Point3::origin(),
        spacing,
        size,
        direction: Matrix3::identity(),
    };

    info!(fields = fields.len(), size = ?size, "Pasting fields to common space");

    Ok(fields
        .par_iter()
        .map(|field| paste(field, &common))
        .collect())
}

fn paste(field: &VolumetricField, common: &GridGeometry) -> VolumetricField {
    let mut out = VolumetricField::filled(common.clone(), 0.0);
    let [nx, ny, nz] = field.geometry.size;
    for k in 0..nz {
        for j in 0..ny {
            let src = field.geometry.linear_index(0, j, k);
            let dst = common.linear_index(0, j, k);
            out.values[dst..dst + nx].copy_from_slice(&field.values[src..src + nx]);
        }
    }
    out
}

/// Coarsen fields by `ratio`.
///
/// Spacing is multiplied by `ratio` and each size becomes
/// `floor(size / ratio)`. Origin and direction are kept, and values are
/// trilinearly resampled.
///
/// # Errors
///
/// `InvalidRatio` when `ratio` is not finite, not greater than 1.0, or
/// would leave an axis with no voxels.
pub fn downsample(fields: &[VolumetricField], ratio: f64) -> VolumeResult<Vec<VolumetricField>> {
    if !ratio.is_finite() || ratio <= 1.0 {
        return Err(VolumeError::invalid_ratio(
            ratio,
            "ratio must be finite and greater than 1.0",
        ));
    }

    let targets = fields
        .iter()
        .map(|field| {
            let source = &field.geometry;
            let size = source.size.map(|n| (n as f64 / ratio).floor() as usize);
            if size.contains(&0) {
                return Err(VolumeError::invalid_ratio(
                    ratio,
                    format!("grid {:?} would shrink to {:?}", source.size, size),
                ));
            }
            Ok(GridGeometry {
                origin: source.origin,
                spacing: source.spacing * ratio,
                size,
                direction: source.direction,
            })
        })
        .collect::<VolumeResult<Vec<_>>>()?;

    debug!(fields = fields.len(), ratio, "Downsampling fields");

    Ok(fields
        .iter()
        .zip(&targets)
        .map(|(field, geometry)| resample_field(field, geometry, 0.0))
        .collect())
}

/// Trilinearly resample `field` onto `geometry`; voxels outside the source
/// take `default`.
pub fn resample_field(
    field: &VolumetricField,
    geometry: &GridGeometry,
    default: f32,
) -> VolumetricField {
    let values = (0..geometry.voxel_count())
        .into_par_iter()
        .map(|idx| {
            let p = geometry.index_to_physical(geometry.delinearize(idx));
            field.sample(&p).map_or(default, |v| v as f32)
        })
        .collect();
    VolumetricField {
        geometry: geometry.clone(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn field(size: [usize; 3], spacing: f64, fill: f32) -> VolumetricField {
        let geometry = GridGeometry::new(Point3::new(3.0, -2.0, 1.0), Vector3::repeat(spacing), size);
        VolumetricField::filled(geometry, fill)
    }

    #[test]
    fn test_paste_grows_to_largest_extent() {
        let a = field([4, 6, 2], 0.5, 1.0);
        let b = field([5, 3, 3], 0.5, 2.0);
        let pasted = paste_to_common_space(&[a, b]).unwrap();

        for f in &pasted {
            assert_eq!(f.size(), [5, 6, 3]);
            assert_eq!(f.geometry.origin, Point3::origin());
            assert_relative_eq!(f.geometry.spacing, Vector3::repeat(0.5));
        }
        assert_eq!(pasted[0].get([3, 5, 1]), Some(1.0));
        assert_eq!(pasted[0].get([4, 5, 1]), Some(0.0));
        assert_eq!(pasted[0].get([0, 0, 2]), Some(0.0));
        assert_eq!(pasted[1].get([4, 2, 2]), Some(2.0));
        assert_eq!(pasted[1].count_where(|v| v == 2.0), 5 * 3 * 3);
    }

    #[test]
    fn test_paste_rejects_spacing_mismatch() {
        let a = field([2, 2, 2], 0.5, 0.0);
        let mut b = field([2, 2, 2], 0.5, 0.0);
        b.geometry.spacing.y = 0.5 + 1e-5;
        let err = paste_to_common_space(&[a, b]).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::SpacingMismatch { index: 1, axis: 1, .. }
        ));
    }

    #[test]
    fn test_paste_tolerates_tiny_spacing_noise() {
        let a = field([2, 2, 2], 0.5, 0.0);
        let mut b = field([2, 2, 2], 0.5, 0.0);
        b.geometry.spacing.z -= 1e-9;
        assert!(paste_to_common_space(&[a, b]).is_ok());
    }

    #[test]
    fn test_paste_empty_input() {
        assert!(paste_to_common_space(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_downsample_ratio_law() {
        let f = field([10, 7, 5], 0.3, 4.0);
        let out = downsample(std::slice::from_ref(&f), 2.5).unwrap();
        assert_eq!(out[0].size(), [4, 2, 2]);
        for axis in 0..3 {
            assert_eq!(out[0].geometry.spacing[axis], f.geometry.spacing[axis] * 2.5);
        }
        assert_eq!(out[0].geometry.origin, f.geometry.origin);
        // Constant fields stay constant wherever the source covers the voxel
        assert!(out[0].values.iter().all(|&v| v == 4.0 || v == 0.0));
        assert_eq!(out[0].get([0, 0, 0]), Some(4.0));
    }

    #[test]
    fn test_downsample_rejects_bad_ratios() {
        let f = field([4, 4, 4], 1.0, 0.0);
        for ratio in [1.0, 0.5, -2.0, f64::NAN, f64::INFINITY] {
            let err = downsample(std::slice::from_ref(&f), ratio).unwrap_err();
            assert!(matches!(err, VolumeError::InvalidRatio { .. }), "ratio {ratio}");
        }
        let err = downsample(&[f], 5.0).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidRatio { .. }));
    }

    #[test]
    fn test_resample_identity_grid() {
        let mut f = field([3, 3, 3], 1.0, 0.0);
        f.set([1, 2, 0], 7.0);
        let same = resample_field(&f, &f.geometry, -1.0);
        assert_eq!(same.values, f.values);
    }
}
