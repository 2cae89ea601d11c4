//! Exact signed Euclidean distance transform of binary volumes.
//!
//! Distances are measured to the object contour: object voxels with at least
//! one background 6-neighbour inside the grid. Contour voxels are 0, other
//! object voxels negative and background voxels positive. Physical spacing is
//! honored on every axis.
//!
//! The squared distance is computed with three separable lower-envelope
//! passes (Felzenszwalb & Huttenlocher), one per axis. Each pass runs its
//! lines in parallel.

use rayon::prelude::*;
use tracing::debug;

use mesh_core::tracing_ext::OperationTimer;

use crate::error::{VolumeError, VolumeResult};
use crate::field::VolumetricField;

/// Signed distance map of a binary volume. Nonzero voxels are object.
///
/// # Errors
///
/// `InvalidGeometry` when the volume has no object voxels or the object
/// has no contour inside the grid.
pub fn signed_distance_transform(binary: &VolumetricField) -> VolumeResult<VolumetricField> {
    let geometry = &binary.geometry;
    let size = geometry.size;
    let object: Vec<bool> = binary.values.iter().map(|&v| v != 0.0).collect();

    if !object.iter().any(|&o| o) {
        return Err(VolumeError::invalid_geometry(
            "binary volume has no object voxels",
        ));
    }

    let _timer = OperationTimer::new("signed_distance_transform");

    let contour = contour_voxels(&object, size);
    let contour_count = contour.iter().filter(|&&c| c).count();
    if contour_count == 0 {
        return Err(VolumeError::invalid_geometry(
            "object fills the whole grid and has no contour",
        ));
    }

    let mut squared: Vec<f64> = contour
        .iter()
        .map(|&c| if c { 0.0 } else { f64::INFINITY })
        .collect();
    for axis in 0..3 {
        transform_axis(&mut squared, size, axis, geometry.spacing[axis]);
    }

    let values = squared
        .iter()
        .zip(&object)
        .map(|(&d2, &inside)| {
            let d = d2.sqrt() as f32;
            if inside { -d } else { d }
        })
        .collect();

    debug!(contour_voxels = contour_count, "Signed distance transform complete");
    VolumetricField::from_values(geometry.clone(), values)
}

fn contour_voxels(object: &[bool], size: [usize; 3]) -> Vec<bool> {
    let [nx, ny, nz] = size;
    let idx = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

    (0..object.len())
        .into_par_iter()
        .map(|linear| {
            if !object[linear] {
                return false;
            }
            let i = linear % nx;
            let j = (linear / nx) % ny;
            let k = linear / (nx * ny);
            let background = |ii: usize, jj: usize, kk: usize| !object[idx(ii, jj, kk)];
            (i > 0 && background(i - 1, j, k))
                || (i + 1 < nx && background(i + 1, j, k))
                || (j > 0 && background(i, j - 1, k))
                || (j + 1 < ny && background(i, j + 1, k))
                || (k > 0 && background(i, j, k - 1))
                || (k + 1 < nz && background(i, j, k + 1))
        })
        .collect()
}

/// One separable pass along `axis` over an x-fastest buffer.
fn transform_axis(values: &mut [f64], size: [usize; 3], axis: usize, spacing: f64) {
    let n = size[axis];
    let strides = [1, size[0], size[0] * size[1]];
    let (a, b) = match axis {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    };
    let line_count = size[a] * size[b];

    let source: &[f64] = values;
    let lines: Vec<Vec<f64>> = (0..line_count)
        .into_par_iter()
        .map(|line| {
            let base = (line % size[a]) * strides[a] + (line / size[a]) * strides[b];
            let f: Vec<f64> = (0..n).map(|t| source[base + t * strides[axis]]).collect();
            let mut out = vec![f64::INFINITY; n];
            lower_envelope(&f, spacing, &mut out);
            out
        })
        .collect();

    for (line, out) in lines.into_iter().enumerate() {
        let base = (line % size[a]) * strides[a] + (line / size[a]) * strides[b];
        for (t, d) in out.into_iter().enumerate() {
            values[base + t * strides[axis]] = d;
        }
    }
}

/// 1D squared distance transform of sampled function `f` at positions `q * spacing`.
fn lower_envelope(f: &[f64], spacing: f64, out: &mut [f64]) {
    let n = f.len();
    let mut vertices: Vec<usize> = Vec::with_capacity(n);
    let mut bounds: Vec<f64> = Vec::with_capacity(n);

    let intersect = |p: usize, q: usize| {
        let xp = p as f64 * spacing;
        let xq = q as f64 * spacing;
        ((f[q] + xq * xq) - (f[p] + xp * xp)) / (2.0 * (xq - xp))
    };

    for q in 0..n {
        if !f[q].is_finite() {
            continue;
        }
        let mut s = f64::NEG_INFINITY;
        while let Some(&p) = vertices.last() {
            s = intersect(p, q);
            if s > bounds[bounds.len() - 1] {
                break;
            }
            vertices.pop();
            bounds.pop();
            s = f64::NEG_INFINITY;
        }
        vertices.push(q);
        bounds.push(s);
    }

    if vertices.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (q, slot) in out.iter_mut().enumerate() {
        let xq = q as f64 * spacing;
        while k + 1 < vertices.len() && bounds[k + 1] < xq {
            k += 1;
        }
        let p = vertices[k];
        let d = xq - p as f64 * spacing;
        *slot = d * d + f[p];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::GridGeometry;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn brute_force(binary: &VolumetricField) -> Vec<f32> {
        let geometry = &binary.geometry;
        let object: Vec<bool> = binary.values.iter().map(|&v| v != 0.0).collect();
        let contour = contour_voxels(&object, geometry.size);
        let points: Vec<Point3<f64>> = (0..contour.len())
            .filter(|&i| contour[i])
            .map(|i| geometry.index_to_physical(geometry.delinearize(i)))
            .collect();
        (0..object.len())
            .map(|i| {
                let p = geometry.index_to_physical(geometry.delinearize(i));
                let d = points
                    .iter()
                    .map(|c| (c - p).norm())
                    .fold(f64::INFINITY, f64::min) as f32;
                if object[i] { -d } else { d }
            })
            .collect()
    }

    fn blob() -> VolumetricField {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::new(0.5, 1.0, 1.5), [9, 7, 6]);
        let mut field = VolumetricField::filled(geometry, 0.0);
        for k in 1..4 {
            for j in 2..5 {
                for i in 1..7 {
                    field.set([i, j, k], 1.0);
                }
            }
        }
        field.set([7, 5, 4], 1.0);
        field
    }

    #[test]
    fn test_lower_envelope_single_site() {
        let f = [f64::INFINITY, 0.0, f64::INFINITY, f64::INFINITY];
        let mut out = [0.0; 4];
        lower_envelope(&f, 2.0, &mut out);
        assert_eq!(out, [4.0, 0.0, 4.0, 16.0]);
    }

    #[test]
    fn test_lower_envelope_no_sites() {
        let f = [f64::INFINITY; 3];
        let mut out = [0.0; 3];
        lower_envelope(&f, 1.0, &mut out);
        assert!(out.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_matches_brute_force_with_anisotropic_spacing() {
        let binary = blob();
        let sdt = signed_distance_transform(&binary).unwrap();
        let expected = brute_force(&binary);
        for (got, want) in sdt.values.iter().zip(&expected) {
            assert_relative_eq!(*got, *want, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_sign_convention() {
        let binary = blob();
        let sdt = signed_distance_transform(&binary).unwrap();
        // Contour voxel, deep inside voxel, background voxel
        assert_eq!(sdt.get([1, 3, 2]), Some(0.0));
        assert!(sdt.get([3, 3, 2]).unwrap() < 0.0);
        assert!(sdt.get([0, 0, 0]).unwrap() > 0.0);
        assert_eq!(sdt.geometry, binary.geometry);
    }

    #[test]
    fn test_empty_object_is_invalid() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [4, 4, 4]);
        let err = signed_distance_transform(&VolumetricField::filled(geometry, 0.0)).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_full_object_is_invalid() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [3, 3, 3]);
        let err = signed_distance_transform(&VolumetricField::filled(geometry, 1.0)).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidGeometry { .. }));
    }
}
