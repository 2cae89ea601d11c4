//! Rectilinear volumetric fields in physical space.
//!
//! A [`GridGeometry`] maps voxel indices to physical points through an
//! origin, per-axis spacing and an orthonormal direction matrix:
//!
//! ```text
//! p = origin + D * (index .* spacing)
//! ```
//!
//! Voxel values are stored x-fastest.

use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{VolumeError, VolumeResult};

/// Physical layout of a voxel grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    /// Physical position of voxel (0, 0, 0).
    pub origin: Point3<f64>,
    /// Distance between voxel centers along each grid axis.
    pub spacing: Vector3<f64>,
    /// Voxel counts [x, y, z].
    pub size: [usize; 3],
    /// Columns are the grid axes in physical space.
    pub direction: Matrix3<f64>,
}

impl GridGeometry {
    /// Grid with identity direction.
    pub fn new(origin: Point3<f64>, spacing: Vector3<f64>, size: [usize; 3]) -> Self {
        Self {
            origin,
            spacing,
            size,
            direction: Matrix3::identity(),
        }
    }

    /// Replace the direction matrix.
    pub fn with_direction(mut self, direction: Matrix3<f64>) -> Self {
        self.direction = direction;
        self
    }

    /// Total number of voxels.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.size[0] * self.size[1] * self.size[2]
    }

    /// Linear offset of voxel (i, j, k).
    #[inline]
    pub fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.size[0] * (j + self.size[1] * k)
    }

    /// Inverse of [`linear_index`](Self::linear_index).
    #[inline]
    pub fn delinearize(&self, idx: usize) -> [usize; 3] {
        let plane = self.size[0] * self.size[1];
        let k = idx / plane;
        let rem = idx % plane;
        [rem % self.size[0], rem / self.size[0], k]
    }

    /// Physical position of a voxel center.
    pub fn index_to_physical(&self, index: [usize; 3]) -> Point3<f64> {
        self.continuous_index_to_physical(&Vector3::new(
            index[0] as f64,
            index[1] as f64,
            index[2] as f64,
        ))
    }

    /// Physical position of a fractional index.
    pub fn continuous_index_to_physical(&self, index: &Vector3<f64>) -> Point3<f64> {
        self.origin + self.direction * index.component_mul(&self.spacing)
    }

    /// Fractional index of a physical point.
    pub fn physical_to_continuous_index(&self, p: &Point3<f64>) -> Vector3<f64> {
        (self.direction.transpose() * (p - self.origin)).component_div(&self.spacing)
    }

    /// Physical span between the first and last voxel centers on each axis.
    pub fn physical_extent(&self) -> Vector3<f64> {
        Vector3::new(
            self.size[0].saturating_sub(1) as f64 * self.spacing.x,
            self.size[1].saturating_sub(1) as f64 * self.spacing.y,
            self.size[2].saturating_sub(1) as f64 * self.spacing.z,
        )
    }

    /// True when both grids describe the same voxel lattice.
    pub fn same_grid(&self, other: &GridGeometry, tolerance: f64) -> bool {
        self.size == other.size
            && (self.origin - other.origin).amax() <= tolerance
            && (self.spacing - other.spacing).amax() <= tolerance
            && (self.direction - other.direction).amax() <= tolerance
    }

    /// Linear indices and weights of the eight voxels that trilinearly
    /// interpolate `p`. `None` outside the grid.
    ///
    /// Weights sum to one. Corners past the last voxel on a single-voxel axis
    /// are clamped and carry zero weight.
    pub fn trilinear_stencil(&self, p: &Point3<f64>) -> Option<[(usize, f64); 8]> {
        let cell = self.locate(p)?;
        let mut stencil = [(0usize, 0.0f64); 8];
        for (slot, (corner, weight)) in stencil.iter_mut().zip(cell.corners()) {
            *slot = (self.linear_index(corner[0], corner[1], corner[2]), weight);
        }
        Some(stencil)
    }

    fn locate(&self, p: &Point3<f64>) -> Option<Cell> {
        const EDGE_TOLERANCE: f64 = 1e-9;

        let c = self.physical_to_continuous_index(p);
        let mut base = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let n = self.size[axis];
            if n == 0 {
                return None;
            }
            let last = (n - 1) as f64;
            let ci = c[axis];
            if !ci.is_finite() || ci < -EDGE_TOLERANCE || ci > last + EDGE_TOLERANCE {
                return None;
            }
            let ci = ci.clamp(0.0, last);
            if n == 1 {
                continue;
            }
            let i0 = (ci.floor() as usize).min(n - 2);
            base[axis] = i0;
            frac[axis] = ci - i0 as f64;
        }
        Some(Cell {
            base,
            frac,
            size: self.size,
        })
    }
}

/// Scalar field sampled on a [`GridGeometry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumetricField {
    pub geometry: GridGeometry,
    pub values: Vec<f32>,
}

impl VolumetricField {
    /// Field with every voxel set to `value`.
    pub fn filled(geometry: GridGeometry, value: f32) -> Self {
        let n = geometry.voxel_count();
        Self {
            geometry,
            values: vec![value; n],
        }
    }

    /// Wrap an existing value buffer.
    ///
    /// # Errors
    ///
    /// `ValueCountMismatch` when `values` does not hold one value per voxel.
    pub fn from_values(geometry: GridGeometry, values: Vec<f32>) -> VolumeResult<Self> {
        let expected = geometry.voxel_count();
        if values.len() != expected {
            return Err(VolumeError::ValueCountMismatch {
                size: geometry.size,
                expected,
                found: values.len(),
            });
        }
        Ok(Self { geometry, values })
    }

    /// Voxel counts [x, y, z].
    #[inline]
    pub fn size(&self) -> [usize; 3] {
        self.geometry.size
    }

    /// Voxel value, `None` outside the grid.
    pub fn get(&self, index: [usize; 3]) -> Option<f32> {
        let [i, j, k] = index;
        let [nx, ny, nz] = self.geometry.size;
        if i >= nx || j >= ny || k >= nz {
            return None;
        }
        Some(self.values[self.geometry.linear_index(i, j, k)])
    }

    /// Set a voxel value.
    ///
    /// # Panics
    ///
    /// When `index` is outside the grid.
    pub fn set(&mut self, index: [usize; 3], value: f32) {
        let idx = self.geometry.linear_index(index[0], index[1], index[2]);
        self.values[idx] = value;
    }

    /// Smallest and largest voxel values.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.values.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Number of voxels satisfying `predicate`.
    pub fn count_where(&self, predicate: impl Fn(f32) -> bool) -> usize {
        self.values.iter().filter(|&&v| predicate(v)).count()
    }

    /// Trilinear interpolation at a physical point, `None` outside the grid.
    pub fn sample(&self, p: &Point3<f64>) -> Option<f64> {
        let stencil = self.geometry.trilinear_stencil(p)?;
        Some(
            stencil
                .iter()
                .map(|&(idx, weight)| weight * self.values[idx] as f64)
                .sum(),
        )
    }

    /// Trilinear value and its physical-space gradient at `p`.
    ///
    /// The gradient is exact for the interpolant, so it is piecewise constant
    /// along each axis between voxel centers.
    pub fn sample_with_gradient(&self, p: &Point3<f64>) -> Option<(f64, Vector3<f64>)> {
        let cell = self.geometry.locate(p)?;
        let v = |di: usize, dj: usize, dk: usize| -> f64 {
            let [i, j, k] = cell.base;
            self.values[self.geometry.linear_index(
                (i + di).min(self.geometry.size[0] - 1),
                (j + dj).min(self.geometry.size[1] - 1),
                (k + dk).min(self.geometry.size[2] - 1),
            )] as f64
        };
        let [tx, ty, tz] = cell.frac;

        let c00 = v(0, 0, 0) * (1.0 - tx) + v(1, 0, 0) * tx;
        let c10 = v(0, 1, 0) * (1.0 - tx) + v(1, 1, 0) * tx;
        let c01 = v(0, 0, 1) * (1.0 - tx) + v(1, 0, 1) * tx;
        let c11 = v(0, 1, 1) * (1.0 - tx) + v(1, 1, 1) * tx;
        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;
        let value = c0 * (1.0 - tz) + c1 * tz;

        let dx = |dj: usize, dk: usize| v(1, dj, dk) - v(0, dj, dk);
        let gx = (dx(0, 0) * (1.0 - ty) + dx(1, 0) * ty) * (1.0 - tz)
            + (dx(0, 1) * (1.0 - ty) + dx(1, 1) * ty) * tz;
        let gy = (c10 - c00) * (1.0 - tz) + (c11 - c01) * tz;
        let gz = c1 - c0;

        let grad_index = Vector3::new(gx, gy, gz);
        let grad = self.geometry.direction * grad_index.component_div(&self.geometry.spacing);
        Some((value, grad))
    }
}

/// Enclosing cell of a point: lower corner index and fractional offsets.
struct Cell {
    base: [usize; 3],
    frac: [f64; 3],
    size: [usize; 3],
}

impl Cell {
    fn corners(&self) -> impl Iterator<Item = ([usize; 3], f64)> + '_ {
        (0..8usize).map(move |bits| {
            let mut corner = [0usize; 3];
            let mut weight = 1.0;
            for axis in 0..3 {
                let step = (bits >> axis) & 1;
                let t = self.frac[axis];
                weight *= if step == 1 { t } else { 1.0 - t };
                corner[axis] = (self.base[axis] + step).min(self.size[axis] - 1);
            }
            (corner, weight)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_field() -> VolumetricField {
        // f(p) = 2x + 3y - z on a 4x5x6 grid with anisotropic spacing
        let geometry = GridGeometry::new(
            Point3::new(-1.0, 2.0, 0.5),
            Vector3::new(0.5, 1.0, 2.0),
            [4, 5, 6],
        );
        let mut field = VolumetricField::filled(geometry.clone(), 0.0);
        for k in 0..6 {
            for j in 0..5 {
                for i in 0..4 {
                    let p = geometry.index_to_physical([i, j, k]);
                    field.set([i, j, k], (2.0 * p.x + 3.0 * p.y - p.z) as f32);
                }
            }
        }
        field
    }

    #[test]
    fn test_linear_index_roundtrip() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [3, 4, 5]);
        assert_eq!(geometry.linear_index(1, 0, 0), 1);
        assert_eq!(geometry.linear_index(0, 1, 0), 3);
        assert_eq!(geometry.linear_index(0, 0, 1), 12);
        for idx in 0..geometry.voxel_count() {
            let [i, j, k] = geometry.delinearize(idx);
            assert_eq!(geometry.linear_index(i, j, k), idx);
        }
    }

    #[test]
    fn test_physical_index_roundtrip_with_direction() {
        // 90 degree rotation about z
        let direction = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let geometry = GridGeometry::new(
            Point3::new(10.0, -4.0, 2.0),
            Vector3::new(0.5, 0.25, 2.0),
            [8, 8, 8],
        )
        .with_direction(direction);

        let p = geometry.index_to_physical([2, 4, 1]);
        assert_relative_eq!(p, Point3::new(9.0, -3.0, 4.0), epsilon = 1e-12);
        let c = geometry.physical_to_continuous_index(&p);
        assert_relative_eq!(c, Vector3::new(2.0, 4.0, 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_from_values_validates_length() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [2, 2, 2]);
        let err = VolumetricField::from_values(geometry, vec![0.0; 7]).unwrap_err();
        assert!(matches!(
            err,
            VolumeError::ValueCountMismatch {
                expected: 8,
                found: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_sample_reproduces_linear_function() {
        let field = ramp_field();
        let p = Point3::new(-0.3, 4.7, 5.1);
        let expected = 2.0 * p.x + 3.0 * p.y - p.z;
        assert_relative_eq!(field.sample(&p).unwrap(), expected, epsilon = 1e-4);
    }

    #[test]
    fn test_sample_outside_is_none() {
        let field = ramp_field();
        assert!(field.sample(&Point3::new(-1.5, 3.0, 1.0)).is_none());
        assert!(field.sample(&Point3::new(0.0, 3.0, 100.0)).is_none());
        // Last voxel center is inside
        let last = field.geometry.index_to_physical([3, 4, 5]);
        assert!(field.sample(&last).is_some());
    }

    #[test]
    fn test_gradient_of_linear_function() {
        let field = ramp_field();
        let (value, grad) = field
            .sample_with_gradient(&Point3::new(0.1, 3.3, 7.9))
            .unwrap();
        assert_relative_eq!(value, 2.0 * 0.1 + 3.0 * 3.3 - 7.9, epsilon = 1e-4);
        assert_relative_eq!(grad, Vector3::new(2.0, 3.0, -1.0), epsilon = 1e-4);
    }

    #[test]
    fn test_stencil_weights_sum_to_one() {
        let field = ramp_field();
        let stencil = field
            .geometry
            .trilinear_stencil(&Point3::new(0.2, 4.1, 3.3))
            .unwrap();
        let total: f64 = stencil.iter().map(|&(_, w)| w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert!(stencil.iter().all(|&(idx, _)| idx < field.values.len()));
    }

    #[test]
    fn test_same_grid() {
        let a = ramp_field().geometry;
        let mut b = a.clone();
        assert!(a.same_grid(&b, 0.0));
        b.origin.x += 1e-3;
        assert!(!a.same_grid(&b, 1e-6));
        assert!(a.same_grid(&b, 1e-2));
    }

    #[test]
    fn test_min_max_and_count() {
        let geometry = GridGeometry::new(Point3::origin(), Vector3::repeat(1.0), [2, 1, 1]);
        let field = VolumetricField::from_values(geometry, vec![-2.0, 5.0]).unwrap();
        assert_eq!(field.min_max(), Some((-2.0, 5.0)));
        assert_eq!(field.count_where(|v| v < 0.0), 1);
    }
}
