//! Core mesh data types.

use nalgebra::{Point3, Vector3};

use crate::error::{MeshError, MeshResult};

/// A mesh vertex.
///
/// Coordinates are in the units of the source data (micrometres for microCT,
/// millimetres for clinical CT). The library is unit-agnostic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,
}

impl Vertex {
    /// Create a new vertex at `position`.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self { position }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a box from its two corners.
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Tightest box around `points`, or `None` when there are no points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut aabb = Aabb::new(first, first);
        for p in iter {
            aabb.include(p);
        }
        Some(aabb)
    }

    /// Grow the box to contain `p`.
    pub fn include(&mut self, p: &Point3<f64>) {
        self.min = self.min.inf(p);
        self.max = self.max.sup(p);
    }

    /// Component-wise union of two boxes.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Edge lengths along each axis.
    pub fn extent(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Center of the box.
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// Two meshes are *correspondent* when they share the same vertex count and
/// an identical face list, so that vertex `i` of one can be compared with
/// vertex `i` of the other.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Build a mesh from raw positions and faces.
    pub fn from_points(points: impl IntoIterator<Item = Point3<f64>>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices: points.into_iter().map(Vertex::new).collect(),
            faces,
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns (min_corner, max_corner) or None if mesh has no vertices.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        self.aabb().map(|b| (b.min, b.max))
    }

    /// Bounding box as an [`Aabb`].
    pub fn aabb(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Vertex positions in index order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Mean of the vertex positions.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.vertices.is_empty() {
            return None;
        }
        let sum = self
            .vertices
            .iter()
            .fold(Vector3::zeros(), |acc, v| acc + v.position.coords);
        Some(Point3::from(sum / self.vertices.len() as f64))
    }

    /// Iterate over triangles, yielding Triangle structs with actual vertex data.
    ///
    /// Assumes valid indices; see [`Mesh::validate_indices`].
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[i0, i1, i2]| Triangle {
            v0: self.vertices[i0 as usize].position,
            v1: self.vertices[i1 as usize].position,
            v2: self.vertices[i2 as usize].position,
        })
    }

    /// Compute the total surface area of the mesh.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Check that every face references an existing vertex.
    pub fn validate_indices(&self) -> MeshResult<()> {
        let vertex_count = self.vertices.len();
        for (face_index, face) in self.faces.iter().enumerate() {
            for &vertex_index in face {
                if vertex_index as usize >= vertex_count {
                    return Err(MeshError::invalid_vertex_index(
                        face_index,
                        vertex_index,
                        vertex_count,
                    ));
                }
            }
        }
        Ok(())
    }

    /// True when both meshes have the same vertex count and identical faces.
    pub fn is_correspondent(&self, other: &Mesh) -> bool {
        self.vertices.len() == other.vertices.len() && self.faces == other.faces
    }

    /// A fresh mesh with this mesh's faces and the given positions.
    pub fn with_positions(&self, positions: Vec<Point3<f64>>) -> MeshResult<Mesh> {
        if positions.len() != self.vertices.len() {
            return Err(MeshError::correspondence_mismatch(
                self.vertices.len(),
                positions.len(),
                0,
            ));
        }
        Ok(Mesh {
            vertices: positions.into_iter().map(Vertex::new).collect(),
            faces: self.faces.clone(),
        })
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position += offset;
        }
    }

    /// Scale mesh uniformly around the origin.
    pub fn scale(&mut self, factor: f64) {
        for vertex in &mut self.vertices {
            vertex.position.coords *= factor;
        }
    }
}

/// A triangle with concrete vertex positions.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let e1 = self.v1 - self.v0;
        let e2 = self.v2 - self.v0;
        e1.cross(&e2)
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle() -> Mesh {
        Mesh::from_points(
            [
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_bounds_and_centroid() {
        let mesh = unit_triangle();
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 0.0));

        let c = mesh.centroid().unwrap();
        assert_relative_eq!(c.x, 1.0 / 3.0);
        assert_relative_eq!(c.y, 1.0 / 3.0);
        assert!(Mesh::new().centroid().is_none());
        assert!(Mesh::new().bounds().is_none());
    }

    #[test]
    fn test_surface_area() {
        assert_relative_eq!(unit_triangle().surface_area(), 0.5);
    }

    #[test]
    fn test_validate_indices() {
        let mut mesh = unit_triangle();
        assert!(mesh.validate_indices().is_ok());

        mesh.faces.push([0, 1, 7]);
        let err = mesh.validate_indices().unwrap_err();
        assert!(matches!(
            err,
            MeshError::InvalidVertexIndex {
                face_index: 1,
                vertex_index: 7,
                ..
            }
        ));
    }

    #[test]
    fn test_with_positions_keeps_faces() {
        let mesh = unit_triangle();
        let moved = mesh
            .with_positions(vec![Point3::new(5.0, 5.0, 5.0); 3])
            .unwrap();
        assert!(moved.is_correspondent(&mesh));
        assert_eq!(moved.vertices[2].position, Point3::new(5.0, 5.0, 5.0));
        assert_eq!(mesh.vertices[2].position, Point3::new(0.0, 1.0, 0.0));

        assert!(mesh.with_positions(vec![Point3::origin()]).is_err());
    }

    #[test]
    fn test_aabb_union() {
        let a = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(-1.0, 0.5, 0.5), Point3::new(0.5, 2.0, 0.5));
        let u = a.union(&b);
        assert_eq!(u.min, Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(u.max, Point3::new(1.0, 2.0, 1.0));
        assert_eq!(u.extent(), Vector3::new(2.0, 2.0, 1.0));
    }
}
