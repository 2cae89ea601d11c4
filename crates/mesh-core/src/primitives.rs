//! Closed parametric meshes with outward winding.
//!
//! Used as synthetic populations in tests and benchmarks, and as seed
//! templates when no anatomical template is at hand.

use std::f64::consts::{PI, TAU};

use nalgebra::Point3;

use crate::Mesh;

/// Torus around the z axis.
///
/// Produces `n_major * n_minor` vertices and `2 * n_major * n_minor` triangles.
/// Vertex `i * n_minor + j` sits at major angle `i` and minor angle `j`.
pub fn torus(major_radius: f64, minor_radius: f64, n_major: usize, n_minor: usize) -> Mesh {
    let n_major = n_major.max(3);
    let n_minor = n_minor.max(3);
    let mut mesh = Mesh::with_capacity(n_major * n_minor, 2 * n_major * n_minor);

    for i in 0..n_major {
        let theta = TAU * i as f64 / n_major as f64;
        for j in 0..n_minor {
            let phi = TAU * j as f64 / n_minor as f64;
            let ring = major_radius + minor_radius * phi.cos();
            mesh.vertices.push(crate::Vertex::new(Point3::new(
                ring * theta.cos(),
                ring * theta.sin(),
                minor_radius * phi.sin(),
            )));
        }
    }

    let idx = |i: usize, j: usize| ((i % n_major) * n_minor + (j % n_minor)) as u32;
    for i in 0..n_major {
        for j in 0..n_minor {
            let a = idx(i, j);
            let b = idx(i + 1, j);
            let c = idx(i + 1, j + 1);
            let d = idx(i, j + 1);
            mesh.faces.push([a, b, c]);
            mesh.faces.push([a, c, d]);
        }
    }

    mesh
}

/// Latitude/longitude sphere centred on the origin.
///
/// Produces `2 + (stacks - 1) * slices` vertices.
pub fn uv_sphere(radius: f64, stacks: usize, slices: usize) -> Mesh {
    let stacks = stacks.max(2);
    let slices = slices.max(3);
    let mut mesh = Mesh::with_capacity(2 + (stacks - 1) * slices, 2 * stacks * slices);

    mesh.vertices
        .push(crate::Vertex::from_coords(0.0, 0.0, radius));
    for k in 1..stacks {
        let polar = PI * k as f64 / stacks as f64;
        for j in 0..slices {
            let azimuth = TAU * j as f64 / slices as f64;
            mesh.vertices.push(crate::Vertex::from_coords(
                radius * polar.sin() * azimuth.cos(),
                radius * polar.sin() * azimuth.sin(),
                radius * polar.cos(),
            ));
        }
    }
    mesh.vertices
        .push(crate::Vertex::from_coords(0.0, 0.0, -radius));

    let north = 0u32;
    let south = (mesh.vertices.len() - 1) as u32;
    let ring = |k: usize, j: usize| (1 + k * slices + j % slices) as u32;

    for j in 0..slices {
        mesh.faces.push([north, ring(0, j), ring(0, j + 1)]);
    }
    for k in 0..stacks - 2 {
        for j in 0..slices {
            let a = ring(k, j);
            let b = ring(k + 1, j);
            let c = ring(k + 1, j + 1);
            let d = ring(k, j + 1);
            mesh.faces.push([a, b, c]);
            mesh.faces.push([a, c, d]);
        }
    }
    for j in 0..slices {
        mesh.faces
            .push([south, ring(stacks - 2, j + 1), ring(stacks - 2, j)]);
    }

    mesh
}

/// Axis-aligned cube of edge `size` centred on the origin (8 vertices, 12 triangles).
pub fn cuboid(size: f64) -> Mesh {
    let h = size / 2.0;
    let corners = [
        [-h, -h, -h],
        [h, -h, -h],
        [h, h, -h],
        [-h, h, -h],
        [-h, -h, h],
        [h, -h, h],
        [h, h, h],
        [-h, h, h],
    ];
    Mesh::from_points(
        corners.iter().map(|c| Point3::new(c[0], c[1], c[2])),
        vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ],
    )
}
