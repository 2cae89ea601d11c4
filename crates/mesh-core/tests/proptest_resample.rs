//! Property-based tests for the spatial index and correspondence resampler.
//!
//! Run with: cargo test -p mesh-core -- proptest

use mesh_core::{Mesh, SpatialIndex, Vertex, resample_onto_target};
use nalgebra::Point3;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// Coordinates on a coarse lattice so that exact ties are common.
fn arb_lattice_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-8i32..8).prop_map(|[x, y, z]| Point3::new(x as f64, y as f64, z as f64))
}

fn arb_point() -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-100.0..100.0f64).prop_map(|[x, y, z]| Point3::new(x, y, z))
}

/// A mesh with valid face indices.
fn arb_mesh(max_vertices: usize) -> impl Strategy<Value = Mesh> {
    prop::collection::vec(arb_point(), 3..max_vertices).prop_flat_map(|points| {
        let n = points.len() as u32;
        prop::collection::vec(prop::array::uniform3(0..n), 1..40).prop_map(move |faces| Mesh {
            vertices: points.iter().copied().map(Vertex::new).collect(),
            faces,
        })
    })
}

fn brute_force_nearest(points: &[Point3<f64>], q: &Point3<f64>) -> usize {
    let mut best = (f64::INFINITY, usize::MAX);
    for (i, p) in points.iter().enumerate() {
        let d = (p - q).norm_squared();
        if d < best.0 {
            best = (d, i);
        }
    }
    best.1
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn proptest_index_matches_brute_force_with_ties(
        points in prop::collection::vec(arb_lattice_point(), 1..300),
        queries in prop::collection::vec(arb_lattice_point(), 1..30),
        bucket_size in 1usize..20,
    ) {
        let index = SpatialIndex::build(&points, bucket_size).unwrap();
        for q in &queries {
            prop_assert_eq!(index.nearest(q).index, brute_force_nearest(&points, q));
        }
    }

    #[test]
    fn proptest_resample_preserves_cardinality(
        template in arb_mesh(60),
        target in arb_mesh(80),
    ) {
        let resampled = resample_onto_target(&template, &target).unwrap();
        prop_assert_eq!(resampled.vertex_count(), template.vertex_count());
        prop_assert_eq!(&resampled.faces, &template.faces);
    }

    #[test]
    fn proptest_resample_outputs_target_vertices(
        template in arb_mesh(60),
        target in arb_mesh(80),
    ) {
        let resampled = resample_onto_target(&template, &target).unwrap();
        for v in &resampled.vertices {
            prop_assert!(target.vertices.iter().any(|t| t.position == v.position));
        }
    }

    #[test]
    fn proptest_resample_is_idempotent(
        template in arb_mesh(60),
        target in arb_mesh(80),
    ) {
        let once = resample_onto_target(&template, &target).unwrap();
        let twice = resample_onto_target(&once, &target).unwrap();
        prop_assert_eq!(once, twice);
    }
}
