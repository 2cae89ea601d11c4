//! End-to-end tests for mesh-core: load -> resample -> measure -> save.

use mesh_core::{
    Mesh, MeshError, max_vertex_displacement, primitives, resample_onto_target,
    symmetric_hausdorff_distance,
};
use nalgebra::Vector3;
use tempfile::TempDir;

#[test]
fn test_resampled_population_stays_in_correspondence() {
    let template = primitives::uv_sphere(10.0, 12, 20);
    let targets = [
        primitives::torus(9.0, 3.0, 36, 14),
        primitives::uv_sphere(12.0, 20, 30),
        primitives::cuboid(15.0),
    ];

    let resampled: Vec<Mesh> = targets
        .iter()
        .map(|t| resample_onto_target(&template, t).unwrap())
        .collect();

    for mesh in &resampled {
        assert!(mesh.is_correspondent(&template));
    }
    // Index-aligned comparison is defined across the whole population
    for pair in resampled.windows(2) {
        assert!(max_vertex_displacement(&pair[0], &pair[1]).is_ok());
    }
}

#[test]
fn test_saved_correspondence_mesh_reloads_identically() {
    let dir = TempDir::new().unwrap();
    let template = primitives::uv_sphere(10.0, 10, 16);
    let target = primitives::torus(9.0, 3.0, 30, 12);
    let corresponded = resample_onto_target(&template, &target).unwrap();

    for name in ["corr.obj", "corr.ply"] {
        let path = dir.path().join(name);
        corresponded.save(&path).unwrap();
        let reloaded = Mesh::load(&path).unwrap();
        assert!(reloaded.is_correspondent(&template), "{}", name);
        assert_eq!(max_vertex_displacement(&reloaded, &corresponded).unwrap(), 0.0);
    }
}

#[test]
fn test_stl_round_trip_is_geometrically_equal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cube.stl");
    let mut cube = primitives::cuboid(4.0);
    cube.translate(Vector3::new(1.0, 2.0, 3.0));
    cube.save(&path).unwrap();

    let reloaded = Mesh::load(&path).unwrap();
    assert_eq!(reloaded.face_count(), 12);
    // STL re-indexes vertices, so compare as point sets
    assert!(symmetric_hausdorff_distance(&reloaded, &cube).unwrap() < 1e-5);
}

#[test]
fn test_loading_empty_obj_is_invalid_geometry() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.obj");
    std::fs::write(&path, "# nothing here\n").unwrap();

    let err = Mesh::load(&path).unwrap_err();
    assert!(matches!(err, MeshError::InvalidGeometry { .. }));
}
