//! End-to-end tests for mesh-volume: rasterize -> common space -> persist -> extract.

use mesh_core::{Mesh, primitives};
use mesh_volume::{
    GridGeometry, RasterizeParams, VolumeError, VolumetricField, binary_volume_to_mesh, downsample, extract_isosurface,
    load_nrrd, paste_to_common_space, rasterize, rasterize_surface_to_binary_volume, save_nrrd,
};
use nalgebra::{Point3, Vector3};
use tempfile::TempDir;

fn coarse() -> RasterizeParams {
    RasterizeParams::default().with_resolution(40).with_buffer(8).with_margin(4)
}

#[test]
fn test_fields_rasterized_together_share_one_grid() {
    let a = primitives::uv_sphere(5.0, 12, 18);
    let mut b = primitives::cuboid(6.0);
    b.translate(Vector3::new(4.0, 1.0, -2.0));

    let fields = rasterize(&[a, b], None, &coarse()).unwrap();
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].geometry, fields[1].geometry);
    assert_eq!(fields[0].geometry.direction, nalgebra::Matrix3::identity());
}

#[test]
fn test_reference_grid_is_copied_exactly() {
    let a = primitives::uv_sphere(5.0, 12, 18);
    let c = primitives::torus(4.0, 1.5, 24, 12);

    let reference = rasterize(&[a], None, &coarse()).unwrap().remove(0);
    // Different params must not matter when a reference is given
    let other = RasterizeParams::default().with_resolution(20);
    let field = rasterize(&[c], Some(&reference), &other).unwrap().remove(0);

    assert_eq!(field.geometry.origin, reference.geometry.origin);
    assert_eq!(field.geometry.spacing, reference.geometry.spacing);
    assert_eq!(field.geometry.size, reference.geometry.size);
    assert_eq!(field.geometry.direction, reference.geometry.direction);
}

#[test]
fn test_sphere_distance_field_approximates_radius() {
    let radius = 6.0;
    let sphere = primitives::uv_sphere(radius, 32, 48);
    let field = rasterize(&[sphere], None, &coarse()).unwrap().remove(0);
    let spacing = field.geometry.spacing.max();

    let [nx, ny, nz] = field.size();
    for k in (0..nz).step_by(3) {
        for j in (0..ny).step_by(3) {
            for i in (0..nx).step_by(3) {
                let p = field.geometry.index_to_physical([i, j, k]);
                let expected = p.coords.norm() - radius;
                let got = field.get([i, j, k]).unwrap() as f64;
                assert!(
                    (got - expected).abs() <= 1.5 * spacing,
                    "voxel {:?}: got {got}, expected {expected}",
                    [i, j, k]
                );
            }
        }
    }
    assert!(field.get([nx / 2, ny / 2, nz / 2]).unwrap() < 0.0);
    assert!(field.get([0, 0, 0]).unwrap() > 0.0);
}

#[test]
fn test_rotated_grid_is_honored() {
    let mesh = primitives::cuboid(4.0);
    let quarter_turn = nalgebra::Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let geometry = GridGeometry::new(
        Point3::new(3.25, -3.25, -3.25),
        Vector3::repeat(0.5),
        [14, 14, 14],
    )
    .with_direction(quarter_turn);

    let binary = rasterize_surface_to_binary_volume(&mesh, &geometry).unwrap();
    // Voxel centers inside the cube are +-0.25 .. +-1.75, eight per axis
    assert_eq!(binary.count_where(|v| v > 0.0), 8 * 8 * 8);
    let center = geometry.index_to_physical([6, 6, 6]);
    assert!(center.coords.amax() < 2.0);
    assert_eq!(binary.get([6, 6, 6]), Some(1.0));
}

#[test]
fn test_empty_mesh_is_rejected() {
    let err = rasterize(&[Mesh::new()], None, &coarse()).unwrap_err();
    assert!(matches!(err, VolumeError::InvalidGeometry { .. }));
}

#[test]
fn test_common_space_and_downsample_pipeline() {
    let small = primitives::uv_sphere(3.0, 10, 16);
    let large = primitives::uv_sphere(5.0, 10, 16);
    let a = rasterize(&[small], None, &coarse()).unwrap().remove(0);
    let b = rasterize(&[large], Some(&a), &coarse()).unwrap().remove(0);
    let cropped = GridGeometry {
        size: [30, 40, 40],
        ..b.geometry.clone()
    };
    let values = (0..cropped.voxel_count())
        .map(|idx| b.get(cropped.delinearize(idx)).unwrap())
        .collect();
    let b_cropped = VolumetricField::from_values(cropped, values).unwrap();

    let pasted = paste_to_common_space(&[a, b_cropped]).unwrap();
    assert_eq!(pasted[0].size(), pasted[1].size());
    assert_eq!(pasted[0].size(), [40, 40, 40]);
    let ds = (pasted[0].geometry.spacing - pasted[1].geometry.spacing).amax();
    assert!(ds < 1e-6);

    let down = downsample(&pasted, 2.0).unwrap();
    for (orig, d) in pasted.iter().zip(&down) {
        for axis in 0..3 {
            assert_eq!(d.geometry.spacing[axis], orig.geometry.spacing[axis] * 2.0);
            assert_eq!(d.geometry.size[axis], orig.geometry.size[axis] / 2);
        }
    }
}

#[test]
fn test_nrrd_roundtrip_then_extract() {
    let dir = TempDir::new().unwrap();
    let sphere = primitives::uv_sphere(5.0, 16, 24);
    let field = rasterize(&[sphere], None, &coarse()).unwrap().remove(0);

    let path = dir.path().join("sphere.nrrd");
    save_nrrd(&field, &path).unwrap();
    let loaded = load_nrrd(&path).unwrap();
    assert_eq!(loaded.values, field.values);
    assert!(loaded.geometry.same_grid(&field.geometry, 1e-9));

    let surface = extract_isosurface(&loaded, 0.0).unwrap();
    for v in &surface.vertices {
        let r = v.position.coords.norm();
        assert!((r - 5.0).abs() < 2.0 * field.geometry.spacing.max(), "radius {r}");
    }
}

#[test]
fn test_binary_round_trip_through_mesh() {
    let cube = primitives::cuboid(6.0);
    let fields = rasterize(&[cube.clone()], None, &coarse()).unwrap();
    let binary = rasterize_surface_to_binary_volume(&cube, &fields[0].geometry).unwrap();
    let mesh = binary_volume_to_mesh(&binary, 1.0).unwrap();
    let (min, max) = mesh.bounds().unwrap();
    let tol = 1.5 * fields[0].geometry.spacing.max();
    assert!((min.x + 3.0).abs() < tol && (max.x - 3.0).abs() < tol);
}
