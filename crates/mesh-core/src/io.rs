//! Mesh file I/O for STL, OBJ, and PLY formats.
//!
//! OBJ and PLY keep the indexed vertex order intact, so correspondence meshes
//! written in those formats read back in correspondence. STL stores triangle
//! soup; the reader re-indexes it, which may reorder vertices.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex};

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Stl,
    Obj,
    Ply,
}

impl MeshFormat {
    /// Detect format from file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .and_then(|ext| match ext.as_str() {
                "stl" => Some(MeshFormat::Stl),
                "obj" => Some(MeshFormat::Obj),
                "ply" => Some(MeshFormat::Ply),
                _ => None,
            })
    }
}

fn format_of(path: &Path) -> MeshResult<MeshFormat> {
    MeshFormat::from_path(path).ok_or_else(|| {
        MeshError::unsupported_format(path.extension().and_then(|e| e.to_str()).map(String::from))
    })
}

/// Load a mesh from file, auto-detecting format from extension.
pub fn load_mesh(path: &Path) -> MeshResult<Mesh> {
    let format = format_of(path)?;

    info!("Loading mesh from {:?} (format: {:?})", path, format);

    let mesh = match format {
        MeshFormat::Stl => load_stl(path)?,
        MeshFormat::Obj => load_obj(path)?,
        MeshFormat::Ply => load_ply(path)?,
    };

    if mesh.vertices.is_empty() {
        return Err(MeshError::invalid_geometry(format!(
            "{} contains no vertices",
            path.display()
        )));
    }

    mesh.validate_indices()?;
    check_coordinates(&mesh)?;

    if let Some((min, max)) = mesh.bounds() {
        let dims = max - min;
        info!(
            "Loaded mesh: {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );
        debug!(
            "Bounding box: [{:.3}, {:.3}, {:.3}] to [{:.3}, {:.3}, {:.3}]",
            min.x, min.y, min.z, max.x, max.y, max.z
        );
        if dims.x.max(dims.y).max(dims.z) == 0.0 {
            warn!("Mesh {:?} has zero extent", path);
        }
    }

    Ok(mesh)
}

fn check_coordinates(mesh: &Mesh) -> MeshResult<()> {
    for (i, v) in mesh.vertices.iter().enumerate() {
        for (name, value) in [
            ("x", v.position.x),
            ("y", v.position.y),
            ("z", v.position.z),
        ] {
            if !value.is_finite() {
                return Err(MeshError::invalid_coordinate(i, name, value));
            }
        }
    }
    Ok(())
}

/// Load mesh from STL file (binary or ASCII).
fn load_stl(path: &Path) -> MeshResult<Mesh> {
    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    // read_stl merges coincident corners into an indexed mesh
    let stl = stl_io::read_stl(&mut reader).map_err(|e| MeshError::parse_error(path, e.to_string()))?;

    let mut mesh = Mesh::with_capacity(stl.vertices.len(), stl.faces.len());
    for v in &stl.vertices {
        mesh.vertices.push(Vertex::from_coords(
            v.0[0] as f64,
            v.0[1] as f64,
            v.0[2] as f64,
        ));
    }
    for face in &stl.faces {
        mesh.faces.push([
            face.vertices[0] as u32,
            face.vertices[1] as u32,
            face.vertices[2] as u32,
        ]);
    }

    debug!(
        "STL loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );

    Ok(mesh)
}

/// Load mesh from OBJ file.
///
/// Positions are read with separate index buffers, so vertices keep their
/// file order and correspondence meshes read back index for index. Texture
/// and normal references are ignored.
fn load_obj(path: &Path) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: false,
            triangulate: true,
            ..Default::default()
        },
    )
    .map_err(|e| match e {
        tobj::LoadError::OpenFileFailed => MeshError::io_read(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
        ),
        e => MeshError::parse_error(path, e.to_string()),
    })?;

    // Models of one file index into the same position array
    let shared = models
        .windows(2)
        .all(|pair| pair[0].mesh.positions == pair[1].mesh.positions);

    let mut mesh = Mesh::new();
    let mut vertex_offset = 0u32;
    for (i, model) in models.iter().enumerate() {
        debug!("OBJ model '{}': loading", model.name);
        let obj_mesh = &model.mesh;

        if i == 0 || !shared {
            vertex_offset = mesh.vertices.len() as u32;
            for chunk in obj_mesh.positions.chunks_exact(3) {
                mesh.vertices
                    .push(Vertex::from_coords(chunk[0], chunk[1], chunk[2]));
            }
        }

        for chunk in obj_mesh.indices.chunks_exact(3) {
            mesh.faces.push([
                chunk[0] + vertex_offset,
                chunk[1] + vertex_offset,
                chunk[2] + vertex_offset,
            ]);
        }
    }

    debug!(
        "OBJ loaded: {} vertices, {} faces from {} models",
        mesh.vertices.len(),
        mesh.faces.len(),
        models.len()
    );

    Ok(mesh)
}

/// Load mesh from PLY file (ASCII or binary).
///
/// Expects `vertex` elements with `x`, `y`, `z` properties and `face` elements
/// with a `vertex_indices` list. Polygons are fan-triangulated.
fn load_ply(path: &Path) -> MeshResult<Mesh> {
    use ply_rs::parser::Parser;
    use ply_rs::ply::Property;

    let file = File::open(path).map_err(|e| MeshError::io_read(path, e))?;
    let mut reader = BufReader::new(file);

    let parser = Parser::<ply_rs::ply::DefaultElement>::new();
    let ply = parser
        .read_ply(&mut reader)
        .map_err(|e| MeshError::parse_error(path, format!("PLY parse error: {:?}", e)))?;

    let mut mesh = Mesh::new();

    if let Some(vertices) = ply.payload.get("vertex") {
        for element in vertices {
            let x = get_ply_float(element.get("x"), "x", path)?;
            let y = get_ply_float(element.get("y"), "y", path)?;
            let z = get_ply_float(element.get("z"), "z", path)?;
            mesh.vertices.push(Vertex::from_coords(x, y, z));
        }
    }

    if let Some(faces) = ply.payload.get("face") {
        for element in faces {
            let indices: Vec<u32> = match element
                .get("vertex_indices")
                .or_else(|| element.get("vertex_index"))
            {
                Some(Property::ListInt(list)) => list.iter().map(|&i| i as u32).collect(),
                Some(Property::ListUInt(list)) => list.clone(),
                Some(Property::ListUChar(list)) => list.iter().map(|&i| i as u32).collect(),
                _ => continue,
            };
            if indices.len() >= 3 {
                for i in 1..indices.len() - 1 {
                    mesh.faces.push([indices[0], indices[i], indices[i + 1]]);
                }
            }
        }
    }

    debug!(
        "PLY loaded: {} vertices, {} faces",
        mesh.vertices.len(),
        mesh.faces.len()
    );

    Ok(mesh)
}

/// Helper to extract a float value from a PLY property.
fn get_ply_float(
    prop: Option<&ply_rs::ply::Property>,
    name: &str,
    path: &Path,
) -> MeshResult<f64> {
    use ply_rs::ply::Property;

    match prop {
        Some(Property::Float(v)) => Ok(*v as f64),
        Some(Property::Double(v)) => Ok(*v),
        Some(Property::Int(v)) => Ok(*v as f64),
        Some(Property::UInt(v)) => Ok(*v as f64),
        Some(Property::Short(v)) => Ok(*v as f64),
        Some(Property::UShort(v)) => Ok(*v as f64),
        Some(Property::Char(v)) => Ok(*v as f64),
        Some(Property::UChar(v)) => Ok(*v as f64),
        _ => Err(MeshError::parse_error(
            path,
            format!("missing or invalid PLY property: {}", name),
        )),
    }
}

/// Save mesh to file, auto-detecting format from extension.
pub fn save_mesh(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    match format_of(path)? {
        MeshFormat::Stl => save_stl(mesh, path),
        MeshFormat::Obj => save_obj(mesh, path),
        MeshFormat::Ply => save_ply(mesh, path),
    }
}

/// Save mesh to STL file (binary format).
pub fn save_stl(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    mesh.validate_indices()?;
    info!("Saving mesh to {:?}", path);

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles()
        .map(|tri| {
            let n = tri.normal_unnormalized();
            let n = if n.norm() > 0.0 { n.normalize() } else { n };
            stl_io::Triangle {
                normal: stl_io::Normal::new([n.x as f32, n.y as f32, n.z as f32]),
                vertices: [
                    stl_io::Vertex::new([tri.v0.x as f32, tri.v0.y as f32, tri.v0.z as f32]),
                    stl_io::Vertex::new([tri.v1.x as f32, tri.v1.y as f32, tri.v1.z as f32]),
                    stl_io::Vertex::new([tri.v2.x as f32, tri.v2.y as f32, tri.v2.z as f32]),
                ],
            }
        })
        .collect();

    stl_io::write_stl(&mut writer, triangles.iter()).map_err(|e| MeshError::io_write(path, e))?;
    writer.flush().map_err(|e| MeshError::io_write(path, e))?;

    info!("Saved {} triangles to {:?}", mesh.face_count(), path);

    Ok(())
}

/// Save mesh to OBJ file (ASCII format).
///
/// Vertex order is written exactly, so correspondence survives a round trip.
pub fn save_obj(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    mesh.validate_indices()?;
    info!("Saving mesh to {:?} (OBJ format)", path);

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);
    let io_err = |e| MeshError::io_write(path, e);

    writeln!(writer, "# OBJ file exported by mesh-core").map_err(io_err)?;
    writeln!(writer, "# Vertices: {}", mesh.vertices.len()).map_err(io_err)?;
    writeln!(writer, "# Faces: {}", mesh.faces.len()).map_err(io_err)?;

    // Full precision: correspondence meshes are compared index by index
    for v in &mesh.vertices {
        writeln!(
            writer,
            "v {} {} {}",
            v.position.x, v.position.y, v.position.z
        )
        .map_err(io_err)?;
    }

    for face in &mesh.faces {
        writeln!(writer, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1).map_err(io_err)?;
    }

    writer.flush().map_err(io_err)?;

    info!(
        "Saved {} vertices and {} faces to {:?}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );

    Ok(())
}

/// Save mesh to PLY file (ASCII format).
pub fn save_ply(mesh: &Mesh, path: &Path) -> MeshResult<()> {
    use ply_rs::ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    };
    use ply_rs::writer::Writer;

    mesh.validate_indices()?;
    info!("Saving mesh to {:?} (PLY ASCII format)", path);

    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;

    let mut vertex_def = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex_def.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Double),
        ));
    }
    vertex_def.count = mesh.vertices.len();
    ply.header.elements.add(vertex_def);

    let mut face_def = ElementDef::new("face".to_string());
    face_def.properties.add(PropertyDef::new(
        "vertex_indices".to_string(),
        PropertyType::List(ScalarType::UChar, ScalarType::Int),
    ));
    face_def.count = mesh.faces.len();
    ply.header.elements.add(face_def);

    let vertices_payload: Vec<DefaultElement> = mesh
        .vertices
        .iter()
        .map(|v| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Double(v.position.x));
            element.insert("y".to_string(), Property::Double(v.position.y));
            element.insert("z".to_string(), Property::Double(v.position.z));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices_payload);

    let faces_payload: Vec<DefaultElement> = mesh
        .faces
        .iter()
        .map(|face| {
            let mut element = DefaultElement::new();
            element.insert(
                "vertex_indices".to_string(),
                Property::ListInt(vec![face[0] as i32, face[1] as i32, face[2] as i32]),
            );
            element
        })
        .collect();
    ply.payload.insert("face".to_string(), faces_payload);

    ply.make_consistent().map_err(|e| {
        MeshError::io_write(
            path,
            std::io::Error::other(format!("PLY consistency error: {:?}", e)),
        )
    })?;

    let file = File::create(path).map_err(|e| MeshError::io_write(path, e))?;
    let mut writer = BufWriter::new(file);

    Writer::new().write_ply(&mut writer, &mut ply).map_err(|e| {
        MeshError::io_write(path, std::io::Error::other(format!("PLY write error: {:?}", e)))
    })?;
    writer.flush().map_err(|e| MeshError::io_write(path, e))?;

    info!(
        "Saved {} vertices and {} faces to {:?} (PLY ASCII)",
        mesh.vertices.len(),
        mesh.faces.len(),
        path
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives;
    use nalgebra::Point3;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            MeshFormat::from_path(Path::new("femur.STL")),
            Some(MeshFormat::Stl)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("atlas.obj")),
            Some(MeshFormat::Obj)
        );
        assert_eq!(
            MeshFormat::from_path(Path::new("scan.ply")),
            Some(MeshFormat::Ply)
        );
        assert_eq!(MeshFormat::from_path(Path::new("image.nrrd")), None);
    }

    #[test]
    fn test_obj_round_trip_preserves_order() {
        let mesh = primitives::torus(10.0, 3.0, 12, 8);
        let file = NamedTempFile::with_suffix(".obj").unwrap();

        save_mesh(&mesh, file.path()).unwrap();
        let loaded = load_mesh(file.path()).unwrap();

        assert!(loaded.is_correspondent(&mesh));
        for (a, b) in loaded.vertices.iter().zip(&mesh.vertices) {
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn test_obj_keeps_file_vertex_order() {
        // Faces reference vertices out of order and one vertex is unused
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "v 0 0 0").unwrap();
        writeln!(file, "v 1 0 0").unwrap();
        writeln!(file, "v 0 1 0").unwrap();
        writeln!(file, "v 1 1 0").unwrap();
        writeln!(file, "v 5 5 5").unwrap();
        writeln!(file, "f 4 3 2").unwrap();
        writeln!(file, "f 3 1 2").unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.vertices[0].position, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(mesh.vertices[3].position, Point3::new(1.0, 1.0, 0.0));
        assert_eq!(mesh.vertices[4].position, Point3::new(5.0, 5.0, 5.0));
        assert_eq!(mesh.faces, vec![[3, 2, 1], [2, 0, 1]]);
    }

    #[test]
    fn test_obj_quads_are_triangulated() {
        let mut file = NamedTempFile::with_suffix(".obj").unwrap();
        writeln!(file, "v 0 0 0").unwrap();
        writeln!(file, "v 1 0 0").unwrap();
        writeln!(file, "v 1 1 0").unwrap();
        writeln!(file, "v 0 1 0").unwrap();
        writeln!(file, "f 1 2 3 4").unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.face_count(), 2);
    }

    #[test]
    fn test_ply_round_trip_preserves_order() {
        let mesh = primitives::uv_sphere(5.0, 6, 8);
        let file = NamedTempFile::with_suffix(".ply").unwrap();

        save_mesh(&mesh, file.path()).unwrap();
        let loaded = load_mesh(file.path()).unwrap();

        assert!(loaded.is_correspondent(&mesh));
    }

    #[test]
    fn test_load_ascii_stl() {
        let mut file = NamedTempFile::with_suffix(".stl").unwrap();
        writeln!(file, "solid test").unwrap();
        writeln!(file, "  facet normal 0 0 1").unwrap();
        writeln!(file, "    outer loop").unwrap();
        writeln!(file, "      vertex 0 0 0").unwrap();
        writeln!(file, "      vertex 1 0 0").unwrap();
        writeln!(file, "      vertex 0 1 0").unwrap();
        writeln!(file, "    endloop").unwrap();
        writeln!(file, "  endfacet").unwrap();
        writeln!(file, "endsolid test").unwrap();
        file.flush().unwrap();

        let mesh = load_mesh(file.path()).unwrap();
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.face_count(), 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_mesh(Path::new("shape.vtk")).unwrap_err();
        assert!(matches!(err, MeshError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = load_mesh(Path::new("/nonexistent/femur.stl")).unwrap_err();
        assert!(matches!(err, MeshError::IoRead { .. }));
    }

    #[test]
    fn test_obj_with_bad_index_is_rejected_on_save() {
        let mut mesh = primitives::cuboid(1.0);
        mesh.faces.push([0, 1, 99]);
        let file = NamedTempFile::with_suffix(".obj").unwrap();
        let err = save_mesh(&mesh, file.path()).unwrap_err();
        assert!(matches!(err, MeshError::InvalidVertexIndex { .. }));
    }
}
