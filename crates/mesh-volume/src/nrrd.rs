//! NRRD persistence for volumetric fields.
//!
//! Writes attached-header NRRD0004 with raw little-endian `float` data and
//! the full grid geometry in `space directions` and `space origin`. Reading
//! accepts the same layout, `float` or `double` samples and either
//! `space directions` or plain `spacings`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, info};

use crate::error::{VolumeError, VolumeResult};
use crate::field::{GridGeometry, VolumetricField};

/// Save a field as `.nrrd`.
pub fn save_nrrd(field: &VolumetricField, path: &Path) -> VolumeResult<()> {
    let g = &field.geometry;
    let mut header = String::from("NRRD0004\n");
    header.push_str("# Complete NRRD file format specification at:\n");
    header.push_str("# http://teem.sourceforge.net/nrrd/format.html\n");
    header.push_str("type: float\n");
    header.push_str("dimension: 3\n");
    header.push_str("space dimension: 3\n");
    header.push_str(&format!("sizes: {} {} {}\n", g.size[0], g.size[1], g.size[2]));
    let axes: Vec<String> = (0..3)
        .map(|axis| {
            let v = g.direction.column(axis) * g.spacing[axis];
            format!("({},{},{})", v[0], v[1], v[2])
        })
        .collect();
    header.push_str(&format!("space directions: {}\n", axes.join(" ")));
    header.push_str("kinds: domain domain domain\n");
    header.push_str("endian: little\n");
    header.push_str("encoding: raw\n");
    header.push_str(&format!(
        "space origin: ({},{},{})\n\n",
        g.origin.x, g.origin.y, g.origin.z
    ));

    let mut bytes = header.into_bytes();
    bytes.reserve(field.values.len() * 4);
    for v in &field.values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }

    let mut file = fs::File::create(path).map_err(|e| VolumeError::io_write(path, e))?;
    file.write_all(&bytes)
        .map_err(|e| VolumeError::io_write(path, e))?;

    info!(path = %path.display(), size = ?g.size, "Saved field");
    Ok(())
}

/// Load a field written by [`save_nrrd`] or any compatible writer.
pub fn load_nrrd(path: &Path) -> VolumeResult<VolumetricField> {
    let bytes = fs::read(path).map_err(|e| VolumeError::io_read(path, e))?;
    let parse_err = |details: String| VolumeError::parse(path, details);

    let split = bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .ok_or_else(|| parse_err("missing blank line after header".into()))?;
    let header = std::str::from_utf8(&bytes[..split])
        .map_err(|_| parse_err("header is not valid UTF-8".into()))?;
    let data = &bytes[split + 2..];

    let mut lines = header.lines();
    let magic = lines.next().unwrap_or_default();
    if !magic.starts_with("NRRD000") {
        return Err(parse_err(format!("bad magic {:?}", magic)));
    }

    let mut fields: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        // Key/value pairs use ": ", key:=value pairs are free-form metadata
        if let Some((key, value)) = line.split_once(": ") {
            fields.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let get = |key: &str| {
        fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| parse_err(format!("missing required field '{}'", key)))
    };

    if get("dimension")? != "3" {
        return Err(parse_err("only 3-dimensional fields are supported".into()));
    }
    let encoding = get("encoding")?;
    if encoding != "raw" {
        return Err(parse_err(format!("unsupported encoding '{}'", encoding)));
    }
    if fields.contains_key("data file") || fields.contains_key("datafile") {
        return Err(parse_err("detached data files are not supported".into()));
    }
    let sample_bytes = match get("type")? {
        "float" | "float32" => 4,
        "double" | "float64" => 8,
        other => return Err(parse_err(format!("unsupported sample type '{}'", other))),
    };
    let big_endian = fields.get("endian").is_some_and(|e| e == "big");

    let sizes = parse_numbers::<usize>(get("sizes")?)
        .filter(|s| s.len() == 3)
        .ok_or_else(|| parse_err("'sizes' must list three integers".into()))?;
    let size = [sizes[0], sizes[1], sizes[2]];

    let (spacing, direction) = match fields.get("space directions") {
        Some(value) => {
            let columns = parse_vectors(value)
                .filter(|c| c.len() == 3)
                .ok_or_else(|| parse_err("'space directions' must hold three vectors".into()))?;
            let mut spacing = Vector3::zeros();
            let mut direction = Matrix3::zeros();
            for (axis, column) in columns.iter().enumerate() {
                let norm = column.norm();
                if norm <= 0.0 {
                    return Err(parse_err(format!("axis {} has zero spacing", axis)));
                }
                spacing[axis] = norm;
                direction.set_column(axis, &(column / norm));
            }
            (spacing, direction)
        }
        None => {
            let spacings = fields
                .get("spacings")
                .and_then(|s| parse_numbers::<f64>(s))
                .filter(|s| s.len() == 3)
                .unwrap_or_else(|| vec![1.0; 3]);
            (Vector3::new(spacings[0], spacings[1], spacings[2]), Matrix3::identity())
        }
    };
    let origin = match fields.get("space origin") {
        Some(value) => {
            let v = parse_vectors(value)
                .and_then(|v| v.into_iter().next())
                .ok_or_else(|| parse_err("malformed 'space origin'".into()))?;
            Point3::from(v)
        }
        None => Point3::origin(),
    };

    let geometry = GridGeometry {
        origin,
        spacing,
        size,
        direction,
    };
    let count = geometry.voxel_count();
    if data.len() < count * sample_bytes {
        return Err(parse_err(format!(
            "expected {} bytes of data, found {}",
            count * sample_bytes,
            data.len()
        )));
    }

    let values: Vec<f32> = data[..count * sample_bytes]
        .chunks_exact(sample_bytes)
        .map(|chunk| match (sample_bytes, big_endian) {
            (4, false) => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            (4, true) => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            (_, false) => f64::from_le_bytes(eight(chunk)) as f32,
            (_, true) => f64::from_be_bytes(eight(chunk)) as f32,
        })
        .collect();

    debug!(path = %path.display(), size = ?size, "Loaded field");
    VolumetricField::from_values(geometry, values)
}

fn eight(chunk: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&chunk[..8]);
    out
}

fn parse_numbers<T: std::str::FromStr>(value: &str) -> Option<Vec<T>> {
    value.split_whitespace().map(|s| s.parse().ok()).collect()
}

/// Parse `(a,b,c) (d,e,f) ...` into vectors.
fn parse_vectors(value: &str) -> Option<Vec<Vector3<f64>>> {
    value
        .split(')')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|group| {
            let inner = group.strip_prefix('(')?;
            let parts: Vec<f64> = inner
                .split(',')
                .map(|s| s.trim().parse().ok())
                .collect::<Option<_>>()?;
            (parts.len() == 3).then(|| Vector3::new(parts[0], parts[1], parts[2]))
        })
        .collect()
}
