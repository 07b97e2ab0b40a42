//! Point cloud loading and scaling
//!
//! Clouds arrive from the reconstruction pipeline in millimetres; the scale
//! factor (default 0.001) converts to metres at load time. The coordinate
//! frame is fixed relative to the robot base and never changes after load.

use std::fs;
use std::path::Path;

use nalgebra::Point3;

use crate::error::{CloudError, Result};

/// Default scale factor: reconstruction output is in millimetres.
pub const DEFAULT_SCALE: f64 = 0.001;

/// An immutable, scaled point cloud.
#[derive(Debug, Clone)]
pub struct PointCloud {
    points: Vec<Point3<f64>>,
    scale: f64,
}

impl PointCloud {
    /// Build a cloud from raw points, applying the scale factor.
    pub fn from_points(raw: Vec<Point3<f64>>, scale: f64) -> Result<Self> {
        if raw.is_empty() {
            return Err(CloudError::Empty.into());
        }
        let points = raw.into_iter().map(|p| p * scale).collect();
        Ok(PointCloud { points, scale })
    }

    /// Load a cloud from a file, dispatching on extension (`.ply` is parsed
    /// as ASCII PLY, anything else as whitespace-separated XYZ lines).
    pub fn load<P: AsRef<Path>>(path: P, scale: f64) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| CloudError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let raw = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ply") => parse_ply(&contents)?,
            _ => parse_xyz(&contents)?,
        };

        let cloud = Self::from_points(raw, scale)?;
        let (min, max) = cloud.bounds();
        log::info!(
            "Loaded {} points from {} (scale {}), extent {:.3} x {:.3} x {:.3} m",
            cloud.len(),
            path.display(),
            scale,
            max.x - min.x,
            max.y - min.y,
            max.z - min.z
        );
        Ok(cloud)
    }

    /// Scaled points in load order.
    #[inline]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Scale factor that was applied at load time.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Axis-aligned bounds (min corner, max corner).
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        let mut min = self.points[0];
        let mut max = self.points[0];
        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }
        (min, max)
    }
}

/// Parse whitespace-separated `x y z` lines. Blank lines and `#` comments
/// are skipped; extra columns (normals, colors) are ignored.
fn parse_xyz(contents: &str) -> Result<Vec<Point3<f64>>> {
    let mut points = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let mut coord = [0.0f64; 3];
        for (axis, slot) in coord.iter_mut().enumerate() {
            let field = fields.next().ok_or_else(|| CloudError::Malformed {
                line: idx + 1,
                reason: format!("expected 3 coordinates, got {axis}"),
            })?;
            *slot = field.parse().map_err(|_| CloudError::Malformed {
                line: idx + 1,
                reason: format!("not a number: {field}"),
            })?;
        }
        points.push(Point3::new(coord[0], coord[1], coord[2]));
    }
    Ok(points)
}

/// Parse an ASCII PLY file. Only the vertex element is consumed; faces and
/// any trailing elements are ignored.
fn parse_ply(contents: &str) -> Result<Vec<Point3<f64>>> {
    let mut lines = contents.lines().enumerate();

    match lines.next() {
        Some((_, magic)) if magic.trim() == "ply" => {}
        _ => return Err(CloudError::UnsupportedFormat("missing ply magic".into()).into()),
    }

    let mut vertex_count: Option<usize> = None;
    let mut properties: Vec<String> = Vec::new();
    let mut in_vertex_element = false;
    let mut header_end = 0usize;

    for (idx, line) in lines.by_ref() {
        let line = line.trim();
        if line.starts_with("comment") {
            continue;
        }
        if line.starts_with("format") {
            if !line.contains("ascii") {
                return Err(
                    CloudError::UnsupportedFormat("binary PLY is not supported".into()).into(),
                );
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("element ") {
            let mut parts = rest.split_whitespace();
            let name = parts.next().unwrap_or("");
            in_vertex_element = name == "vertex";
            if in_vertex_element {
                let count = parts.next().ok_or_else(|| CloudError::Malformed {
                    line: idx + 1,
                    reason: "element vertex without a count".into(),
                })?;
                vertex_count = Some(count.parse().map_err(|_| CloudError::Malformed {
                    line: idx + 1,
                    reason: format!("bad vertex count: {count}"),
                })?);
            } else if vertex_count.is_some() {
                // Vertex data must come first; later elements are ignored.
                in_vertex_element = false;
            }
            continue;
        }
        if in_vertex_element
            && let Some(rest) = line.strip_prefix("property ")
        {
            let name = rest.split_whitespace().last().unwrap_or("");
            properties.push(name.to_string());
            continue;
        }
        if line == "end_header" {
            header_end = idx + 1;
            break;
        }
    }

    let count = vertex_count
        .ok_or_else(|| CloudError::UnsupportedFormat("no vertex element in header".into()))?;
    let x_col = property_column(&properties, "x", header_end)?;
    let y_col = property_column(&properties, "y", header_end)?;
    let z_col = property_column(&properties, "z", header_end)?;

    let mut points = Vec::with_capacity(count);
    for (idx, line) in lines.take(count) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let coord = |col: usize| -> Result<f64> {
            let field = fields.get(col).ok_or_else(|| CloudError::Malformed {
                line: idx + 1,
                reason: format!("vertex line has {} fields, need {}", fields.len(), col + 1),
            })?;
            Ok(field.parse().map_err(|_| CloudError::Malformed {
                line: idx + 1,
                reason: format!("not a number: {field}"),
            })?)
        };
        points.push(Point3::new(coord(x_col)?, coord(y_col)?, coord(z_col)?));
    }

    if points.len() < count {
        return Err(CloudError::Malformed {
            line: header_end + points.len() + 1,
            reason: format!("expected {} vertices, file ends after {}", count, points.len()),
        }
        .into());
    }

    Ok(points)
}

fn property_column(properties: &[String], name: &str, header_line: usize) -> Result<usize> {
    properties
        .iter()
        .position(|p| p == name)
        .ok_or_else(|| {
            CloudError::Malformed {
                line: header_line,
                reason: format!("vertex element has no {name} property"),
            }
            .into()
        })
}
