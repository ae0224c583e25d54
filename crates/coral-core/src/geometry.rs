//! Visual geometry attached to links

use glam::DMat4;
use serde::{Deserialize, Serialize};

/// Closed set of attachable shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    /// External mesh resource (`package://`, `file://` or plain path)
    Mesh { uri: String, scale: [f64; 3] },
    Box { size: [f64; 3] },
    Sphere { radius: f64 },
    Cylinder { radius: f64, length: f64 },
}

impl Geometry {
    pub fn mesh(uri: impl Into<String>, scale: [f64; 3]) -> Self {
        Self::Mesh { uri: uri.into(), scale }
    }

    pub fn cuboid(size: [f64; 3]) -> Self {
        Self::Box { size }
    }

    pub fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    pub fn cylinder(radius: f64, length: f64) -> Self {
        Self::Cylinder { radius, length }
    }
}

/// A piece of geometry posed in its link frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visual {
    pub name: Option<String>,
    pub geometry: Geometry,
    /// Pose of the geometry in the link frame
    pub origin: DMat4,
    /// Linear RGBA colour, renderer default when absent
    pub color: Option<[f32; 4]>,
}

impl Visual {
    pub fn new(geometry: Geometry, origin: DMat4) -> Self {
        Self {
            name: None,
            geometry,
            origin,
            color: None,
        }
    }
}

/// Strip the URI scheme of a mesh resource into an asset path
///
/// `package://pkg/meshes/a.dae` becomes `pkg/meshes/a.dae`,
/// `file:///abs/a.stl` becomes `/abs/a.stl`.
pub fn mesh_asset_path(uri: &str) -> &str {
    uri.strip_prefix("package://")
        .or_else(|| uri.strip_prefix("file://"))
        .unwrap_or(uri)
}

/// Parse an `"r g b a"` colour string
pub fn parse_rgba(s: &str) -> Option<[f32; 4]> {
    let parts: Vec<f32> = s
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    match parts.as_slice() {
        [r, g, b, a] => Some([*r, *g, *b, *a]),
        [r, g, b] => Some([*r, *g, *b, 1.0]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_asset_path() {
        assert_eq!(mesh_asset_path("package://bluerov2/meshes/hull.dae"), "bluerov2/meshes/hull.dae");
        assert_eq!(mesh_asset_path("file:///tmp/a.stl"), "/tmp/a.stl");
        assert_eq!(mesh_asset_path("meshes/b.glb"), "meshes/b.glb");
    }

    #[test]
    fn test_parse_rgba() {
        assert_eq!(parse_rgba("0 0 1 0.5"), Some([0.0, 0.0, 1.0, 0.5]));
        assert_eq!(parse_rgba("1 1 1"), Some([1.0, 1.0, 1.0, 1.0]));
        assert_eq!(parse_rgba("red"), None);
    }
}
