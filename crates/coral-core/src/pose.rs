//! Pose math, timestamps, and the pose/transform messages exchanged with feeds
//!
//! Matrices use the column-vector convention: a child's world matrix is
//! `parent_world * local`.

use glam::{DMat4, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};

/// Point in time, in nanoseconds since the clock epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Time(pub i64);

impl Time {
    pub const ZERO: Time = Time(0);

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1e9) as i64)
    }

    /// Build from a `sec`/`nanosec` pair as carried by clock and header stamps
    pub fn from_sec_nanosec(sec: i64, nanosec: u32) -> Self {
        Self(sec.saturating_mul(1_000_000_000).saturating_add(i64::from(nanosec)))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 * 1e-9
    }

    /// Seconds elapsed since `earlier`, negative when `earlier` lies in the future
    pub fn secs_since(&self, earlier: Time) -> f64 {
        (self.0 as f64 - earlier.0 as f64) * 1e-9
    }
}

/// Translation or position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Vector3 {
    pub fn to_dvec3(self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}

/// Orientation quaternion, identity by default
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    #[serde(default = "default_w")]
    pub w: f64,
}

fn default_w() -> f64 {
    1.0
}

impl Default for Quaternion {
    fn default() -> Self {
        Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
    }
}

impl Quaternion {
    /// Normalized rotation; a degenerate quaternion maps to identity
    pub fn to_dquat(self) -> DQuat {
        let q = DQuat::from_xyzw(self.x, self.y, self.z, self.w);
        if q.length_squared() < 1e-12 {
            DQuat::IDENTITY
        } else {
            q.normalize()
        }
    }
}

/// Pose message pushed by a ground-truth pose feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseMsg {
    #[serde(default)]
    pub position: Vector3,
    #[serde(default)]
    pub orientation: Quaternion,
}

impl PoseMsg {
    pub fn to_matrix(&self) -> DMat4 {
        mat_from_translation_rotation(self.position, self.orientation)
    }
}

/// One stamped edge of the transform directory: `child` expressed in `parent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformStamped {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub stamp: Option<Time>,
    #[serde(default)]
    pub translation: Vector3,
    #[serde(default)]
    pub rotation: Quaternion,
}

impl TransformStamped {
    pub fn to_matrix(&self) -> DMat4 {
        mat_from_translation_rotation(self.translation, self.rotation)
    }
}

pub fn mat_from_translation_rotation(t: Vector3, q: Quaternion) -> DMat4 {
    DMat4::from_rotation_translation(q.to_dquat(), t.to_dvec3())
}

/// Matrix from a URDF-style origin: translation, fixed-axis roll/pitch/yaw, scale
pub fn mat_from_xyz_rpy(xyz: [f64; 3], rpy: [f64; 3], scale: [f64; 3]) -> DMat4 {
    let rotation = DQuat::from_euler(EulerRot::ZYX, rpy[2], rpy[1], rpy[0]);
    DMat4::from_scale_rotation_translation(
        DVec3::from_array(scale),
        rotation,
        DVec3::from_array(xyz),
    )
}

/// Parse a whitespace-separated triple such as `"0 0.1 -0.2"`
pub fn parse_triple(s: &str) -> Option<[f64; 3]> {
    let parts: Vec<f64> = s
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect();
    if parts.len() == 3 {
        Some([parts[0], parts[1], parts[2]])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_delay_sign() {
        let now = Time::from_secs_f64(100.0);
        assert!((now.secs_since(Time::from_secs_f64(99.5)) - 0.5).abs() < 1e-9);
        assert!(now.secs_since(Time::from_secs_f64(101.0)) < 0.0);
        assert_eq!(Time::from_sec_nanosec(2, 500_000_000), Time(2_500_000_000));
    }

    #[test]
    fn test_yaw_rotates_x_onto_y() {
        let m = mat_from_xyz_rpy([1.0, 2.0, 3.0], [0.0, 0.0, std::f64::consts::FRAC_PI_2], [1.0; 3]);
        let p = m.transform_point3(DVec3::X);
        assert!((p - DVec3::new(1.0, 3.0, 3.0)).length() < 1e-9);
    }

    #[test]
    fn test_degenerate_quaternion_is_identity() {
        let q = Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 0.0 };
        assert_eq!(q.to_dquat(), DQuat::IDENTITY);
    }

    #[test]
    fn test_pose_msg_defaults() {
        let msg: PoseMsg = serde_json::from_str(r#"{"position": {"x": 1.5}}"#).unwrap();
        let m = msg.to_matrix();
        assert!((m.w_axis.x - 1.5).abs() < 1e-12);
        assert_eq!(msg.orientation, Quaternion::default());
    }

    #[test]
    fn test_parse_triple() {
        assert_eq!(parse_triple("1 2 3"), Some([1.0, 2.0, 3.0]));
        assert_eq!(parse_triple("1 2"), None);
    }
}
