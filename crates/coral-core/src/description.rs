//! Robot description (URDF) parsing
//!
//! Turns a serialized `<robot>` description into an ordered list of
//! [`LinkDescription`]s. The list is ordered parents-first: a link never
//! precedes the link it is attached to, which is what grafting relies on.

use glam::DMat4;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::geometry::{parse_rgba, Geometry, Visual};
use crate::pose::{mat_from_xyz_rpy, parse_triple};

#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("Failed to parse robot description: {0}")]
    ParseError(String),
    #[error("Joint {joint} references unknown link {link}")]
    UnknownLink { joint: String, link: String },
    #[error("Link {0} has more than one parent joint")]
    MultipleParents(String),
    #[error("Kinematic loop through link {0}")]
    Loop(String),
}

/// Camera sensor declared on a link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Link the camera is mounted on
    pub link: String,
    pub name: String,
    /// Image topic the camera publishes on
    pub topic: String,
    pub width: u32,
    pub height: u32,
    /// Horizontal field of view (radians)
    pub hfov: f64,
    /// Update rate (Hz)
    pub rate: f64,
}

/// One parsed link, ready to be grafted
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDescription {
    pub name: String,
    /// Parent link name, `None` for a root link
    pub parent: Option<String>,
    /// Joint origin: the link pose in its parent frame, when declared
    pub origin: Option<DMat4>,
    pub visuals: Vec<Visual>,
    pub cameras: Vec<CameraInfo>,
}

impl LinkDescription {
    pub fn new(name: impl Into<String>, parent: Option<&str>) -> Self {
        Self {
            name: name.into(),
            parent: parent.map(str::to_string),
            origin: None,
            visuals: Vec::new(),
            cameras: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "robot")]
struct Robot {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(default)]
    link: Vec<UrdfLink>,
    #[serde(default)]
    joint: Vec<UrdfJoint>,
    #[serde(default)]
    material: Vec<UrdfMaterial>,
    #[serde(default)]
    gazebo: Vec<Gazebo>,
}

#[derive(Debug, Deserialize)]
struct UrdfLink {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    visual: Vec<UrdfVisual>,
}

#[derive(Debug, Deserialize)]
struct UrdfVisual {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(default)]
    origin: Option<Origin>,
    geometry: UrdfGeometry,
    #[serde(default)]
    material: Option<UrdfMaterial>,
}

#[derive(Debug, Default, Deserialize)]
struct Origin {
    #[serde(rename = "@xyz", default)]
    xyz: Option<String>,
    #[serde(rename = "@rpy", default)]
    rpy: Option<String>,
}

impl Origin {
    fn to_matrix(&self) -> DMat4 {
        let xyz = self.xyz.as_deref().and_then(parse_triple).unwrap_or([0.0; 3]);
        let rpy = self.rpy.as_deref().and_then(parse_triple).unwrap_or([0.0; 3]);
        mat_from_xyz_rpy(xyz, rpy, [1.0; 3])
    }
}

#[derive(Debug, Deserialize)]
struct UrdfGeometry {
    #[serde(default)]
    mesh: Option<MeshGeom>,
    #[serde(rename = "box", default)]
    box_geom: Option<BoxGeom>,
    #[serde(default)]
    sphere: Option<SphereGeom>,
    #[serde(default)]
    cylinder: Option<CylinderGeom>,
}

#[derive(Debug, Deserialize)]
struct MeshGeom {
    #[serde(rename = "@filename")]
    filename: String,
    #[serde(rename = "@scale", default)]
    scale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BoxGeom {
    #[serde(rename = "@size")]
    size: String,
}

#[derive(Debug, Deserialize)]
struct SphereGeom {
    #[serde(rename = "@radius")]
    radius: f64,
}

#[derive(Debug, Deserialize)]
struct CylinderGeom {
    #[serde(rename = "@radius")]
    radius: f64,
    #[serde(rename = "@length")]
    length: f64,
}

#[derive(Debug, Deserialize)]
struct UrdfMaterial {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<ColorElem>,
}

#[derive(Debug, Deserialize)]
struct ColorElem {
    #[serde(rename = "@rgba")]
    rgba: String,
}

#[derive(Debug, Deserialize)]
struct UrdfJoint {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default)]
    origin: Option<Origin>,
    parent: LinkRefElem,
    child: LinkRefElem,
}

#[derive(Debug, Deserialize)]
struct LinkRefElem {
    #[serde(rename = "@link")]
    link: String,
}

#[derive(Debug, Deserialize)]
struct Gazebo {
    #[serde(rename = "@reference", default)]
    reference: Option<String>,
    #[serde(default)]
    sensor: Vec<GzSensor>,
}

#[derive(Debug, Deserialize)]
struct GzSensor {
    #[serde(rename = "@name", default)]
    name: Option<String>,
    #[serde(rename = "@type", default)]
    sensor_type: String,
    #[serde(default)]
    update_rate: Option<f64>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    camera: Option<GzCamera>,
}

#[derive(Debug, Deserialize)]
struct GzCamera {
    #[serde(default)]
    horizontal_fov: Option<f64>,
    #[serde(default)]
    image: Option<GzImage>,
}

#[derive(Debug, Deserialize)]
struct GzImage {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

fn is_thruster(link: &str) -> bool {
    link.to_ascii_lowercase().contains("thruster")
}

fn convert_geometry(g: &UrdfGeometry) -> Option<Geometry> {
    if let Some(mesh) = &g.mesh {
        let scale = mesh.scale.as_deref().and_then(parse_triple).unwrap_or([1.0; 3]);
        return Some(Geometry::mesh(mesh.filename.clone(), scale));
    }
    if let Some(b) = &g.box_geom {
        return parse_triple(&b.size).map(Geometry::cuboid);
    }
    if let Some(s) = &g.sphere {
        return Some(Geometry::sphere(s.radius));
    }
    g.cylinder.as_ref().map(|c| Geometry::cylinder(c.radius, c.length))
}

fn convert_visual(v: &UrdfVisual, materials: &HashMap<&str, [f32; 4]>) -> Option<Visual> {
    let geometry = convert_geometry(&v.geometry)?;
    let origin = v.origin.as_ref().map(Origin::to_matrix).unwrap_or(DMat4::IDENTITY);
    let color = v.material.as_ref().and_then(|m| {
        m.color
            .as_ref()
            .and_then(|c| parse_rgba(&c.rgba))
            .or_else(|| m.name.as_deref().and_then(|n| materials.get(n).copied()))
    });
    Some(Visual {
        name: v.name.clone(),
        geometry,
        origin,
        color,
    })
}

fn convert_camera(link: &str, sensor: &GzSensor) -> CameraInfo {
    let name = sensor.name.clone().unwrap_or_else(|| format!("{}_camera", link));
    let image = sensor.camera.as_ref().and_then(|c| c.image.as_ref());
    CameraInfo {
        link: link.to_string(),
        topic: sensor
            .topic
            .clone()
            .unwrap_or_else(|| format!("{}/image_raw", name)),
        name,
        width: image.and_then(|i| i.width).unwrap_or(640),
        height: image.and_then(|i| i.height).unwrap_or(480),
        hfov: sensor
            .camera
            .as_ref()
            .and_then(|c| c.horizontal_fov)
            .unwrap_or(std::f64::consts::FRAC_PI_3),
        rate: sensor.update_rate.unwrap_or(30.0),
    }
}

/// Parse a URDF document into links ordered parents-first
///
/// Visuals of thruster links are kept only when `include_thrusters` is set;
/// the thruster frames themselves are always kept.
pub fn parse_description(
    xml: &str,
    include_thrusters: bool,
) -> Result<Vec<LinkDescription>, DescriptionError> {
    let robot: Robot = from_str(xml).map_err(|e| DescriptionError::ParseError(e.to_string()))?;

    let materials: HashMap<&str, [f32; 4]> = robot
        .material
        .iter()
        .filter_map(|m| {
            let name = m.name.as_deref()?;
            let rgba = parse_rgba(&m.color.as_ref()?.rgba)?;
            Some((name, rgba))
        })
        .collect();

    let index: HashMap<&str, usize> = robot
        .link
        .iter()
        .enumerate()
        .map(|(i, l)| (l.name.as_str(), i))
        .collect();

    // parent joint of every child link, and children per link in joint order
    let mut parent_joint: Vec<Option<&UrdfJoint>> = vec![None; robot.link.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); robot.link.len()];
    for joint in &robot.joint {
        let lookup = |link: &str| {
            index.get(link).copied().ok_or_else(|| DescriptionError::UnknownLink {
                joint: joint.name.clone(),
                link: link.to_string(),
            })
        };
        let parent = lookup(&joint.parent.link)?;
        let child = lookup(&joint.child.link)?;
        if parent_joint[child].replace(joint).is_some() {
            return Err(DescriptionError::MultipleParents(joint.child.link.clone()));
        }
        children[parent].push(child);
    }

    let mut order = Vec::with_capacity(robot.link.len());
    let mut stack: Vec<usize> = (0..robot.link.len())
        .rev()
        .filter(|&i| parent_joint[i].is_none())
        .collect();
    while let Some(i) = stack.pop() {
        order.push(i);
        stack.extend(children[i].iter().rev());
    }
    if order.len() != robot.link.len() {
        let stuck = (0..robot.link.len())
            .find(|i| !order.contains(i))
            .map(|i| robot.link[i].name.clone())
            .unwrap_or_default();
        return Err(DescriptionError::Loop(stuck));
    }

    let mut cameras: HashMap<&str, Vec<CameraInfo>> = HashMap::new();
    for gz in &robot.gazebo {
        let Some(link) = gz.reference.as_deref() else {
            continue;
        };
        for sensor in gz.sensor.iter().filter(|s| s.sensor_type == "camera") {
            cameras.entry(link).or_default().push(convert_camera(link, sensor));
        }
    }

    tracing::debug!(robot = %robot.name, links = order.len(), "Parsed robot description");

    Ok(order
        .into_iter()
        .map(|i| {
            let link = &robot.link[i];
            let joint = parent_joint[i];
            let visuals = if !include_thrusters && is_thruster(&link.name) {
                Vec::new()
            } else {
                link.visual
                    .iter()
                    .filter_map(|v| convert_visual(v, &materials))
                    .collect()
            };
            LinkDescription {
                name: link.name.clone(),
                parent: joint.map(|j| j.parent.link.clone()),
                origin: joint.map(|j| {
                    j.origin.as_ref().map(Origin::to_matrix).unwrap_or(DMat4::IDENTITY)
                }),
                visuals,
                cameras: cameras.remove(link.name.as_str()).unwrap_or_default(),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    const BLUEROV: &str = r#"<?xml version="1.0"?>
<robot name="bluerov2">
    <material name="blue">
        <color rgba="0 0 0.8 1"/>
    </material>
    <link name="thruster1">
        <visual>
            <geometry><cylinder radius="0.05" length="0.1"/></geometry>
        </visual>
    </link>
    <joint name="thruster1_joint" type="continuous">
        <parent link="base_link"/>
        <child link="thruster1"/>
        <origin xyz="0.1 -0.2 0" rpy="0 0 0"/>
    </joint>
    <link name="base_link">
        <visual name="hull">
            <origin xyz="0 0 0.1" rpy="0 0 1.5707963"/>
            <geometry><mesh filename="package://bluerov2/meshes/hull.dae" scale="0.5 0.5 0.5"/></geometry>
            <material name="blue"/>
        </visual>
        <visual>
            <geometry><box size="0.4 0.3 0.2"/></geometry>
            <material name="grey"><color rgba="0.5 0.5 0.5 1"/></material>
        </visual>
        <collision>
            <geometry><box size="1 1 1"/></geometry>
        </collision>
    </link>
    <joint name="camera_joint" type="fixed">
        <parent link="base_link"/>
        <child link="camera_link"/>
        <origin xyz="0.2 0 0"/>
    </joint>
    <link name="camera_link">
        <visual>
            <geometry><sphere radius="0.02"/></geometry>
        </visual>
    </link>
    <gazebo reference="camera_link">
        <sensor type="camera" name="front">
            <update_rate>15</update_rate>
            <topic>/bluerov2/front/image</topic>
            <camera>
                <horizontal_fov>1.2</horizontal_fov>
                <image><width>800</width><height>600</height></image>
            </camera>
        </sensor>
        <sensor type="imu" name="imu"/>
    </gazebo>
</robot>"#;

    #[test]
    fn test_parents_come_first() {
        let links = parse_description(BLUEROV, false).unwrap();
        let names: Vec<_> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["base_link", "thruster1", "camera_link"]);
        assert_eq!(links[0].parent, None);
        assert_eq!(links[1].parent.as_deref(), Some("base_link"));
        assert_eq!(links[2].parent.as_deref(), Some("base_link"));
    }

    #[test]
    fn test_visuals_and_materials() {
        let links = parse_description(BLUEROV, false).unwrap();
        let base = &links[0];
        assert_eq!(base.visuals.len(), 2);
        assert_eq!(base.visuals[0].name.as_deref(), Some("hull"));
        assert_eq!(
            base.visuals[0].geometry,
            Geometry::mesh("package://bluerov2/meshes/hull.dae", [0.5; 3])
        );
        assert_eq!(base.visuals[0].color, Some([0.0, 0.0, 0.8, 1.0]));
        assert!((base.visuals[0].origin.w_axis.z - 0.1).abs() < 1e-12);
        assert_eq!(base.visuals[1].geometry, Geometry::cuboid([0.4, 0.3, 0.2]));
        assert_eq!(base.visuals[1].color, Some([0.5, 0.5, 0.5, 1.0]));
    }

    #[test]
    fn test_thruster_visuals_are_optional() {
        let without = parse_description(BLUEROV, false).unwrap();
        assert!(without[1].visuals.is_empty());

        let with = parse_description(BLUEROV, true).unwrap();
        assert_eq!(with[1].visuals[0].geometry, Geometry::cylinder(0.05, 0.1));
    }

    #[test]
    fn test_joint_origin() {
        let links = parse_description(BLUEROV, false).unwrap();
        assert!(links[0].origin.is_none());
        let origin = links[1].origin.unwrap();
        assert!((origin.transform_point3(DVec3::ZERO) - DVec3::new(0.1, -0.2, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_camera_declarations() {
        let links = parse_description(BLUEROV, false).unwrap();
        assert!(links[0].cameras.is_empty());
        let cameras = &links[2].cameras;
        assert_eq!(cameras.len(), 1);
        assert_eq!(cameras[0].link, "camera_link");
        assert_eq!(cameras[0].name, "front");
        assert_eq!(cameras[0].topic, "/bluerov2/front/image");
        assert_eq!((cameras[0].width, cameras[0].height), (800, 600));
        assert!((cameras[0].rate - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_joint_link() {
        let xml = r#"<robot name="r">
            <link name="a"/>
            <joint name="j" type="fixed"><parent link="a"/><child link="b"/></joint>
        </robot>"#;
        assert!(matches!(
            parse_description(xml, false),
            Err(DescriptionError::UnknownLink { .. })
        ));
    }

    #[test]
    fn test_kinematic_loop() {
        let xml = r#"<robot name="r">
            <link name="a"/>
            <link name="b"/>
            <joint name="ab" type="fixed"><parent link="a"/><child link="b"/></joint>
            <joint name="ba" type="fixed"><parent link="b"/><child link="a"/></joint>
        </robot>"#;
        assert!(matches!(parse_description(xml, false), Err(DescriptionError::Loop(_))));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse_description("<robot><link></robot>", false),
            Err(DescriptionError::ParseError(_))
        ));
    }
}
