//! Render-side scene graph shared between the pose engine and the renderer
//!
//! Every write goes through the single [`SharedScene`] mutex: pose commits,
//! link attachment, and camera lock/free. The renderer takes the same lock
//! while mirroring the graph, so it always sees a fully committed tick.

use glam::DMat4;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::geometry::Visual;

/// Index of a node in the scene graph
pub type NodeId = usize;

/// Scene graph behind the scene-wide lock
pub type SharedScene = Arc<Mutex<SceneGraph>>;

/// Render-attachable transform node owning visual geometry
#[derive(Debug, Clone)]
pub struct SceneNode {
    /// Name of the link owning the node
    pub name: String,
    /// `None` only for the world root
    pub parent: Option<NodeId>,
    /// Committed transform in the parent node frame
    pub local: DMat4,
    /// Geometry drawn in the node frame
    pub visuals: Vec<Visual>,
}

/// How the viewer camera is driven
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", content = "matrix", rename_all = "lowercase")]
pub enum CameraMode {
    /// User-controlled viewpoint
    Free,
    /// Pinned to a world matrix
    Locked(DMat4),
}

/// Arena of transform nodes mirrored by the viewer, plus the camera mode
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    camera: CameraMode,
    /// Bumped on every mutation so the renderer can skip unchanged frames
    revision: u64,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Node of the world frame, present from construction
    pub const ROOT: NodeId = 0;

    /// Graph holding only the world root, camera free
    pub fn new() -> Self {
        Self {
            nodes: vec![SceneNode {
                name: crate::tree::WORLD_FRAME.to_string(),
                parent: None,
                local: DMat4::IDENTITY,
                visuals: Vec::new(),
            }],
            camera: CameraMode::Free,
            revision: 0,
        }
    }

    /// Fresh graph wrapped in the scene lock
    pub fn shared() -> SharedScene {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Attach a new transform node below `parent`
    pub fn attach_link(
        &mut self,
        name: &str,
        parent: NodeId,
        local: DMat4,
        visuals: Vec<Visual>,
    ) -> NodeId {
        let id = self.nodes.len();
        debug_assert!(parent < id, "parent node must exist before its child");
        self.nodes.push(SceneNode {
            name: name.to_string(),
            parent: Some(parent),
            local,
            visuals,
        });
        self.revision += 1;
        id
    }

    /// Append visuals to an existing node
    pub fn add_visuals(&mut self, node: NodeId, visuals: Vec<Visual>) {
        if visuals.is_empty() {
            return;
        }
        if let Some(n) = self.nodes.get_mut(node) {
            n.visuals.extend(visuals);
            self.revision += 1;
        }
    }

    /// Commit a node pose; the revision only moves when the pose changes
    pub fn set_local(&mut self, node: NodeId, local: DMat4) {
        if let Some(n) = self.nodes.get_mut(node) {
            if n.local != local {
                n.local = local;
                self.revision += 1;
            }
        }
    }

    /// Committed pose of a node in its parent frame
    pub fn local(&self, node: NodeId) -> Option<DMat4> {
        self.nodes.get(node).map(|n| n.local)
    }

    /// Node pose in the world frame: `parent_world * local` up to the root
    pub fn world_matrix(&self, node: NodeId) -> Option<DMat4> {
        let mut current = self.nodes.get(node)?;
        let mut matrix = current.local;
        while let Some(parent) = current.parent {
            current = self.nodes.get(parent)?;
            matrix = current.local * matrix;
        }
        Some(matrix)
    }

    /// Pin the viewer camera to a world matrix
    pub fn lock_camera(&mut self, world: DMat4) {
        let mode = CameraMode::Locked(world);
        if self.camera != mode {
            self.camera = mode;
            self.revision += 1;
        }
    }

    /// Hand the viewer camera back to the user
    pub fn free_camera(&mut self) {
        if self.camera != CameraMode::Free {
            self.camera = CameraMode::Free;
            self.revision += 1;
        }
    }

    /// Current camera mode
    pub fn camera(&self) -> CameraMode {
        self.camera
    }

    /// All nodes, indexed by `NodeId`
    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    /// Node stored under `node`
    pub fn node(&self, node: NodeId) -> Option<&SceneNode> {
        self.nodes.get(node)
    }

    /// Mutation counter, compared by the viewer and the WebSocket push
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use glam::DVec3;

    #[test]
    fn test_world_matrix_composes_parents_first() {
        let mut scene = SceneGraph::new();
        let base = scene.attach_link("base", SceneGraph::ROOT, DMat4::from_translation(DVec3::X), vec![]);
        let arm = scene.attach_link(
            "arm",
            base,
            DMat4::from_rotation_z(std::f64::consts::FRAC_PI_2) * DMat4::from_translation(DVec3::X),
            vec![],
        );
        let tip = scene.attach_link("tip", arm, DMat4::from_translation(DVec3::X), vec![]);

        let p = scene.world_matrix(tip).unwrap().transform_point3(DVec3::ZERO);
        assert!((p - DVec3::new(1.0, 2.0, 0.0)).length() < 1e-12);
        assert_eq!(scene.node(tip).unwrap().parent, Some(arm));
    }

    #[test]
    fn test_revision_tracks_changes_only() {
        let mut scene = SceneGraph::new();
        let base = scene.attach_link("base", SceneGraph::ROOT, DMat4::IDENTITY, vec![]);
        let rev = scene.revision();
        scene.set_local(base, DMat4::IDENTITY);
        scene.free_camera();
        scene.add_visuals(base, vec![]);
        assert_eq!(scene.revision(), rev);

        scene.add_visuals(
            SceneGraph::ROOT,
            vec![Visual::new(Geometry::sphere(1.0), DMat4::IDENTITY)],
        );
        scene.lock_camera(DMat4::IDENTITY);
        assert_eq!(scene.revision(), rev + 2);
        assert_eq!(scene.camera(), CameraMode::Locked(DMat4::IDENTITY));
    }
}
