//! Mirror of the shared scene graph into Bevy entities

use bevy::prelude::*;
use coral_core::geometry::mesh_asset_path;
use coral_core::{CameraMode, Geometry, SharedScene, Visual};
use tracing::{debug, warn};

use crate::camera::CameraLock;

/// Entity standing for one scene graph node
#[derive(Component)]
pub struct LinkEntity {
    pub node: usize,
    pub name: String,
}

/// Visual geometry attached below a link entity
#[derive(Component)]
pub struct VisualEntity {
    pub node: usize,
    pub index: usize,
}

#[derive(Resource)]
pub struct SceneMirror {
    scene: SharedScene,
    /// Revision mirrored last, `None` before the first frame
    revision: Option<u64>,
    /// Entity of each mirrored node, indexed like the scene graph
    entities: Vec<Entity>,
    /// Number of visuals already spawned per node
    visuals: Vec<usize>,
}

impl SceneMirror {
    pub fn new(scene: SharedScene) -> Self {
        Self {
            scene,
            revision: None,
            entities: Vec::new(),
            visuals: Vec::new(),
        }
    }

    pub fn entity(&self, node: usize) -> Option<Entity> {
        self.entities.get(node).copied()
    }
}

pub fn to_mat4(m: glam::DMat4) -> Mat4 {
    Mat4::from_cols_array(&m.to_cols_array().map(|v| v as f32))
}

/// Mirror new nodes, visuals, committed poses and the camera mode
///
/// Runs with the scene lock held, so a frame never shows half a refresh.
pub fn sync_scene(
    mut commands: Commands,
    mut mirror: ResMut<SceneMirror>,
    mut camera_lock: ResMut<CameraLock>,
    mut transforms: Query<&mut Transform, With<LinkEntity>>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    asset_server: Res<AssetServer>,
) {
    let shared = mirror.scene.clone();
    let scene = shared.lock();
    if mirror.revision == Some(scene.revision()) {
        return;
    }

    for (id, node) in scene.nodes().iter().enumerate() {
        let transform = Transform::from_matrix(to_mat4(node.local));
        if id >= mirror.entities.len() {
            let entity = commands
                .spawn((
                    transform,
                    Visibility::default(),
                    LinkEntity {
                        node: id,
                        name: node.name.clone(),
                    },
                ))
                .id();
            if let Some(parent) = node.parent.and_then(|p| mirror.entity(p)) {
                commands.entity(parent).add_child(entity);
            }
            debug!(link = %node.name, "Link entity spawned");
            mirror.entities.push(entity);
            mirror.visuals.push(0);
        } else if let Ok(mut current) = transforms.get_mut(mirror.entities[id]) {
            if *current != transform {
                *current = transform;
            }
        }

        let spawned = mirror.visuals[id];
        for (index, visual) in node.visuals.iter().enumerate().skip(spawned) {
            let child = spawn_visual(
                &mut commands,
                &mut meshes,
                &mut materials,
                &asset_server,
                visual,
                VisualEntity { node: id, index },
            );
            commands.entity(mirror.entities[id]).add_child(child);
        }
        mirror.visuals[id] = node.visuals.len();
    }

    camera_lock.0 = match scene.camera() {
        CameraMode::Locked(m) => Some(Transform::from_matrix(to_mat4(m))),
        CameraMode::Free => None,
    };
    mirror.revision = Some(scene.revision());
}

fn spawn_visual(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    asset_server: &AssetServer,
    visual: &Visual,
    marker: VisualEntity,
) -> Entity {
    let transform = Transform::from_matrix(to_mat4(visual.origin));
    let color = visual
        .color
        .map(|[r, g, b, a]| Color::linear_rgba(r, g, b, a))
        .unwrap_or(Color::srgb(0.7, 0.7, 0.75));
    let material = materials.add(StandardMaterial {
        base_color: color,
        alpha_mode: if color.alpha() < 1.0 {
            AlphaMode::Blend
        } else {
            AlphaMode::Opaque
        },
        ..default()
    });

    let mesh = match &visual.geometry {
        Geometry::Box { size } => meshes.add(Cuboid::new(size[0] as f32, size[1] as f32, size[2] as f32)),
        Geometry::Sphere { radius } => meshes.add(Sphere::new(*radius as f32)),
        // URDF cylinders run along Z, Bevy's along Y
        Geometry::Cylinder { radius, length } => {
            let mesh = meshes.add(Cylinder::new(*radius as f32, *length as f32));
            return commands
                .spawn((
                    transform,
                    Visibility::default(),
                    marker,
                ))
                .with_child((
                    Mesh3d(mesh),
                    MeshMaterial3d(material),
                    Transform::from_rotation(Quat::from_rotation_x(std::f32::consts::FRAC_PI_2)),
                ))
                .id();
        }
        Geometry::Mesh { uri, scale } => {
            let path = mesh_asset_path(uri);
            if path.ends_with(".glb") || path.ends_with(".gltf") {
                let scene = asset_server.load(GltfAssetLabel::Scene(0).from_asset(path.to_string()));
                let scaled = transform.with_scale(transform.scale * Vec3::from_array(scale.map(|v| v as f32)));
                return commands.spawn((SceneRoot(scene), scaled, marker)).id();
            }
            warn!(mesh = %uri, "Unsupported mesh format, drawing its placeholder");
            meshes.add(Cuboid::new(0.1, 0.1, 0.1))
        }
    };
    commands
        .spawn((Mesh3d(mesh), MeshMaterial3d(material), transform, marker))
        .id()
}

#[cfg(test)]
mod tests {
    use super::*;
    use coral_core::SceneGraph;
    use glam::{DMat4, DVec3};

    #[test]
    fn test_to_mat4_keeps_translation() {
        let m = to_mat4(DMat4::from_translation(DVec3::new(1.0, -2.0, 3.5)));
        assert_eq!(m.w_axis.truncate(), Vec3::new(1.0, -2.0, 3.5));
    }

    #[test]
    fn test_sync_spawns_and_updates_links() {
        let shared = SceneGraph::shared();
        let base = shared
            .lock()
            .attach_link("base", SceneGraph::ROOT, DMat4::IDENTITY, vec![]);

        let mut app = App::new();
        app.add_plugins((MinimalPlugins, AssetPlugin::default()))
            .init_asset::<Mesh>()
            .init_asset::<StandardMaterial>()
            .init_resource::<CameraLock>()
            .insert_resource(SceneMirror::new(shared.clone()))
            .add_systems(Update, sync_scene);
        app.update();

        let mirror = app.world().resource::<SceneMirror>();
        assert_eq!(mirror.entities.len(), 2);
        let entity = mirror.entity(base).unwrap();

        shared
            .lock()
            .set_local(base, DMat4::from_translation(DVec3::new(0.0, 0.0, 4.0)));
        shared.lock().lock_camera(DMat4::IDENTITY);
        app.update();

        let transform = app.world().get::<Transform>(entity).unwrap();
        assert_eq!(transform.translation, Vec3::new(0.0, 0.0, 4.0));
        assert!(app.world().resource::<CameraLock>().0.is_some());
    }
}
