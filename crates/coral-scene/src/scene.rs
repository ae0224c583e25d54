//! Scene setup - lights and the world axis

use bevy::prelude::*;

/// Marker component for the main directional light
#[derive(Component)]
pub struct MainDirectionalLight;

/// Marker component for world axis visualization
#[derive(Component)]
pub struct WorldAxis;

pub struct SceneSetupPlugin;

impl Plugin for SceneSetupPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_scene);
    }
}

fn setup_scene(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.insert_resource(AmbientLight {
        color: Color::srgb(0.8, 0.9, 1.0),
        brightness: 300.0,
        ..default()
    });

    commands.spawn((
        DirectionalLight {
            illuminance: 6000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(4.0, 2.0, 10.0).looking_at(Vec3::ZERO, Vec3::Z),
        MainDirectionalLight,
    ));

    // X red, Y green, Z blue; Bevy cylinders run along Y
    let axis_mesh = meshes.add(Cylinder::new(0.01, 1.0));
    let axes = [
        (Color::srgb(0.9, 0.2, 0.2), Quat::from_rotation_z(-std::f32::consts::FRAC_PI_2), Vec3::X),
        (Color::srgb(0.2, 0.9, 0.2), Quat::IDENTITY, Vec3::Y),
        (Color::srgb(0.2, 0.4, 0.9), Quat::from_rotation_x(std::f32::consts::FRAC_PI_2), Vec3::Z),
    ];
    for (color, rotation, direction) in axes {
        commands.spawn((
            Mesh3d(axis_mesh.clone()),
            MeshMaterial3d(materials.add(StandardMaterial {
                base_color: color,
                unlit: true,
                ..default()
            })),
            Transform::from_translation(direction * 0.5).with_rotation(rotation),
            WorldAxis,
        ));
    }
}
