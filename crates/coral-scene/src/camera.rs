//! Main camera: orbit navigation, or pinned to the locked camera matrix

use bevy::input::mouse::{AccumulatedMouseMotion, AccumulatedMouseScroll};
use bevy::prelude::*;

use crate::ViewerSettings;

/// Orbit controller settings (Z-up)
#[derive(Debug, Clone, Resource)]
pub struct CameraSettings {
    pub distance: f32,
    pub target_distance: f32,
    pub azimuth: f32,
    pub elevation: f32,
    pub target: Vec3,
    pub target_focus: Vec3,
    pub sensitivity: f32,
    pub zoom_speed: f32,
    pub smooth_factor: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            distance: 5.0,
            target_distance: 5.0,
            azimuth: std::f32::consts::PI,
            elevation: 0.4,
            target: Vec3::ZERO,
            target_focus: Vec3::ZERO,
            sensitivity: 0.005,
            zoom_speed: 0.1,
            smooth_factor: 0.15,
        }
    }
}

impl CameraSettings {
    /// Orbit around the origin from `position`
    pub fn looking_from(position: Vec3) -> Self {
        let distance = position.length().max(0.1);
        Self {
            distance,
            target_distance: distance,
            azimuth: position.y.atan2(position.x),
            elevation: (position.z / distance).clamp(-1.0, 1.0).asin(),
            ..default()
        }
    }

    /// Camera position on its orbit
    pub fn eye(&self) -> Vec3 {
        let x = self.distance * self.azimuth.cos() * self.elevation.cos();
        let y = self.distance * self.azimuth.sin() * self.elevation.cos();
        let z = self.distance * self.elevation.sin();
        self.target + Vec3::new(x, y, z)
    }
}

/// World transform the camera is pinned to, `None` when free
#[derive(Debug, Clone, Default, Resource)]
pub struct CameraLock(pub Option<Transform>);

/// Marker component for the main camera
#[derive(Component)]
pub struct MainCamera;

pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CameraLock>()
            .add_systems(Startup, spawn_camera)
            .add_systems(Update, update_camera);
    }
}

fn spawn_camera(mut commands: Commands, viewer: Option<Res<ViewerSettings>>) {
    let settings = viewer
        .map(|v| CameraSettings::looking_from(Vec3::from_array(v.camera)))
        .unwrap_or_default();
    commands.spawn((
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            near: 0.01,
            far: 2000.0,
            ..default()
        }),
        Transform::from_translation(settings.eye()).looking_at(settings.target, Vec3::Z),
        MainCamera,
    ));
    commands.insert_resource(settings);
}

pub fn update_camera(
    mut camera_query: Query<&mut Transform, With<MainCamera>>,
    settings: Option<ResMut<CameraSettings>>,
    lock: Res<CameraLock>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mouse_scroll: Res<AccumulatedMouseScroll>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    time: Res<Time>,
) {
    let Ok(mut transform) = camera_query.single_mut() else {
        return;
    };
    if let Some(locked) = lock.0 {
        *transform = locked;
        return;
    }
    let Some(mut settings) = settings else {
        return;
    };

    let motion = mouse_motion.delta;
    if mouse_button.pressed(MouseButton::Left) {
        settings.azimuth -= motion.x * settings.sensitivity;
        settings.elevation = (settings.elevation + motion.y * settings.sensitivity).clamp(-1.5, 1.5);
    }
    if mouse_button.pressed(MouseButton::Right) {
        let right = Vec3::new(settings.azimuth.sin(), -settings.azimuth.cos(), 0.0);
        let pan_speed = settings.distance * 0.002;
        settings.target_focus += right * motion.x * pan_speed;
        settings.target_focus += Vec3::Z * motion.y * pan_speed;
    }
    if mouse_scroll.delta.y != 0.0 {
        let zoom_factor = 1.0 - mouse_scroll.delta.y * settings.zoom_speed;
        settings.target_distance = (settings.target_distance * zoom_factor).clamp(0.2, 500.0);
    }

    let dt = time.delta_secs();
    let lerp_factor = 1.0 - (-settings.smooth_factor * 60.0 * dt).exp();
    settings.distance += (settings.target_distance - settings.distance) * lerp_factor;
    let target = settings.target + (settings.target_focus - settings.target) * lerp_factor;
    settings.target = target;

    transform.translation = settings.eye();
    transform.look_at(settings.target, Vec3::Z);
}
