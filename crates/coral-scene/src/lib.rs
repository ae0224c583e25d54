//! Coral Scene - Bevy renderer for the shared link scene graph
//!
//! The pose engine owns the scene graph and mutates it from its refresh
//! timer. This crate mirrors that graph into Bevy entities once per frame,
//! under the same scene lock, and drives the main camera either from the
//! locked camera matrix or from an orbit controller.

pub mod camera;
pub mod mirror;
pub mod scene;

use bevy::prelude::*;
use coral_core::SharedScene;

pub use camera::{CameraLock, CameraSettings, MainCamera};
pub use mirror::{LinkEntity, SceneMirror, VisualEntity};

/// Window and initial viewpoint of the viewer
#[derive(Debug, Clone, Resource)]
pub struct ViewerSettings {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Initial camera position, looking at the world origin
    pub camera: [f32; 3],
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            title: "Coral".to_string(),
            width: 1280,
            height: 720,
            camera: [-5.0, 0.0, 2.0],
        }
    }
}

/// Plugin mirroring a [`SharedScene`] into the Bevy world
pub struct CoralScenePlugin {
    pub scene: SharedScene,
}

impl Plugin for CoralScenePlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(SceneMirror::new(self.scene.clone()))
            .add_plugins(camera::CameraPlugin)
            .add_plugins(scene::SceneSetupPlugin)
            .add_systems(Update, mirror::sync_scene.before(camera::update_camera));
    }
}

/// Open the viewer window and run until it is closed
pub fn run_viewer(shared: SharedScene, settings: ViewerSettings) {
    App::new()
        .insert_resource(ClearColor(Color::srgb(0.02, 0.12, 0.2)))
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: settings.title.clone(),
                resolution: (settings.width, settings.height).into(),
                ..default()
            }),
            ..default()
        }))
        .insert_resource(settings)
        .add_plugins(CoralScenePlugin { scene: shared })
        .run();
}
