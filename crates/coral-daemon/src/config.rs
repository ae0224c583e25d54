//! Configuration loading and validation

use anyhow::Result;
use coral_core::{EngineSettings, RefreshSettings, SpawnSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("engine.pose_period_ms must be greater than zero")]
    ZeroPosePeriod,
    #[error("engine.camera_max_delay_secs must be positive, got {0}")]
    InvalidCameraDelay(f64),
    #[error("engine.camera_frame must not be empty")]
    EmptyCameraFrame,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gui: GuiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8090".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pose refresh period
    #[serde(default = "default_pose_period")]
    pub pose_period_ms: u64,
    /// Virtual frame the camera follows
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,
    #[serde(default = "default_camera_lookup_timeout")]
    pub camera_lookup_timeout_ms: u64,
    #[serde(default)]
    pub link_lookup_timeout_ms: u64,
    /// Older camera transforms free the camera
    #[serde(default = "default_camera_max_delay")]
    pub camera_max_delay_secs: f64,
    /// Keep visuals of thruster links
    #[serde(default)]
    pub with_thrusters: bool,
    /// Delay before the startup discovery (0 disables it)
    #[serde(default = "default_spawn_auto")]
    pub spawn_auto_secs: u64,
    #[serde(default = "default_description_timeout")]
    pub description_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pose_period_ms: default_pose_period(),
            camera_frame: default_camera_frame(),
            camera_lookup_timeout_ms: default_camera_lookup_timeout(),
            link_lookup_timeout_ms: 0,
            camera_max_delay_secs: default_camera_max_delay(),
            with_thrusters: false,
            spawn_auto_secs: default_spawn_auto(),
            description_timeout_ms: default_description_timeout(),
        }
    }
}

fn default_pose_period() -> u64 {
    50
}

fn default_camera_frame() -> String {
    "coral_cam_view".to_string()
}

fn default_camera_lookup_timeout() -> u64 {
    10
}

fn default_camera_max_delay() -> f64 {
    1.0
}

fn default_spawn_auto() -> u64 {
    2
}

fn default_description_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuiConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Initial camera position, looking at the world origin
    #[serde(default = "default_camera")]
    pub camera: [f32; 3],
    /// Run without the viewer window
    #[serde(default)]
    pub headless: bool,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            camera: default_camera(),
            headless: false,
        }
    }
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_camera() -> [f32; 3] {
    [-5.0, 0.0, 2.0]
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.pose_period_ms == 0 {
            return Err(ConfigError::ZeroPosePeriod);
        }
        let delay = self.engine.camera_max_delay_secs;
        if delay.is_nan() || delay <= 0.0 {
            return Err(ConfigError::InvalidCameraDelay(delay));
        }
        if self.engine.camera_frame.is_empty() {
            return Err(ConfigError::EmptyCameraFrame);
        }
        Ok(())
    }

    /// Convert to EngineSettings
    pub fn to_engine_settings(&self) -> EngineSettings {
        let engine = &self.engine;
        EngineSettings {
            refresh: RefreshSettings {
                period: Duration::from_millis(engine.pose_period_ms),
                camera_frame: engine.camera_frame.clone(),
                link_lookup_timeout: Duration::from_millis(engine.link_lookup_timeout_ms),
                camera_lookup_timeout: Duration::from_millis(engine.camera_lookup_timeout_ms),
                camera_max_delay_secs: engine.camera_max_delay_secs,
            },
            spawn: SpawnSettings {
                include_thrusters: engine.with_thrusters,
                description_timeout: Duration::from_millis(engine.description_timeout_ms),
            },
            discovery_delay: Duration::from_secs(engine.spawn_auto_secs),
        }
    }
}

/// Load configuration from file, defaults when it does not exist
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        config
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Config::default()
    };
    config.validate()?;
    Ok(config)
}
