//! Engine facade wiring the tree, scene, directory, bus and timers together

use glam::DMat4;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bus::ModelBus;
use crate::clock::Clock;
use crate::description::CameraInfo;
use crate::directory::TransformBuffer;
use crate::pose::{PoseMsg, Time, TransformStamped};
use crate::refresh::{PoseRefresher, RefreshSettings, TickReport};
use crate::scene::{CameraMode, SceneGraph, SharedScene};
use crate::spawner::{ModelSpawner, ScheduledDiscovery, SpawnError, SpawnOutcome, SpawnRequest, SpawnSettings};
use crate::tree::LinkTree;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub refresh: RefreshSettings,
    pub spawn: SpawnSettings,
    /// Delay of the one-shot discovery at startup, zero disables it
    pub discovery_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh: RefreshSettings::default(),
            spawn: SpawnSettings::default(),
            discovery_delay: Duration::from_secs(2),
        }
    }
}

/// Point-in-time view of one link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub name: String,
    pub parent: String,
    pub feed_driven: bool,
    /// Committed pose in the parent frame
    pub local: DMat4,
    pub world: DMat4,
    pub visuals: usize,
}

pub struct CoralEngine {
    tree: Arc<RwLock<LinkTree>>,
    scene: SharedScene,
    buffer: Arc<TransformBuffer>,
    clock: Arc<Clock>,
    bus: Arc<ModelBus>,
    refresher: Arc<PoseRefresher>,
    spawner: Arc<ModelSpawner>,
    settings: EngineSettings,
}

impl CoralEngine {
    pub fn new(settings: EngineSettings) -> Self {
        let tree = Arc::new(RwLock::new(LinkTree::new()));
        let scene = SceneGraph::shared();
        let buffer = Arc::new(TransformBuffer::new());
        let clock = Arc::new(Clock::new());
        let bus = Arc::new(ModelBus::new());

        let refresher = Arc::new(PoseRefresher::new(
            tree.clone(),
            scene.clone(),
            buffer.clone(),
            clock.clone(),
            settings.refresh.clone(),
        ));
        let spawner = Arc::new(ModelSpawner::new(
            tree.clone(),
            scene.clone(),
            bus.clone(),
            settings.spawn.clone(),
        ));

        Self {
            tree,
            scene,
            buffer,
            clock,
            bus,
            refresher,
            spawner,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn scene(&self) -> SharedScene {
        self.scene.clone()
    }

    pub fn tree(&self) -> Arc<RwLock<LinkTree>> {
        self.tree.clone()
    }

    pub fn bus(&self) -> &Arc<ModelBus> {
        &self.bus
    }

    pub fn buffer(&self) -> &Arc<TransformBuffer> {
        &self.buffer
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    /// Start the refresh loop and the delayed discovery
    pub fn start(&self) -> (JoinHandle<()>, Option<ScheduledDiscovery>) {
        let refresh = tokio::spawn(self.refresher.clone().run());
        let discovery = self.spawner.schedule_discovery(self.settings.discovery_delay);
        if discovery.is_some() {
            info!(
                delay_secs = self.settings.discovery_delay.as_secs_f64(),
                "Model discovery scheduled"
            );
        }
        (refresh, discovery)
    }

    /// Run one refresh cycle synchronously
    pub fn tick(&self) -> TickReport {
        self.refresher.tick()
    }

    pub async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnOutcome, SpawnError> {
        self.spawner.spawn(request).await
    }

    pub async fn find_models(&self) -> Result<SpawnOutcome, SpawnError> {
        self.spawner.find_models().await
    }

    /// Store transforms in the directory
    ///
    /// A dynamic transform sent without a stamp is stamped with the current
    /// clock time, so it reads as fresh rather than dating from the epoch.
    pub fn set_transforms(&self, transforms: &[TransformStamped], is_static: bool) {
        let now = self.clock.now();
        for tf in transforms {
            if !is_static && tf.stamp.is_none() {
                let stamped = TransformStamped {
                    stamp: Some(now),
                    ..tf.clone()
                };
                self.buffer.set_transform(&stamped, false);
            } else {
                self.buffer.set_transform(tf, is_static);
            }
        }
    }

    /// Deliver a pose message to the links bound to `topic`
    pub fn publish_pose(&self, topic: &str, msg: &PoseMsg) -> usize {
        self.bus.publish_pose(topic, msg)
    }

    pub fn set_clock(&self, now: Time) {
        if self.clock.set_sim_time(now) {
            info!("Clock message received, switching to simulated time");
        }
    }

    pub fn advertise_description(&self, namespace: &str, description: &str, pose_topic: Option<&str>) {
        self.bus.advertise_description(namespace, description, pose_topic);
    }

    pub fn cameras(&self) -> Vec<CameraInfo> {
        self.spawner.cameras()
    }

    pub fn camera_mode(&self) -> CameraMode {
        self.scene.lock().camera()
    }

    pub fn links(&self) -> Vec<LinkSnapshot> {
        let tree = self.tree.read();
        let scene = self.scene.lock();
        tree.links()
            .map(|(_, link)| {
                let node = scene.node(link.node());
                LinkSnapshot {
                    name: link.name().to_string(),
                    parent: link
                        .parent()
                        .map(|p| tree.name_of(p).to_string())
                        .unwrap_or_default(),
                    feed_driven: link.is_feed_driven(),
                    local: node.map_or(DMat4::IDENTITY, |n| n.local),
                    world: scene.world_matrix(link.node()).unwrap_or(DMat4::IDENTITY),
                    visuals: node.map_or(0, |n| n.visuals.len()),
                }
            })
            .collect()
    }
}
