//! Model spawning and discovery
//!
//! A model comes either from a description file on disk or from the
//! `robot_description` parameter of a running namespace. Its links are
//! grafted onto the shared tree and, when the model publishes a ground-truth
//! pose, its root link is bound to that pose feed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{join_topic, normalize_namespace, ModelBus, ServiceError, DESCRIPTION_PARAM, POSE_TYPE};
use crate::description::{parse_description, CameraInfo, DescriptionError};
use crate::scene::SharedScene;
use crate::tree::{Graft, LinkTree, TreeError};

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Cannot read world file {path}: {source}")]
    WorldFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Description(#[from] DescriptionError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Spawn service request; all fields empty triggers discovery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRequest {
    pub robot_namespace: String,
    /// Pose topic relative to the namespace
    pub pose_topic: String,
    /// Path of a static description file
    pub world_model: String,
}

impl SpawnRequest {
    pub fn namespace(namespace: impl Into<String>, pose_topic: impl Into<String>) -> Self {
        Self {
            robot_namespace: namespace.into(),
            pose_topic: pose_topic.into(),
            world_model: String::new(),
        }
    }

    pub fn world(path: impl Into<String>) -> Self {
        Self {
            world_model: path.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SpawnOutcome {
    Spawned {
        /// `None` for world files
        namespace: Option<String>,
        links: Vec<String>,
        cameras: Vec<CameraInfo>,
        /// Absolute pose topic the root link is bound to
        pose_topic: Option<String>,
    },
    /// Namespace already spawned, nothing done
    AlreadyKnown { namespace: String },
    /// Outcome of each description found on the bus
    Discovered { models: Vec<SpawnOutcome> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSettings {
    pub include_thrusters: bool,
    /// Longest wait for a namespace's description service
    pub description_timeout: Duration,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            include_thrusters: false,
            description_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ModelSpawner {
    tree: Arc<RwLock<LinkTree>>,
    scene: SharedScene,
    bus: Arc<ModelBus>,
    settings: SpawnSettings,
    cameras: RwLock<Vec<CameraInfo>>,
    /// Serializes spawns; never held together with the scene lock across I/O
    spawning: tokio::sync::Mutex<()>,
}

impl ModelSpawner {
    pub fn new(
        tree: Arc<RwLock<LinkTree>>,
        scene: SharedScene,
        bus: Arc<ModelBus>,
        settings: SpawnSettings,
    ) -> Self {
        Self {
            tree,
            scene,
            bus,
            settings,
            cameras: RwLock::new(Vec::new()),
            spawning: tokio::sync::Mutex::new(()),
        }
    }

    /// Cameras declared by every model spawned so far
    pub fn cameras(&self) -> Vec<CameraInfo> {
        self.cameras.read().clone()
    }

    pub async fn spawn(&self, request: &SpawnRequest) -> Result<SpawnOutcome, SpawnError> {
        let _spawning = self.spawning.lock().await;
        self.spawn_locked(request).await
    }

    /// Spawn every model whose description is advertised on the bus
    pub async fn find_models(&self) -> Result<SpawnOutcome, SpawnError> {
        let _spawning = self.spawning.lock().await;
        self.find_models_locked().await
    }

    async fn spawn_locked(&self, request: &SpawnRequest) -> Result<SpawnOutcome, SpawnError> {
        if request.robot_namespace.is_empty() && request.world_model.is_empty() {
            self.find_models_locked().await
        } else if !request.world_model.is_empty() {
            self.spawn_world(&request.world_model).await
        } else {
            self.spawn_namespace(&request.robot_namespace, &request.pose_topic).await
        }
    }

    async fn spawn_world(&self, path: &str) -> Result<SpawnOutcome, SpawnError> {
        let path = PathBuf::from(path);
        let xml = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SpawnError::WorldFile {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), "Loading world");
        let graft = self.parse(&xml)?;
        Ok(self.spawned(None, graft, None))
    }

    async fn spawn_namespace(&self, namespace: &str, pose_topic: &str) -> Result<SpawnOutcome, SpawnError> {
        let namespace = normalize_namespace(namespace);
        if self.tree.read().has_model(&namespace) {
            debug!(namespace = %namespace, "Model already spawned");
            return Ok(SpawnOutcome::AlreadyKnown { namespace });
        }

        let xml = self
            .bus
            .get_parameter(&namespace, DESCRIPTION_PARAM, self.settings.description_timeout)
            .await?;
        let graft = self.parse(&xml)?;

        let pose_topic = match (pose_topic.is_empty(), graft.root()) {
            (false, Some(root)) => {
                let topic = join_topic(&namespace, pose_topic);
                let tree = self.tree.read();
                if let Some(link) = tree.get(root) {
                    info!(
                        namespace = %namespace,
                        topic = %topic,
                        link = %link.name(),
                        "Model pose published on feed"
                    );
                    self.bus.subscribe_pose(&topic, link.pose_callback());
                }
                Some(topic)
            }
            _ => None,
        };
        self.tree.write().register_model(&namespace);
        info!(namespace = %namespace, links = graft.added.len(), "Model spawned");
        Ok(self.spawned(Some(namespace), graft, pose_topic))
    }

    async fn find_models_locked(&self) -> Result<SpawnOutcome, SpawnError> {
        let topics = self.bus.topics();
        let suffix = format!("/{DESCRIPTION_PARAM}");

        let mut models = Vec::new();
        for (topic, _) in &topics {
            let Some(namespace) = topic.strip_suffix(&suffix) else {
                continue;
            };
            let prefix = format!("{namespace}/");
            let pose_topic = topics
                .iter()
                .find(|(t, ty)| ty == POSE_TYPE && t.starts_with(&prefix))
                .map(|(t, _)| &t[prefix.len()..])
                .unwrap_or_default();

            match self.spawn_namespace(namespace, pose_topic).await {
                Ok(outcome) => models.push(outcome),
                Err(e) => warn!(namespace = %namespace, error = %e, "Cannot spawn discovered model"),
            }
        }
        Ok(SpawnOutcome::Discovered { models })
    }

    /// Parse a description and graft it onto the tree
    fn parse(&self, xml: &str) -> Result<Graft, SpawnError> {
        let batch = parse_description(xml, self.settings.include_thrusters)?;
        let graft = {
            let mut tree = self.tree.write();
            let mut scene = self.scene.lock();
            tree.graft(batch, &mut scene)?
        };
        for camera in &graft.cameras {
            if self.bus.is_advertised(&camera.topic) {
                warn!(topic = %camera.topic, "Image topic already advertised by another publisher");
            }
        }
        self.cameras.write().extend(graft.cameras.iter().cloned());
        Ok(graft)
    }

    fn spawned(&self, namespace: Option<String>, graft: Graft, pose_topic: Option<String>) -> SpawnOutcome {
        let tree = self.tree.read();
        SpawnOutcome::Spawned {
            namespace,
            links: graft
                .added
                .iter()
                .filter_map(|id| tree.get(*id).map(|l| l.name().to_string()))
                .collect(),
            cameras: graft.cameras,
            pose_topic,
        }
    }

    /// Run discovery once after `delay`; `None` when the delay is zero
    pub fn schedule_discovery(self: &Arc<Self>, delay: Duration) -> Option<ScheduledDiscovery> {
        if delay.is_zero() {
            return None;
        }
        let spawner = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match spawner.find_models().await {
                Ok(SpawnOutcome::Discovered { models }) => {
                    info!(models = models.len(), "Delayed model discovery done")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Delayed model discovery failed"),
            }
        });
        Some(ScheduledDiscovery { handle })
    }
}

/// Pending one-shot discovery; dropping it does not cancel it
#[derive(Debug)]
pub struct ScheduledDiscovery {
    handle: JoinHandle<()>,
}

impl ScheduledDiscovery {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the discovery to run or be cancelled
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}
