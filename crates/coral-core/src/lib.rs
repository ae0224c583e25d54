//! Coral Core - Link tree and pose synchronization engine
//!
//! This crate provides everything needed to keep a visual kinematic tree in
//! sync with the outside world:
//! - Robot description (URDF) parsing into ordered link descriptions
//! - An append-only link tree grafted incrementally as models are spawned
//! - A transform directory contract plus an in-process transform buffer
//! - The two-phase pose refresh cycle and the camera-follow resolver
//! - Model spawning and discovery over the in-process model bus

pub mod bus;
pub mod camera;
pub mod clock;
pub mod description;
pub mod directory;
pub mod engine;
pub mod geometry;
pub mod link;
pub mod pose;
pub mod refresh;
pub mod scene;
pub mod spawner;
pub mod tree;

pub use bus::{ModelBus, ServiceError};
pub use camera::{CameraFollow, CameraResolver};
pub use clock::Clock;
pub use description::{parse_description, CameraInfo, DescriptionError, LinkDescription};
pub use directory::{LookupError, Stamped, TimePoint, TransformBuffer, TransformDirectory};
pub use engine::{CoralEngine, EngineSettings, LinkSnapshot};
pub use geometry::{Geometry, Visual};
pub use link::{Link, PoseHandler, RefreshTarget};
pub use pose::{PoseMsg, Quaternion, Time, TransformStamped, Vector3};
pub use refresh::{CameraUpdate, PoseRefresher, RefreshSettings, TickReport};
pub use scene::{CameraMode, NodeId, SceneGraph, SceneNode, SharedScene};
pub use spawner::{ModelSpawner, ScheduledDiscovery, SpawnError, SpawnOutcome, SpawnRequest, SpawnSettings};
pub use tree::{Graft, LinkId, LinkRef, LinkTree, TreeError, WORLD_FRAME};
