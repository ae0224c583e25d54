//! Periodic pose refresh cycle and camera-follow step
//!
//! Each tick runs in two phases. Phase A pulls the latest transform of every
//! link from the directory into its pending slot without holding the scene
//! lock or the tree lock. Phase B takes the scene lock once and commits every pending pose,
//! so the renderer sees either the previous tick or this one, never a mix.

use glam::DMat4;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::camera::CameraResolver;
use crate::clock::Clock;
use crate::directory::{TimePoint, TransformDirectory};
use crate::link::RefreshTarget;
use crate::scene::SharedScene;
use crate::tree::{LinkRef, LinkTree};

/// Timing and camera parameters of the refresh cycle
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub period: Duration,
    /// Virtual frame driving the locked camera
    pub camera_frame: String,
    pub link_lookup_timeout: Duration,
    pub camera_lookup_timeout: Duration,
    /// Camera transforms older than this free the camera
    pub camera_max_delay_secs: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(50),
            camera_frame: "coral_cam_view".to_string(),
            link_lookup_timeout: Duration::ZERO,
            camera_lookup_timeout: Duration::from_millis(10),
            camera_max_delay_secs: 1.0,
        }
    }
}

/// What the camera-follow step did this tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CameraUpdate {
    /// The camera frame is not in the directory
    NoFrame,
    /// No anchor found yet, camera left as is
    Unresolved,
    /// Transform to the anchor not available, camera left as is
    LookupFailed,
    Locked { matrix: DMat4 },
    /// Stale camera transform
    Freed { delay_secs: f64 },
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickReport {
    /// Links whose pending pose was refreshed from the directory
    pub refreshed: usize,
    /// Links whose lookup failed this tick
    pub failed: usize,
    /// Pending poses committed to the scene
    pub committed: usize,
    pub camera: CameraUpdate,
}

pub struct PoseRefresher {
    tree: Arc<RwLock<LinkTree>>,
    scene: SharedScene,
    directory: Arc<dyn TransformDirectory>,
    clock: Arc<Clock>,
    camera: Mutex<CameraResolver>,
    settings: RefreshSettings,
}

impl PoseRefresher {
    pub fn new(
        tree: Arc<RwLock<LinkTree>>,
        scene: SharedScene,
        directory: Arc<dyn TransformDirectory>,
        clock: Arc<Clock>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            tree,
            scene,
            directory,
            clock,
            camera: Mutex::new(CameraResolver::new(settings.camera_frame.clone())),
            settings,
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// Run one refresh cycle followed by the camera-follow step
    ///
    /// The tree lock is only held to snapshot refresh targets and to commit,
    /// never across a directory wait, so spawns are not held up by lookups.
    pub fn tick(&self) -> TickReport {
        let directory = self.directory.as_ref();

        let mut refreshed = 0;
        let mut failed = 0;
        if directory.ready() {
            let targets: Vec<RefreshTarget> = {
                let tree = self.tree.read();
                tree.links().filter_map(|(_, link)| link.refresh_target()).collect()
            };
            for target in &targets {
                match target.refresh_from(directory, self.settings.link_lookup_timeout) {
                    Ok(true) => refreshed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        failed += 1;
                        debug!(link = %target.name(), error = %e, "Pose lookup failed");
                    }
                }
            }
        }

        let committed = {
            let tree = self.tree.read();
            let mut scene = self.scene.lock();
            tree.links()
                .filter(|(_, link)| link.apply_new_pose(&mut scene))
                .count()
        };

        let camera = self.follow_camera();
        TickReport {
            refreshed,
            failed,
            committed,
            camera,
        }
    }

    fn follow_camera(&self) -> CameraUpdate {
        let directory = self.directory.as_ref();
        let frame = &self.settings.camera_frame;
        if !directory.frame_exists(frame) {
            return CameraUpdate::NoFrame;
        }

        let (anchor, anchor_name, anchor_node) = {
            let tree = self.tree.read();
            let Some(anchor) = self.camera.lock().resolve(directory, &tree) else {
                return CameraUpdate::Unresolved;
            };
            (anchor, tree.name_of(anchor).to_string(), tree.node_of(anchor))
        };
        let stamped = match directory.lookup(
            &anchor_name,
            frame,
            TimePoint::Latest,
            self.settings.camera_lookup_timeout,
        ) {
            Ok(stamped) => stamped,
            Err(e) => {
                debug!(anchor = %anchor_name, error = %e, "Camera transform unavailable");
                return CameraUpdate::LookupFailed;
            }
        };

        let delay_secs = stamped
            .stamp
            .map(|stamp| self.clock.now().secs_since(stamp))
            .unwrap_or(0.0);

        let mut scene = self.scene.lock();
        if delay_secs.abs() < self.settings.camera_max_delay_secs {
            let matrix = match anchor {
                LinkRef::World => stamped.matrix,
                LinkRef::Link(_) => {
                    let anchor_world = scene.world_matrix(anchor_node).unwrap_or(DMat4::IDENTITY);
                    anchor_world * stamped.matrix
                }
            };
            scene.lock_camera(matrix);
            CameraUpdate::Locked { matrix }
        } else {
            scene.free_camera();
            CameraUpdate::Freed { delay_secs }
        }
    }

    /// Tick forever at the configured period
    ///
    /// Ticks run on the blocking pool since directory lookups may wait.
    /// A tick that overruns the period delays the next one instead of
    /// queueing a burst.
    pub async fn run(self: Arc<Self>) {
        use tokio::time::{interval, MissedTickBehavior};

        let mut ticker = interval(self.settings.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = self.settings.period.as_millis() as u64, "Pose refresh started");

        loop {
            ticker.tick().await;
            let refresher = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || refresher.tick()).await {
                warn!(error = %e, "Pose refresh tick panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::LinkDescription;
    use crate::directory::TransformBuffer;
    use crate::pose::{Quaternion, Time, TransformStamped, Vector3};
    use crate::scene::{CameraMode, SceneGraph};
    use glam::DVec3;

    struct Fixture {
        buffer: Arc<TransformBuffer>,
        tree: Arc<RwLock<LinkTree>>,
        scene: SharedScene,
        clock: Arc<Clock>,
        refresher: PoseRefresher,
    }

    fn fixture(links: Vec<LinkDescription>) -> Fixture {
        let buffer = Arc::new(TransformBuffer::new());
        let tree = Arc::new(RwLock::new(LinkTree::new()));
        let scene = SceneGraph::shared();
        tree.write().graft(links, &mut scene.lock()).unwrap();
        let clock = Arc::new(Clock::new());
        clock.set_sim_time(Time::from_secs_f64(100.0));
        let refresher = PoseRefresher::new(
            tree.clone(),
            scene.clone(),
            buffer.clone(),
            clock.clone(),
            RefreshSettings::default(),
        );
        Fixture {
            buffer,
            tree,
            scene,
            clock,
            refresher,
        }
    }

    fn set(buffer: &TransformBuffer, parent: &str, child: &str, t: DVec3, stamp: f64) {
        buffer.set_transform(
            &TransformStamped {
                parent: parent.to_string(),
                child: child.to_string(),
                stamp: Some(Time::from_secs_f64(stamp)),
                translation: Vector3 { x: t.x, y: t.y, z: t.z },
                rotation: Quaternion::default(),
            },
            false,
        );
    }

    #[test]
    fn test_tick_commits_latest_lookup() {
        let f = fixture(vec![
            LinkDescription::new("base", None),
            LinkDescription::new("arm", Some("base")),
        ]);
        set(&f.buffer, "world", "base", DVec3::X, 100.0);
        set(&f.buffer, "base", "arm", DVec3::Y, 100.0);

        let report = f.refresher.tick();
        assert_eq!((report.refreshed, report.committed, report.failed), (2, 2, 0));
        assert_eq!(report.camera, CameraUpdate::NoFrame);

        let tree = f.tree.read();
        let arm = tree.get(tree.find("arm").unwrap()).unwrap().node();
        let p = f.scene.lock().world_matrix(arm).unwrap().transform_point3(DVec3::ZERO);
        assert!((p - DVec3::new(1.0, 1.0, 0.0)).length() < 1e-12);
    }

    #[test]
    fn test_directory_not_ready_skips_phase_a() {
        let f = fixture(vec![LinkDescription::new("base", None)]);
        let report = f.refresher.tick();
        assert_eq!((report.refreshed, report.committed), (0, 0));
    }

    #[test]
    fn test_camera_locks_on_fresh_and_frees_on_stale() {
        let f = fixture(vec![LinkDescription::new("B", None)]);
        set(&f.buffer, "world", "B", DVec3::new(10.0, 0.0, 0.0), 100.0);
        set(&f.buffer, "B", "A", DVec3::new(0.0, 1.0, 0.0), 100.0);
        set(&f.buffer, "A", "coral_cam_view", DVec3::new(0.0, 0.0, 1.0), 100.0);

        let report = f.refresher.tick();
        let CameraUpdate::Locked { matrix } = report.camera else {
            panic!("camera not locked: {:?}", report.camera);
        };
        let p = matrix.transform_point3(DVec3::ZERO);
        assert!((p - DVec3::new(10.0, 1.0, 1.0)).length() < 1e-12);
        assert_eq!(f.scene.lock().camera(), CameraMode::Locked(matrix));

        f.clock.set_sim_time(Time::from_secs_f64(100.0 + 1.0e9));
        let report = f.refresher.tick();
        assert!(matches!(report.camera, CameraUpdate::Freed { .. }));
        assert_eq!(f.scene.lock().camera(), CameraMode::Free);
    }

    #[test]
    fn test_unanchored_camera_is_left_alone() {
        let f = fixture(vec![]);
        set(&f.buffer, "odom", "coral_cam_view", DVec3::ZERO, 100.0);
        f.scene.lock().lock_camera(DMat4::IDENTITY);
        assert_eq!(f.refresher.tick().camera, CameraUpdate::Unresolved);
        assert_eq!(f.scene.lock().camera(), CameraMode::Locked(DMat4::IDENTITY));
    }

    #[tokio::test]
    async fn test_run_ticks_periodically() {
        let f = fixture(vec![LinkDescription::new("base", None)]);
        set(&f.buffer, "world", "base", DVec3::Z, 100.0);
        let refresher = Arc::new(f.refresher);
        let handle = tokio::spawn(refresher.clone().run());

        let node = f.tree.read().get(crate::tree::LinkId(0)).unwrap().node();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if f.scene.lock().local(node) == Some(DMat4::from_translation(DVec3::Z)) {
                break;
            }
        }
        assert_eq!(f.scene.lock().local(node), Some(DMat4::from_translation(DVec3::Z)));
        handle.abort();
    }

    #[test]
    fn test_tree_stays_writable_during_slow_lookup() {
        let f = fixture(vec![LinkDescription::new("base", None)]);
        // base exists but is not connected to world, so its lookup waits out the timeout
        set(&f.buffer, "odom", "base", DVec3::ZERO, 100.0);
        let settings = RefreshSettings {
            link_lookup_timeout: Duration::from_millis(1500),
            ..RefreshSettings::default()
        };
        let refresher =
            PoseRefresher::new(f.tree.clone(), f.scene.clone(), f.buffer.clone(), f.clock.clone(), settings);

        std::thread::scope(|s| {
            let ticker = s.spawn(|| refresher.tick());
            std::thread::sleep(Duration::from_millis(100));

            let started = std::time::Instant::now();
            f.tree
                .write()
                .graft(vec![LinkDescription::new("buoy", None)], &mut f.scene.lock())
                .unwrap();
            assert!(started.elapsed() < Duration::from_millis(500));

            let report = ticker.join().unwrap();
            assert_eq!(report.failed, 1);
        });
        assert_eq!(f.tree.read().len(), 2);
    }

    #[test]
    fn test_readers_never_see_half_a_tick() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let f = fixture(vec![
            LinkDescription::new("base", None),
            LinkDescription::new("arm", Some("base")),
        ]);
        let (base, arm) = {
            let tree = f.tree.read();
            (tree.get(crate::tree::LinkId(0)).unwrap().node(), tree.get(crate::tree::LinkId(1)).unwrap().node())
        };
        let done = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for k in 1..=200 {
                    let x = k as f64;
                    set(&f.buffer, "world", "base", DVec3::new(x, 0.0, 0.0), 100.0);
                    set(&f.buffer, "base", "arm", DVec3::new(x, 0.0, 0.0), 100.0);
                    f.refresher.tick();
                }
                done.store(true, Ordering::Release);
            });

            let mut checks = 0;
            while !done.load(Ordering::Acquire) || checks == 0 {
                let scene = f.scene.lock();
                let base_x = scene.local(base).unwrap().w_axis.x;
                let arm_x = scene.local(arm).unwrap().w_axis.x;
                assert_eq!(base_x, arm_x, "scene shows links from different ticks");
                checks += 1;
            }
        });

        assert_eq!(f.scene.lock().local(arm), Some(DMat4::from_translation(DVec3::new(200.0, 0.0, 0.0))));
    }
}
