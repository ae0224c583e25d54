//! Transform directory contract and the in-process transform buffer
//!
//! A directory answers two questions: "what is the parent frame of X" and
//! "where is frame B expressed in frame A". Lookups may wait for data up to
//! a caller-supplied timeout and fail when a frame is unknown or stale.

use glam::DMat4;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::pose::{Time, TransformStamped};

/// Longest parent chain walked before assuming a loop
const MAX_CHAIN: usize = 256;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Frame {0} does not exist")]
    UnknownFrame(String),
    #[error("Frames {parent} and {child} are not connected")]
    Disconnected { parent: String, child: String },
    #[error("Transform {parent} -> {child} is older than requested")]
    Extrapolation { parent: String, child: String },
    #[error("Parent loop detected at frame {0}")]
    Loop(String),
}

/// Time a lookup refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePoint {
    /// Most recent data available
    Latest,
    /// Data at least as recent as the given time
    At(Time),
}

/// Result of a lookup: `child` expressed in `parent`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamped {
    pub matrix: DMat4,
    /// Oldest stamp along the chain, `None` when the chain is fully static
    pub stamp: Option<Time>,
}

/// Source of frame relations and stamped transforms
pub trait TransformDirectory: Send + Sync {
    /// True once the directory has received any data
    fn ready(&self) -> bool;

    fn frame_exists(&self, frame: &str) -> bool;

    /// Immediate parent of a frame, `None` for roots and unknown frames
    fn parent_of(&self, frame: &str) -> Option<String>;

    /// Transform of `child` in `parent`, waiting at most `timeout` for data
    fn lookup(
        &self,
        parent: &str,
        child: &str,
        at: TimePoint,
        timeout: Duration,
    ) -> Result<Stamped, LookupError>;
}

#[derive(Debug, Clone)]
struct Edge {
    parent: String,
    matrix: DMat4,
    /// `None` for static transforms
    stamp: Option<Time>,
}

/// In-process directory holding the latest transform of every child frame
#[derive(Debug, Default)]
pub struct TransformBuffer {
    edges: Mutex<HashMap<String, Edge>>,
    updated: Condvar,
}

impl TransformBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a transform; a frame may be re-parented by a newer transform
    pub fn set_transform(&self, tf: &TransformStamped, is_static: bool) {
        let edge = Edge {
            parent: tf.parent.clone(),
            matrix: tf.to_matrix(),
            stamp: if is_static { None } else { Some(tf.stamp.unwrap_or_default()) },
        };
        self.edges.lock().insert(tf.child.clone(), edge);
        self.updated.notify_all();
    }

    pub fn frames(&self) -> Vec<String> {
        let edges = self.edges.lock();
        let mut frames: Vec<String> = edges
            .iter()
            .flat_map(|(child, e)| [child.clone(), e.parent.clone()])
            .collect();
        frames.sort();
        frames.dedup();
        frames
    }

    /// Chain from `frame` up to its root: `(frame, root_T_frame-so-far)` steps
    fn chain(
        edges: &HashMap<String, Edge>,
        frame: &str,
    ) -> Result<Vec<(String, DMat4, Option<Time>)>, LookupError> {
        // element i: frame name, transform of the start frame in that frame, oldest stamp
        let mut chain = vec![(frame.to_string(), DMat4::IDENTITY, None::<Time>)];
        let mut current = frame;
        while let Some(edge) = edges.get(current) {
            if chain.len() > MAX_CHAIN {
                return Err(LookupError::Loop(frame.to_string()));
            }
            let (_, below, stamp) = &chain[chain.len() - 1];
            let stamp = match (*stamp, edge.stamp) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            chain.push((edge.parent.clone(), edge.matrix * *below, stamp));
            current = &edge.parent;
        }
        Ok(chain)
    }

    fn exists(edges: &HashMap<String, Edge>, frame: &str) -> bool {
        edges.contains_key(frame) || edges.values().any(|e| e.parent == frame)
    }

    fn try_lookup(
        edges: &HashMap<String, Edge>,
        parent: &str,
        child: &str,
        at: TimePoint,
    ) -> Result<Stamped, LookupError> {
        for frame in [parent, child] {
            if !Self::exists(edges, frame) {
                return Err(LookupError::UnknownFrame(frame.to_string()));
            }
        }
        let child_chain = Self::chain(edges, child)?;
        let parent_chain = Self::chain(edges, parent)?;

        let common = child_chain.iter().find_map(|(name, ancestor_t_child, child_stamp)| {
            parent_chain
                .iter()
                .find(|(p, _, _)| p == name)
                .map(|(_, ancestor_t_parent, parent_stamp)| {
                    (*ancestor_t_child, *ancestor_t_parent, *child_stamp, *parent_stamp)
                })
        });
        let Some((ancestor_t_child, ancestor_t_parent, child_stamp, parent_stamp)) = common else {
            return Err(LookupError::Disconnected {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        };

        let stamp = match (child_stamp, parent_stamp) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let (TimePoint::At(t), Some(s)) = (at, stamp) {
            if s < t {
                return Err(LookupError::Extrapolation {
                    parent: parent.to_string(),
                    child: child.to_string(),
                });
            }
        }

        Ok(Stamped {
            matrix: ancestor_t_parent.inverse() * ancestor_t_child,
            stamp,
        })
    }
}

impl TransformDirectory for TransformBuffer {
    fn ready(&self) -> bool {
        !self.edges.lock().is_empty()
    }

    fn frame_exists(&self, frame: &str) -> bool {
        Self::exists(&self.edges.lock(), frame)
    }

    fn parent_of(&self, frame: &str) -> Option<String> {
        self.edges.lock().get(frame).map(|e| e.parent.clone())
    }

    fn lookup(
        &self,
        parent: &str,
        child: &str,
        at: TimePoint,
        timeout: Duration,
    ) -> Result<Stamped, LookupError> {
        let deadline = Instant::now() + timeout;
        let mut edges = self.edges.lock();
        loop {
            match Self::try_lookup(&edges, parent, child, at) {
                Ok(stamped) => return Ok(stamped),
                Err(LookupError::Loop(frame)) => return Err(LookupError::Loop(frame)),
                Err(e) => {
                    if self.updated.wait_until(&mut edges, deadline).timed_out() {
                        return Self::try_lookup(&edges, parent, child, at).map_err(|_| e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Quaternion, Vector3};
    use glam::DVec3;
    use std::sync::Arc;

    fn tf(parent: &str, child: &str, x: f64, stamp: f64) -> TransformStamped {
        TransformStamped {
            parent: parent.to_string(),
            child: child.to_string(),
            stamp: Some(Time::from_secs_f64(stamp)),
            translation: Vector3 { x, y: 0.0, z: 0.0 },
            rotation: Quaternion::default(),
        }
    }

    fn origin_of(m: DMat4) -> DVec3 {
        m.transform_point3(DVec3::ZERO)
    }

    #[test]
    fn test_ready_and_parents() {
        let buffer = TransformBuffer::new();
        assert!(!buffer.ready());
        buffer.set_transform(&tf("world", "base", 1.0, 1.0), false);
        assert!(buffer.ready());
        assert!(buffer.frame_exists("world"));
        assert!(buffer.frame_exists("base"));
        assert!(!buffer.frame_exists("arm"));
        assert_eq!(buffer.parent_of("base").as_deref(), Some("world"));
        assert_eq!(buffer.parent_of("world"), None);
        assert_eq!(buffer.frames(), ["base", "world"]);
    }

    #[test]
    fn test_chain_composition_through_common_ancestor() {
        let buffer = TransformBuffer::new();
        buffer.set_transform(&tf("world", "base", 1.0, 5.0), false);
        buffer.set_transform(&tf("base", "arm", 2.0, 3.0), false);
        buffer.set_transform(&tf("world", "dock", 10.0, 0.0), true);

        let arm = buffer.lookup("world", "arm", TimePoint::Latest, Duration::ZERO).unwrap();
        assert!((origin_of(arm.matrix) - DVec3::new(3.0, 0.0, 0.0)).length() < 1e-12);
        assert_eq!(arm.stamp, Some(Time::from_secs_f64(3.0)));

        let arm_in_dock = buffer.lookup("dock", "arm", TimePoint::Latest, Duration::ZERO).unwrap();
        assert!((origin_of(arm_in_dock.matrix) - DVec3::new(-7.0, 0.0, 0.0)).length() < 1e-12);

        let dock = buffer.lookup("world", "dock", TimePoint::Latest, Duration::ZERO).unwrap();
        assert_eq!(dock.stamp, None);
    }

    #[test]
    fn test_unknown_and_disconnected() {
        let buffer = TransformBuffer::new();
        buffer.set_transform(&tf("world", "base", 1.0, 1.0), false);
        buffer.set_transform(&tf("map", "buoy", 1.0, 1.0), false);
        assert_eq!(
            buffer.lookup("world", "ghost", TimePoint::Latest, Duration::ZERO),
            Err(LookupError::UnknownFrame("ghost".to_string()))
        );
        assert!(matches!(
            buffer.lookup("world", "buoy", TimePoint::Latest, Duration::ZERO),
            Err(LookupError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_lookup_at_requires_recent_data() {
        let buffer = TransformBuffer::new();
        buffer.set_transform(&tf("world", "base", 1.0, 2.0), false);
        assert!(matches!(
            buffer.lookup("world", "base", TimePoint::At(Time::from_secs_f64(3.0)), Duration::ZERO),
            Err(LookupError::Extrapolation { .. })
        ));
        assert!(buffer
            .lookup("world", "base", TimePoint::At(Time::from_secs_f64(2.0)), Duration::ZERO)
            .is_ok());
    }

    #[test]
    fn test_lookup_waits_for_late_frame() {
        let buffer = Arc::new(TransformBuffer::new());
        let writer = buffer.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            writer.set_transform(&tf("world", "late", 4.0, 1.0), false);
        });
        let found = buffer
            .lookup("world", "late", TimePoint::Latest, Duration::from_secs(5))
            .unwrap();
        assert!((origin_of(found.matrix).x - 4.0).abs() < 1e-12);
        handle.join().unwrap();
    }

    #[test]
    fn test_parent_loop_is_reported() {
        let buffer = TransformBuffer::new();
        buffer.set_transform(&tf("a", "b", 1.0, 1.0), false);
        buffer.set_transform(&tf("b", "a", 1.0, 1.0), false);
        assert!(matches!(
            buffer.lookup("a", "b", TimePoint::Latest, Duration::from_secs(1)),
            Err(LookupError::Loop(_))
        ));
    }
}
