//! A named rigid frame of the kinematic tree and its two-phase pose update

use glam::DMat4;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::directory::{LookupError, TimePoint, TransformDirectory};
use crate::pose::PoseMsg;
use crate::scene::{NodeId, SceneGraph};
use crate::tree::{LinkRef, TreeError};

/// Latest uncommitted pose; a newer value overwrites an unconsumed one
type PendingPose = Arc<Mutex<Option<DMat4>>>;

#[derive(Debug, Clone)]
struct ParentEdge {
    link: LinkRef,
    frame: String,
}

#[derive(Debug)]
pub struct Link {
    name: String,
    node: NodeId,
    parent: Option<ParentEdge>,
    pending: PendingPose,
    feed_driven: Arc<AtomicBool>,
}

impl Link {
    /// Create a link owning the scene node `node`, parent not set yet
    pub fn new(name: impl Into<String>, node: NodeId) -> Self {
        Self {
            name: name.into(),
            node,
            parent: None,
            pending: Arc::new(Mutex::new(None)),
            feed_driven: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a link already attached to `parent`, looked up as `frame`
    pub fn with_parent(name: impl Into<String>, node: NodeId, parent: LinkRef, frame: impl Into<String>) -> Self {
        Self {
            parent: Some(ParentEdge {
                link: parent,
                frame: frame.into(),
            }),
            ..Self::new(name, node)
        }
    }

    /// Frame name of the link, as known to the transform directory
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scene node committed poses are written to
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Owning link, `None` until the link is attached
    pub fn parent(&self) -> Option<LinkRef> {
        self.parent.as_ref().map(|p| p.link)
    }

    /// Name of the parent frame used for directory lookups
    pub fn parent_frame(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.frame.as_str())
    }

    /// Establish the ownership edge; a link is never re-parented
    pub fn set_parent(&mut self, link: LinkRef, frame: impl Into<String>) -> Result<(), TreeError> {
        if self.parent.is_some() {
            return Err(TreeError::AlreadyParented(self.name.clone()));
        }
        self.parent = Some(ParentEdge {
            link,
            frame: frame.into(),
        });
        Ok(())
    }

    /// True once a pose feed is bound; the directory is no longer consulted
    pub fn is_feed_driven(&self) -> bool {
        self.feed_driven.load(Ordering::Acquire)
    }

    /// Pose waiting for the next commit
    pub fn pending(&self) -> Option<DMat4> {
        *self.pending.lock()
    }

    /// Park a pose for the next commit, replacing any unconsumed one
    pub fn set_pending(&self, pose: DMat4) {
        *self.pending.lock() = Some(pose);
    }

    /// Detached handle for a directory refresh, usable without the tree lock
    ///
    /// `None` when the link has no parent yet or is fed by a pose feed.
    pub fn refresh_target(&self) -> Option<RefreshTarget> {
        if self.is_feed_driven() {
            return None;
        }
        let parent = self.parent.as_ref()?;
        Some(RefreshTarget {
            name: self.name.clone(),
            parent_frame: parent.frame.clone(),
            pending: self.pending.clone(),
            feed_driven: self.feed_driven.clone(),
        })
    }

    /// Pull this link's pose in its parent frame into the pending slot
    ///
    /// Returns `Ok(false)` when nothing was looked up: the link is fed by a
    /// pose feed, has no parent yet, or the directory does not know its frame.
    /// On failure the previous pending pose is left untouched.
    pub fn refresh_from(
        &self,
        directory: &dyn TransformDirectory,
        timeout: Duration,
    ) -> Result<bool, LookupError> {
        match self.refresh_target() {
            Some(target) => target.refresh_from(directory, timeout),
            None => Ok(false),
        }
    }

    /// Commit the pending pose to the owned scene node
    ///
    /// Takes the scene graph from the scene lock guard, so commits only ever
    /// happen with the lock held. Returns true when a pose was committed.
    pub fn apply_new_pose(&self, scene: &mut SceneGraph) -> bool {
        match self.pending.lock().take() {
            Some(pose) => {
                scene.set_local(self.node, pose);
                true
            }
            None => false,
        }
    }

    /// Handler feeding pose messages into this link; marks the link feed-driven
    pub fn pose_callback(&self) -> PoseHandler {
        self.feed_driven.store(true, Ordering::Release);
        PoseHandler {
            link: self.name.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// Directory refresh of one link, detached from the link tree
///
/// Shares the link's pending slot, so a refresh can wait on the directory
/// while the tree keeps growing.
#[derive(Debug, Clone)]
pub struct RefreshTarget {
    name: String,
    parent_frame: String,
    pending: PendingPose,
    feed_driven: Arc<AtomicBool>,
}

impl RefreshTarget {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look the link up in its parent frame and park the result as pending
    pub fn refresh_from(
        &self,
        directory: &dyn TransformDirectory,
        timeout: Duration,
    ) -> Result<bool, LookupError> {
        if !directory.frame_exists(&self.name) {
            return Ok(false);
        }
        let stamped = directory.lookup(&self.parent_frame, &self.name, TimePoint::Latest, timeout)?;
        // the flag is raised before any handler exists, so checking it under
        // the slot lock never overwrites a pushed pose
        let mut pending = self.pending.lock();
        if self.feed_driven.load(Ordering::Acquire) {
            return Ok(false);
        }
        *pending = Some(stamped.matrix);
        Ok(true)
    }
}

/// Pose-feed handler bound to one link
///
/// Each message is converted to a matrix and parked as the link's pending
/// pose; the next refresh cycle commits it.
#[derive(Debug, Clone)]
pub struct PoseHandler {
    link: String,
    pending: PendingPose,
}

impl PoseHandler {
    /// Name of the link this handler feeds
    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn handle(&self, msg: &PoseMsg) {
        *self.pending.lock() = Some(msg.to_matrix());
    }
}
