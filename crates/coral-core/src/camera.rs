//! Camera-follow resolver
//!
//! The viewer camera can be pinned to a virtual frame published in the
//! transform directory. Links fed by pose feeds are unknown to the
//! directory, so the camera frame is anchored to the closest ancestor that
//! is either the world root or a tracked link.

use tracing::debug;

use crate::directory::TransformDirectory;
use crate::tree::{LinkRef, LinkTree};

/// Longest ancestor walk before giving up for this tick
const MAX_WALK: usize = 256;

/// Memo of the last camera parent resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraFollow {
    Unresolved,
    Resolved {
        /// Tracked link (or world) the camera is anchored to
        anchor: LinkRef,
        /// Frame name of the anchor, compared against the directory parent
        name: String,
    },
}

#[derive(Debug)]
pub struct CameraResolver {
    frame: String,
    state: CameraFollow,
}

impl CameraResolver {
    /// Resolver for `frame`, starting unresolved
    pub fn new(frame: impl Into<String>) -> Self {
        Self {
            frame: frame.into(),
            state: CameraFollow::Unresolved,
        }
    }

    /// Name of the camera-follow frame
    pub fn frame(&self) -> &str {
        &self.frame
    }

    /// Anchor memo as of the last resolve
    pub fn state(&self) -> &CameraFollow {
        &self.state
    }

    /// Find the anchor of the camera frame
    ///
    /// Keeps the memo when the directory still reports the memoized anchor as
    /// the camera's immediate parent. Otherwise walks the parent chain up to
    /// the world root or a tracked link; `None` when the chain ends first.
    pub fn resolve(&mut self, directory: &dyn TransformDirectory, tree: &LinkTree) -> Option<LinkRef> {
        let mut parent = directory.parent_of(&self.frame);

        if let (CameraFollow::Resolved { anchor, name }, Some(p)) = (&self.state, &parent) {
            if name == p {
                return Some(*anchor);
            }
        }
        self.state = CameraFollow::Unresolved;

        for _ in 0..MAX_WALK {
            let frame = parent?;
            if let Some(anchor) = tree.resolve(&frame) {
                debug!(camera = %self.frame, anchor = %frame, "Camera frame anchored");
                self.state = CameraFollow::Resolved { anchor, name: frame };
                return Some(anchor);
            }
            parent = directory.parent_of(&frame);
        }
        None
    }
}
