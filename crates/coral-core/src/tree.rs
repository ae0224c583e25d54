//! Append-only link tree and model registry
//!
//! Links live in an arena indexed by insertion position and refer to their
//! parents by index. A parent is always inserted before its children and a
//! link is never removed or re-parented, so indices stay valid for the
//! lifetime of the process.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, warn};

use crate::description::{CameraInfo, LinkDescription};
use crate::link::Link;
use crate::scene::{NodeId, SceneGraph};

/// Reserved name of the root frame
pub const WORLD_FRAME: &str = "world";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Link {link} references parent {parent} which is neither in the batch nor in the tree")]
    UnresolvedParent { link: String, parent: String },
    #[error("Link {0} appears twice in the same description")]
    DuplicateInBatch(String),
    #[error("Link {0} already has a parent")]
    AlreadyParented(String),
}

/// Insertion index of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkId(pub usize);

/// Parent of a link: the world root or another link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkRef {
    World,
    Link(LinkId),
}

/// Result of grafting one parsed batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graft {
    /// Newly appended links, in insertion order
    pub added: Vec<LinkId>,
    /// Cameras declared by the batch, in link order
    pub cameras: Vec<CameraInfo>,
    /// Number of visuals given to the world root
    pub world_visuals: usize,
}

impl Graft {
    /// First link of the batch, the model root
    pub fn root(&self) -> Option<LinkId> {
        self.added.first().copied()
    }
}

/// Every tracked link plus the namespaces spawned so far
#[derive(Debug, Default)]
pub struct LinkTree {
    links: Vec<Link>,
    /// First link registered under each name
    by_name: HashMap<String, LinkId>,
    models: HashSet<String>,
}

impl LinkTree {
    /// Empty tree; the world root is implicit
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of links, the world root excluded
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link stored under `id`
    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id.0)
    }

    /// All links in insertion order, parents before children
    pub fn links(&self) -> impl Iterator<Item = (LinkId, &Link)> {
        self.links.iter().enumerate().map(|(i, l)| (LinkId(i), l))
    }

    /// First link with this name
    pub fn find(&self, name: &str) -> Option<LinkId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a frame name to the world root or a tracked link
    pub fn resolve(&self, name: &str) -> Option<LinkRef> {
        if name == WORLD_FRAME {
            Some(LinkRef::World)
        } else {
            self.find(name).map(LinkRef::Link)
        }
    }

    /// Frame name of a link, `world` for the root
    pub fn name_of(&self, link: LinkRef) -> &str {
        match link {
            LinkRef::World => WORLD_FRAME,
            LinkRef::Link(id) => self.links.get(id.0).map(Link::name).unwrap_or(WORLD_FRAME),
        }
    }

    /// Scene node owned by a link, the scene root for the world
    pub fn node_of(&self, link: LinkRef) -> NodeId {
        match link {
            LinkRef::World => SceneGraph::ROOT,
            LinkRef::Link(id) => self.links.get(id.0).map(Link::node).unwrap_or(SceneGraph::ROOT),
        }
    }

    /// True when a model was already spawned under this namespace
    pub fn has_model(&self, namespace: &str) -> bool {
        self.models.contains(namespace)
    }

    /// Record a successfully spawned namespace; false if it was already known
    pub fn register_model(&mut self, namespace: &str) -> bool {
        self.models.insert(namespace.to_string())
    }

    /// Spawned namespaces, sorted
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.models.iter().cloned().collect();
        models.sort();
        models
    }

    /// Frames from a link up to the world root, the link itself first
    pub fn path_to_world(&self, id: LinkId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = LinkRef::Link(id);
        loop {
            path.push(self.name_of(current));
            match current {
                LinkRef::World => break,
                LinkRef::Link(id) => {
                    current = self.links.get(id.0).and_then(Link::parent).unwrap_or(LinkRef::World)
                }
            }
        }
        path
    }

    /// Append a parsed batch, attaching each new link to the scene graph
    ///
    /// Parents are resolved by name within the batch first, then within the
    /// tree. The batch is checked as a whole before anything is appended:
    /// on error neither the tree nor the scene is modified.
    pub fn graft(
        &mut self,
        batch: Vec<LinkDescription>,
        scene: &mut SceneGraph,
    ) -> Result<Graft, TreeError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for desc in batch.iter().filter(|d| d.name != WORLD_FRAME) {
            if let Some(parent) = desc.parent.as_deref() {
                if parent != WORLD_FRAME && !seen.contains(parent) && self.find(parent).is_none() {
                    return Err(TreeError::UnresolvedParent {
                        link: desc.name.clone(),
                        parent: parent.to_string(),
                    });
                }
            }
            if !seen.insert(desc.name.as_str()) {
                return Err(TreeError::DuplicateInBatch(desc.name.clone()));
            }
        }

        let mut graft = Graft::default();
        let mut batch_ids: HashMap<String, LinkId> = HashMap::new();
        for desc in batch {
            graft.cameras.extend(desc.cameras);
            if desc.name == WORLD_FRAME {
                graft.world_visuals += desc.visuals.len();
                scene.add_visuals(SceneGraph::ROOT, desc.visuals);
                continue;
            }

            let parent = match desc.parent.as_deref() {
                None | Some(WORLD_FRAME) => LinkRef::World,
                Some(name) => batch_ids
                    .get(name)
                    .copied()
                    .or_else(|| self.find(name))
                    .map(LinkRef::Link)
                    .ok_or_else(|| TreeError::UnresolvedParent {
                        link: desc.name.clone(),
                        parent: name.to_string(),
                    })?,
            };
            let parent_frame = match parent {
                LinkRef::World => WORLD_FRAME,
                LinkRef::Link(_) => desc.parent.as_deref().unwrap_or(WORLD_FRAME),
            }
            .to_string();

            let local = desc.origin.unwrap_or(glam::DMat4::IDENTITY);
            let node = scene.attach_link(&desc.name, self.node_of(parent), local, desc.visuals);
            let link = Link::with_parent(desc.name.clone(), node, parent, parent_frame);

            let id = LinkId(self.links.len());
            if self.by_name.contains_key(&desc.name) {
                warn!(link = %desc.name, "Duplicate link name, lookups keep resolving to the first one");
            } else {
                self.by_name.insert(desc.name.clone(), id);
            }
            debug!(link = %desc.name, parent = %self.name_of(parent), "Link grafted");
            batch_ids.insert(desc.name, id);
            self.links.push(link);
            graft.added.push(id);
        }
        Ok(graft)
    }
}
