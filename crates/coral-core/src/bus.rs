//! In-process model bus
//!
//! Stands in for the message bus around the engine: the set of advertised
//! topics with their types, the `robot_description` parameter published by
//! each namespace's description service, and the pose-feed subscribers.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::link::PoseHandler;
use crate::pose::PoseMsg;

pub const DESCRIPTION_PARAM: &str = "robot_description";
pub const DESCRIPTION_TYPE: &str = "std_msgs/msg/String";
pub const POSE_TYPE: &str = "geometry_msgs/msg/Pose";
pub const IMAGE_TYPE: &str = "sensor_msgs/msg/Image";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("Description service of {namespace} not available after {waited:?}")]
    Timeout { namespace: String, waited: Duration },
    #[error("Parameter {name} not set in {namespace}")]
    MissingParameter { namespace: String, name: String },
}

/// Join a namespace and a relative name into an absolute topic name
pub fn join_topic(namespace: &str, name: &str) -> String {
    let ns = namespace.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if ns.is_empty() {
        format!("/{name}")
    } else if ns.starts_with('/') {
        format!("{ns}/{name}")
    } else {
        format!("/{ns}/{name}")
    }
}

/// Absolute form of a namespace: leading slash, no trailing slash
pub fn normalize_namespace(namespace: &str) -> String {
    join_topic(namespace, "").trim_end_matches('/').to_string()
}

#[derive(Debug, Default)]
pub struct ModelBus {
    /// Advertised topic name to message type
    topics: RwLock<BTreeMap<String, String>>,
    /// Parameters of each namespace's description service
    parameters: RwLock<HashMap<String, HashMap<String, String>>>,
    subscribers: RwLock<HashMap<String, Vec<PoseHandler>>>,
    advertised: Notify,
    service_calls: AtomicUsize,
}

impl ModelBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advertise(&self, topic: &str, msg_type: &str) {
        self.topics
            .write()
            .insert(topic.to_string(), msg_type.to_string());
    }

    pub fn is_advertised(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }

    /// Advertised topics with their types, sorted by name
    pub fn topics(&self) -> Vec<(String, String)> {
        self.topics
            .read()
            .iter()
            .map(|(t, ty)| (t.clone(), ty.clone()))
            .collect()
    }

    /// Publish a model description under `namespace`, optionally with its pose topic
    pub fn advertise_description(&self, namespace: &str, description: &str, pose_topic: Option<&str>) {
        let ns = normalize_namespace(namespace);
        self.parameters
            .write()
            .entry(ns.clone())
            .or_default()
            .insert(DESCRIPTION_PARAM.to_string(), description.to_string());
        self.advertise(&join_topic(&ns, DESCRIPTION_PARAM), DESCRIPTION_TYPE);
        if let Some(topic) = pose_topic.filter(|t| !t.is_empty()) {
            self.advertise(&join_topic(&ns, topic), POSE_TYPE);
        }
        info!(namespace = %ns, "Description advertised");
        self.advertised.notify_waiters();
    }

    /// True once the description service of `namespace` holds `name`
    pub fn has_parameter(&self, namespace: &str, name: &str) -> bool {
        self.parameters
            .read()
            .get(namespace)
            .is_some_and(|params| params.contains_key(name))
    }

    /// Fetch a parameter, waiting at most `timeout` for the service to appear
    pub async fn get_parameter(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<String, ServiceError> {
        self.service_calls.fetch_add(1, Ordering::Relaxed);
        let wait = async {
            loop {
                let advertised = self.advertised.notified();
                tokio::pin!(advertised);
                advertised.as_mut().enable();
                if let Some(found) = self.lookup_parameter(namespace, name) {
                    return found;
                }
                debug!(namespace = %namespace, "Waiting for description service");
                advertised.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ServiceError::Timeout {
                namespace: namespace.to_string(),
                waited: timeout,
            })?
    }

    /// `None` while the service of `namespace` is not up yet
    fn lookup_parameter(&self, namespace: &str, name: &str) -> Option<Result<String, ServiceError>> {
        let parameters = self.parameters.read();
        let service = parameters.get(namespace)?;
        Some(service.get(name).cloned().ok_or_else(|| ServiceError::MissingParameter {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }))
    }

    /// Number of description service calls made so far
    pub fn service_calls(&self) -> usize {
        self.service_calls.load(Ordering::Relaxed)
    }

    pub fn subscribe_pose(&self, topic: &str, handler: PoseHandler) {
        info!(topic = %topic, link = %handler.link(), "Pose feed bound");
        self.subscribers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// Deliver a pose message to every subscriber of `topic`; returns the count
    pub fn publish_pose(&self, topic: &str, msg: &PoseMsg) -> usize {
        let subscribers = self.subscribers.read();
        let Some(handlers) = subscribers.get(topic) else {
            return 0;
        };
        for handler in handlers {
            handler.handle(msg);
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.read().get(topic).map_or(0, Vec::len)
    }
}
