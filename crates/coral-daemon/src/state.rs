//! Application state management

use chrono::{DateTime, Utc};
use coral_core::CoralEngine;
use std::sync::Arc;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Pose engine owning the tree, scene and model bus
    pub engine: Arc<CoralEngine>,
    /// Configuration
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let engine = Arc::new(CoralEngine::new(config.to_engine_settings()));
        Arc::new(Self {
            engine,
            config,
            started_at: Utc::now(),
        })
    }
}
