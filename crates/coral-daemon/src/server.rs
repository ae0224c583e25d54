//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Model spawning
        .route("/coral/spawn", post(api::spawn))
        .route("/coral/find_models", post(api::find_models))
        // Inspection
        .route("/api/links", get(api::list_links))
        .route("/api/cameras", get(api::list_cameras))
        .route("/api/config", get(api::get_config))
        .route("/api/status", get(api::get_status))
        // Ingestion
        .route("/api/descriptions", post(api::advertise_description))
        .route("/api/tf", post(api::post_tf))
        .route("/api/pose", post(api::post_pose))
        .route("/api/clock", post(api::post_clock))
        // WebSocket feeds and scene updates
        .route("/ws", get(ws::websocket_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn run(state: Arc<AppState>, bind: String) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
