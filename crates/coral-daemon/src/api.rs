//! REST API handlers

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use coral_core::{PoseMsg, ServiceError, SpawnError, SpawnRequest, Time, TransformStamped};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn spawn_status(e: &SpawnError) -> StatusCode {
    match e {
        SpawnError::WorldFile { .. } => StatusCode::BAD_REQUEST,
        SpawnError::Description(_) | SpawnError::Tree(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SpawnError::Service(ServiceError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        SpawnError::Service(ServiceError::MissingParameter { .. }) => StatusCode::NOT_FOUND,
    }
}

/// Spawn a namespace, a world file, or discover everything when the request is empty
pub async fn spawn(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpawnRequest>,
) -> impl IntoResponse {
    info!(
        namespace = %req.robot_namespace,
        pose_topic = %req.pose_topic,
        world = %req.world_model,
        "Spawn requested"
    );
    match state.engine.spawn(&req).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(error = %e, "Spawn failed");
            (spawn_status(&e), Json(ApiError::new(e.to_string()))).into_response()
        }
    }
}

pub async fn find_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Model discovery requested");
    match state.engine.find_models().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(error = %e, "Model discovery failed");
            (spawn_status(&e), Json(ApiError::new(e.to_string()))).into_response()
        }
    }
}

pub async fn list_links(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.links())
}

/// Camera declarations of spawned models, with the current camera mode
pub async fn list_cameras(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "mode": state.engine.camera_mode(),
        "cameras": state.engine.cameras(),
    }))
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tree = state.engine.tree();
    let (links, models) = {
        let tree = tree.read();
        (tree.len(), tree.models())
    };
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "sim_time": state.engine.clock().uses_sim_time(),
        "links": links,
        "models": models,
    }))
}

/// Description advertised on the model bus
#[derive(Debug, Deserialize)]
pub struct DescriptionRequest {
    pub namespace: String,
    pub description: String,
    /// Pose feed topic relative to the namespace
    #[serde(default)]
    pub pose_topic: Option<String>,
}

pub async fn advertise_description(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DescriptionRequest>,
) -> impl IntoResponse {
    if req.namespace.trim_matches('/').is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("Namespace must not be empty")),
        )
            .into_response();
    }
    info!(namespace = %req.namespace, "Description advertised");
    state
        .engine
        .advertise_description(&req.namespace, &req.description, req.pose_topic.as_deref());
    Json(serde_json::json!({
        "status": "advertised",
        "namespace": req.namespace
    }))
    .into_response()
}

/// Transforms to store in the directory
#[derive(Debug, Deserialize)]
pub struct TfRequest {
    pub transforms: Vec<TransformStamped>,
    #[serde(default, rename = "static")]
    pub is_static: bool,
}

pub async fn post_tf(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TfRequest>,
) -> impl IntoResponse {
    debug!(count = req.transforms.len(), is_static = req.is_static, "Transforms received");
    state.engine.set_transforms(&req.transforms, req.is_static);
    Json(serde_json::json!({ "stored": req.transforms.len() }))
}

/// Pose message for the links bound to `topic`
#[derive(Debug, Deserialize)]
pub struct PoseRequest {
    pub topic: String,
    pub pose: PoseMsg,
}

pub async fn post_pose(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PoseRequest>,
) -> impl IntoResponse {
    let delivered = state.engine.publish_pose(&req.topic, &req.pose);
    Json(serde_json::json!({ "delivered": delivered }))
}

/// Simulated clock message
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClockRequest {
    pub sec: i64,
    #[serde(default)]
    pub nanosec: u32,
}

impl ClockRequest {
    pub fn time(&self) -> Time {
        Time::from_sec_nanosec(self.sec, self.nanosec)
    }
}

pub async fn post_clock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClockRequest>,
) -> impl IntoResponse {
    state.engine.set_clock(req.time());
    Json(serde_json::json!({ "sim_time": true }))
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::server::router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn state() -> std::sync::Arc<AppState> {
        AppState::new(Config::default())
    }

    async fn send(
        state: &std::sync::Arc<AppState>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_advertise_spawn_and_list() {
        let state = state();
        let (status, _) = send(
            &state,
            "POST",
            "/api/descriptions",
            Some(json!({
                "namespace": "/rov",
                "description": r#"<robot name="rov"><link name="rov_base"/></robot>"#,
                "pose_topic": "pose_gt"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, outcome) = send(
            &state,
            "POST",
            "/coral/spawn",
            Some(json!({ "robot_namespace": "/rov", "pose_topic": "pose_gt" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["result"], "spawned");
        assert_eq!(outcome["pose_topic"], "/rov/pose_gt");

        let (_, pose) = send(
            &state,
            "POST",
            "/api/pose",
            Some(json!({ "topic": "/rov/pose_gt", "pose": { "position": { "x": 1.0 } } })),
        )
        .await;
        assert_eq!(pose["delivered"], 1);

        state.engine.tick();
        let (_, links) = send(&state, "GET", "/api/links", None).await;
        assert_eq!(links[0]["name"], "rov_base");
        assert_eq!(links[0]["feed_driven"], true);
    }

    #[tokio::test]
    async fn test_malformed_description_is_unprocessable() {
        let state = state();
        state
            .engine
            .advertise_description("/bad", "<robot name=\"bad\"><link", None);
        let (status, body) = send(
            &state,
            "POST",
            "/coral/spawn",
            Some(json!({ "robot_namespace": "/bad" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_missing_world_file_is_bad_request() {
        let state = state();
        let (status, _) = send(
            &state,
            "POST",
            "/coral/spawn",
            Some(json!({ "world_model": "/nonexistent/world.urdf" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tf_and_clock_ingestion() {
        let state = state();
        let (status, body) = send(
            &state,
            "POST",
            "/api/tf",
            Some(json!({
                "transforms": [{ "parent": "world", "child": "coral_cam_view" }],
                "static": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], 1);
        assert!(state.engine.buffer().frames().contains(&"coral_cam_view".to_string()));

        let (_, clock) = send(&state, "POST", "/api/clock", Some(json!({ "sec": 42 }))).await;
        assert_eq!(clock["sim_time"], true);
        assert!(state.engine.clock().uses_sim_time());

        let (_, status_body) = send(&state, "GET", "/api/status", None).await;
        assert_eq!(status_body["sim_time"], true);
        assert_eq!(status_body["links"], 0);
    }

    #[tokio::test]
    async fn test_empty_namespace_rejected() {
        let state = state();
        let (status, _) = send(
            &state,
            "POST",
            "/api/descriptions",
            Some(json!({ "namespace": "/", "description": "<robot/>" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
