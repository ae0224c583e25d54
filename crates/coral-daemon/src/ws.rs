//! WebSocket handler for feed ingestion and scene updates
//!
//! Clients push `tf`, `pose` and `clock` messages; the server answers
//! `ping` and pushes a `links` snapshot whenever the scene changes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use coral_core::{CameraMode, CoralEngine, LinkSnapshot};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{ClockRequest, PoseRequest, TfRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientMessage {
    Tf(TfRequest),
    Pose(PoseRequest),
    Clock(ClockRequest),
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ServerMessage {
    Links {
        links: Vec<LinkSnapshot>,
        camera: CameraMode,
    },
    /// Pose message on a topic nothing is bound to
    NoSubscriber {
        topic: String,
    },
    Error {
        message: String,
    },
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Apply one client message, returning the reply if any
fn handle_text(engine: &CoralEngine, text: &str) -> Option<ServerMessage> {
    if text == "ping" {
        return Some(ServerMessage::Pong);
    }
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Tf(req)) => {
            engine.set_transforms(&req.transforms, req.is_static);
            None
        }
        Ok(ClientMessage::Pose(req)) => {
            let delivered = engine.publish_pose(&req.topic, &req.pose);
            (delivered == 0).then(|| ServerMessage::NoSubscriber { topic: req.topic })
        }
        Ok(ClientMessage::Clock(req)) => {
            engine.set_clock(req.time());
            None
        }
        Ok(ClientMessage::Ping) => Some(ServerMessage::Pong),
        Err(e) => {
            debug!(error = %e, "Invalid WebSocket message");
            Some(ServerMessage::Error {
                message: e.to_string(),
            })
        }
    }
}

fn links_message(engine: &CoralEngine) -> ServerMessage {
    ServerMessage::Links {
        links: engine.links(),
        camera: engine.camera_mode(),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let engine = state.engine.clone();
    let scene = engine.scene();

    let mut updates = tokio::time::interval(engine.settings().refresh.period);
    updates.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_revision = None;

    info!("WebSocket client connected");

    loop {
        tokio::select! {
            // Push a snapshot after each committed scene change
            _ = updates.tick() => {
                let revision = scene.lock().revision();
                if last_revision == Some(revision) {
                    continue;
                }
                last_revision = Some(revision);
                if let Ok(json) = serde_json::to_string(&links_message(&engine)) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = handle_text(&engine, text.as_str()) else {
                            continue;
                        };
                        if let Ok(json) = serde_json::to_string(&reply) {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use coral_core::EngineSettings;

    #[test]
    fn test_ping_replies_pong() {
        let engine = CoralEngine::new(EngineSettings::default());
        assert!(matches!(handle_text(&engine, "ping"), Some(ServerMessage::Pong)));
        assert!(matches!(
            handle_text(&engine, r#"{"type":"ping"}"#),
            Some(ServerMessage::Pong)
        ));
    }

    #[test]
    fn test_tf_and_clock_are_applied() {
        let engine = CoralEngine::new(EngineSettings::default());
        let tf = r#"{"type":"tf","data":{"transforms":[{"parent":"world","child":"buoy","translation":{"z":-1.0}}]}}"#;
        assert!(handle_text(&engine, tf).is_none());
        assert!(engine.buffer().frames().contains(&"buoy".to_string()));

        let clock = r#"{"type":"clock","data":{"sec":10,"nanosec":500}}"#;
        assert!(handle_text(&engine, clock).is_none());
        assert!(engine.clock().uses_sim_time());
    }

    #[test]
    fn test_undelivered_pose_is_reported() {
        let engine = CoralEngine::new(EngineSettings::default());
        let pose = r#"{"type":"pose","data":{"topic":"/nobody/pose","pose":{}}}"#;
        match handle_text(&engine, pose) {
            Some(ServerMessage::NoSubscriber { topic }) => assert_eq!(topic, "/nobody/pose"),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_an_error() {
        let engine = CoralEngine::new(EngineSettings::default());
        assert!(matches!(
            handle_text(&engine, "{not json"),
            Some(ServerMessage::Error { .. })
        ));
    }
}
