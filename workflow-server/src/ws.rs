//! The observer channel (§6): a persistent bidirectional `/ws` connection.
//! Server-to-client frames are the engine's `EventEnvelope`s forwarded
//! verbatim; client-to-server frames drive replay, cancellation, and
//! user-task completion.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::warn;

use workflow_core::events::broadcast::UserTaskDecision;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(upgrade))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
    #[serde(rename = "userTask.complete")]
    UserTaskComplete {
        #[serde(rename = "taskId")]
        task_id: String,
        decision: String,
        comments: Option<String>,
        user: String,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "replay.request")]
    ReplayRequest {
        #[serde(rename = "elementId")]
        element_id: String,
    },
    #[serde(rename = "clear.history")]
    ClearHistory,
    #[serde(rename = "task.cancel.request")]
    TaskCancelRequest {
        #[serde(rename = "elementId")]
        element_id: String,
        #[serde(default)]
        reason: String,
    },
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (observer_id, mut rx) = state.hub.register();

    let forward = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&envelope) else { continue };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
            warn!(%text, "unrecognized observer frame");
            continue;
        };
        match frame {
            ClientFrame::Ping => {
                // `pong` is emitted by the per-observer send loop above via
                // the hub only when broadcast; a bare ping here needs no
                // reply beyond keeping the connection alive.
            }
            ClientFrame::ReplayRequest { element_id } => {
                state.hub.replay(observer_id, &element_id).await;
            }
            ClientFrame::ClearHistory => {}
            ClientFrame::TaskCancelRequest { element_id, reason } => {
                let _ = state
                    .hub
                    .request_cancel(&element_id, &reason, &Default::default())
                    .await;
            }
            ClientFrame::UserTaskComplete {
                task_id,
                decision,
                comments,
                user,
            } => {
                let _ = state.hub.complete_user_task(
                    &task_id,
                    UserTaskDecision {
                        decision,
                        comments,
                        completed_by: user,
                    },
                );
            }
        }
    }

    forward.abort();
    state.hub.unregister(observer_id);
}
