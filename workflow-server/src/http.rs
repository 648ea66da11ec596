//! Execution HTTP surface (§6): submit a workflow, check/cancel an
//! instance, list the active set.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use workflow_core::{Graph, Value};

use crate::state::AppState;
use crate::yaml_loader::parse_process_yaml;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workflows/execute", post(execute))
        .route("/workflows/execute-file", post(execute_file))
        .route("/workflows/:instance_id/status", get(status))
        .route("/workflows/active", get(active))
        .route("/workflows/:instance_id/cancel", post(cancel))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest {
    yaml: Option<String>,
    workflow_file: Option<String>,
    #[serde(default)]
    context: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct ExecuteResponse {
    status: &'static str,
    instance_id: Uuid,
}

fn json_context_to_scope(
    context: serde_json::Map<String, serde_json::Value>,
) -> Result<BTreeMap<String, Value>, serde_json::Error> {
    context
        .into_iter()
        .map(|(k, v)| Ok((k, serde_json::from_value(v)?)))
        .collect()
}

async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, (StatusCode, String)> {
    let yaml_text = req
        .yaml
        .or(req.workflow_file)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "missing yaml or workflowFile".to_string()))?;
    let scope = json_context_to_scope(req.context).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    run_submitted_graph(&state, &yaml_text, scope)
}

async fn execute_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ExecuteResponse>, (StatusCode, String)> {
    let mut yaml_text: Option<String> = None;
    let mut context = serde_json::Map::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "context" => {
                let text = field.text().await.map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&text) {
                    context = map;
                }
            }
            _ => {
                let text = field.text().await.map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                yaml_text = Some(text);
            }
        }
    }

    let yaml_text = yaml_text.ok_or_else(|| (StatusCode::BAD_REQUEST, "missing workflow file".to_string()))?;
    let scope = json_context_to_scope(context).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    run_submitted_graph(&state, &yaml_text, scope)
}

fn run_submitted_graph(
    state: &AppState,
    yaml_text: &str,
    scope: BTreeMap<String, Value>,
) -> Result<Json<ExecuteResponse>, (StatusCode, String)> {
    let graph: Graph = parse_process_yaml(yaml_text).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let instance_id = state.engine.start_instance(Arc::new(graph), scope);
    Ok(Json(ExecuteResponse {
        status: "started",
        instance_id,
    }))
}

#[derive(Serialize)]
#[serde(untagged)]
enum StatusResponse {
    Running(workflow_core::Instance),
    NotFound { status: &'static str },
}

async fn status(State(state): State<AppState>, Path(instance_id): Path<Uuid>) -> impl IntoResponse {
    match state.engine.status(instance_id) {
        Some(instance) => Json(StatusResponse::Running(instance)).into_response(),
        None => Json(StatusResponse::NotFound { status: "not_found" }).into_response(),
    }
}

async fn active(State(state): State<AppState>) -> Json<Vec<workflow_core::Instance>> {
    Json(state.engine.active_instances())
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel(State(state): State<AppState>, Path(instance_id): Path<Uuid>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.engine.cancel_instance(instance_id),
    })
}
