//! The webhook surface (§6): external publishers feed the message
//! correlation bus, and human approvers act through plain hyperlinks —
//! both thin wrappers around `MessageBus`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use workflow_core::Value;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/message", post(publish_message))
        .route("/webhooks/:message_ref/:correlation_key", post(publish_form))
        .route(
            "/webhooks/approve/:message_ref/:correlation_key",
            get(approve_page).post(approve_post),
        )
        .route(
            "/webhooks/deny/:message_ref/:correlation_key",
            get(deny_page).post(deny_post),
        )
        .route("/webhook/approval/:instance_id", get(approval_link))
        .route("/webhooks/queue/stats", get(queue_stats))
        .route("/webhooks/queue/:correlation_key", get(queue_peek).delete(queue_clear))
}

#[derive(Deserialize)]
struct PublishRequest {
    #[serde(rename = "messageRef")]
    message_ref: String,
    #[serde(rename = "correlationKey")]
    correlation_key: String,
    payload: serde_json::Value,
}

async fn publish_message(
    State(state): State<AppState>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let payload: Value = serde_json::from_value(req.payload).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let delivered = state.bus.publish(&req.message_ref, &req.correlation_key, payload);
    Ok(Json(json!({ "delivered": delivered })))
}

async fn publish_form(
    State(state): State<AppState>,
    Path((message_ref, correlation_key)): Path<(String, String)>,
    Form(fields): Form<BTreeMap<String, String>>,
) -> Json<serde_json::Value> {
    let payload = Value::Map(fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
    let delivered = state.bus.publish(&message_ref, &correlation_key, payload);
    Json(json!({ "delivered": delivered }))
}

fn confirmation_page(message_ref: &str, correlation_key: &str, verb: &str) -> Html<String> {
    Html(format!(
        r#"<!doctype html>
<html><body>
<h1>Confirm {verb}</h1>
<form method="post" action="/webhooks/{verb}/{message_ref}/{correlation_key}">
<button type="submit">Confirm {verb}</button>
</form>
</body></html>"#,
        verb = verb,
        message_ref = message_ref,
        correlation_key = correlation_key,
    ))
}

async fn approve_page(Path((message_ref, correlation_key)): Path<(String, String)>) -> Html<String> {
    confirmation_page(&message_ref, &correlation_key, "approve")
}

async fn deny_page(Path((message_ref, correlation_key)): Path<(String, String)>) -> Html<String> {
    confirmation_page(&message_ref, &correlation_key, "deny")
}

fn decision_payload(decision: &str, method: &str) -> Value {
    let mut map = BTreeMap::new();
    map.insert("decision".to_string(), Value::String(decision.to_string()));
    map.insert("method".to_string(), Value::String(method.to_string()));
    map.insert("timestamp".to_string(), Value::Number(chrono::Utc::now().timestamp_millis() as f64));
    Value::Map(map)
}

async fn approve_post(
    State(state): State<AppState>,
    Path((message_ref, correlation_key)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let delivered = state
        .bus
        .publish(&message_ref, &correlation_key, decision_payload("approved", "email"));
    Json(json!({ "delivered": delivered }))
}

async fn deny_post(
    State(state): State<AppState>,
    Path((message_ref, correlation_key)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let delivered = state
        .bus
        .publish(&message_ref, &correlation_key, decision_payload("denied", "email"));
    Json(json!({ "delivered": delivered }))
}

#[derive(Deserialize)]
struct ApprovalLinkQuery {
    decision: String,
}

/// `GET /webhook/approval/{workflowInstanceId}?decision={approved|rejected}`
/// — a direct deposit, unlike `/webhooks/approve/...`, which serves a
/// confirmation page first.
async fn approval_link(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    Query(query): Query<ApprovalLinkQuery>,
) -> Json<serde_json::Value> {
    let delivered = state.bus.publish(
        "diagnosticApproval",
        &instance_id,
        decision_payload(&query.decision, "link"),
    );
    Json(json!({ "delivered": delivered }))
}

async fn queue_stats(State(state): State<AppState>) -> Json<workflow_core::correlation::BusStats> {
    Json(state.bus.stats())
}

async fn queue_peek(
    State(state): State<AppState>,
    Path(correlation_key): Path<String>,
) -> Json<serde_json::Value> {
    let queued: Vec<_> = state
        .bus
        .list_queued_messages()
        .into_iter()
        .filter(|row| row.correlation_key == correlation_key)
        .collect();
    let waiters: Vec<_> = state
        .bus
        .list_waiters()
        .into_iter()
        .filter(|row| row.correlation_key == correlation_key)
        .collect();
    Json(json!({ "queued": queued, "waiters": waiters }))
}

async fn queue_clear(State(state): State<AppState>, Path(correlation_key): Path<String>) -> Json<serde_json::Value> {
    let cleared = state.bus.clear_messages(&correlation_key);
    Json(json!({ "cleared": cleared }))
}
