//! A running process instance: identity, final outcome, and the pieces of
//! state the HTTP surface needs to report on it (§6 `/workflows/*`).

use crate::error::ExecutionError;
use crate::types::Timestamp;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum InstanceOutcome {
    Success,
    Failed(String),
    Cancelled,
}

impl InstanceOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceOutcome::Success => "success",
            InstanceOutcome::Failed(_) => "failed",
            InstanceOutcome::Cancelled => "cancelled",
        }
    }
}

impl From<&ExecutionError> for InstanceOutcome {
    fn from(e: &ExecutionError) -> Self {
        if e.is_cancellation() {
            InstanceOutcome::Cancelled
        } else {
            InstanceOutcome::Failed(e.to_string())
        }
    }
}

/// A snapshot of one instance's status, the shape `GET
/// /workflows/{instance_id}/status` serializes.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Instance {
    pub instance_id: Uuid,
    pub workflow_name: String,
    pub status: String,
    pub start_time: Timestamp,
    pub context_keys: Vec<String>,
}
