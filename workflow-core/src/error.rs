//! Error taxonomy (§7). Each variant maps to a user-visible `task.error` or
//! `workflow.completed{outcome: "failed"}` frame; `Cancelled` and
//! `EventSubProcessHandled` are sentinels that never surface as a hard
//! failure.

use uuid::Uuid;

/// Malformed YAML or schema violation — fails before execution starts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphParseError {
    #[error("process '{0}' has no startEvent")]
    NoStartEvent(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("flow {0} references unknown node {1}")]
    DanglingFlow(String, String),

    #[error("unknown subprocess reference: {0}")]
    UnknownSubprocess(String),

    #[error("yaml error: {0}")]
    Yaml(String),
}

impl From<serde_yaml::Error> for GraphParseError {
    fn from(e: serde_yaml::Error) -> Self {
        GraphParseError::Yaml(e.to_string())
    }
}

/// Errors raised while executing a single node. These are caught by the
/// boundary-event / event-subprocess propagation chain in the engine before
/// they ever reach the top level (§7 propagation policy).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("gateway {0} had no firing outgoing flow")]
    GatewayNoMatch(String),

    #[error("receive task {0} timed out waiting for message")]
    MessageTimeout(String),

    #[error("user task {0} was rejected")]
    UserTaskRejected(String),

    #[error("script task {0} failed: {1}")]
    ScriptFailure(String, String),

    #[error("tool '{0}' failed: {1}")]
    ToolFailure(String, String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Raised internally when an error sub-process catches and converts the
    /// failure into a clean recovery. Never surfaces as `task.error`.
    #[error("handled by event sub-process {0}")]
    EventSubProcessHandled(String),

    #[error("call activity {0} failed: {1}")]
    CallActivityFailed(String, Box<ExecutionError>),

    #[error("unknown message reference: {0}")]
    UnknownMessageRef(String),

    #[error("{0}")]
    Other(String),
}

impl ExecutionError {
    /// The `{message, type}` pair used in `task.error` frames, plus whether
    /// the failure is retryable.
    pub fn as_task_error(&self) -> (String, String, bool) {
        let kind = match self {
            ExecutionError::GatewayNoMatch(_) => "GatewayNoMatch",
            ExecutionError::MessageTimeout(_) => "MessageTimeout",
            ExecutionError::UserTaskRejected(_) => "UserTaskRejected",
            ExecutionError::ScriptFailure(..) => "ScriptFailure",
            ExecutionError::ToolFailure(..) => "ToolFailure",
            ExecutionError::Cancelled(_) => "Cancelled",
            ExecutionError::EventSubProcessHandled(_) => "EventSubProcessHandled",
            ExecutionError::CallActivityFailed(..) => "CallActivityFailed",
            ExecutionError::UnknownMessageRef(_) => "UnknownMessageRef",
            ExecutionError::Other(_) => "Other",
        };
        let retryable = matches!(self, ExecutionError::MessageTimeout(_) | ExecutionError::ToolFailure(..));
        (self.to_string(), kind.to_string(), retryable)
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecutionError::Cancelled(_))
    }
}

/// Errors surfaced by the message correlation bus (C4).
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("timed out waiting for ({message_ref}, {correlation_key})")]
    Timeout {
        message_ref: String,
        correlation_key: String,
    },
    #[error("wait for ({0}, {1}) was cancelled")]
    Cancelled(String, String),
}

/// Errors surfaced by the replay / event store (C5).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown thread for element {0}")]
    UnknownThread(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Errors surfaced by an external adapter (C8): mail, tools, the model, or
/// the script sandbox.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool '{0}' invocation failed: {1}")]
    ToolFailed(String, String),

    #[error("email send failed: {0}")]
    EmailFailed(String),

    #[error("model call failed: {0}")]
    ModelFailed(String),

    #[error("script error: {0}")]
    ScriptFailed(String),
}

/// Top-level failure of a process instance.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstanceError {
    #[error(transparent)]
    Graph(#[from] GraphParseError),

    #[error("instance {0} not found")]
    NotFound(Uuid),

    #[error("unhandled error on node {node_id}: {source}")]
    Unhandled {
        node_id: String,
        source: ExecutionError,
    },
}
