//! HTTP/WebSocket transport for the workflow execution engine. Owns the
//! YAML workflow-definition parser, the REST surface, the `/ws` observer
//! channel, and the external webhook surface — the engine itself never
//! imports any of this.

pub mod http;
pub mod state;
pub mod webhooks;
pub mod ws;
pub mod yaml_loader;

pub use state::AppState;
