//! Shared Axum router state: the engine facade plus the two singletons the
//! webhook and observer surfaces reach into directly.

use std::sync::Arc;

use workflow_core::config::EngineConfig;
use workflow_core::{Engine, MessageBus, ObserverHub};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub bus: Arc<MessageBus>,
    pub hub: Arc<ObserverHub>,
    pub config: Arc<EngineConfig>,
}
