//! Environment-driven configuration surface (§6). Read once at startup;
//! nothing here is reloaded at runtime.

use std::env;

/// Configuration for the external adapters and the webhook surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// API key for the external model endpoint used by `agenticTask`.
    pub model_api_key: Option<String>,
    /// Model identifier passed to the LLM adapter.
    pub model_name: String,
    /// App-identification header sent with outbound model/tool calls.
    pub app_identifier: String,
    /// Default "from" address used by `sendTask`.
    pub email_from: String,
    /// Externally visible base URL used to construct approval links.
    pub public_base_url: String,
    /// Optional credentials for an external knowledge base integration.
    pub knowledge_base_api_key: Option<String>,
    /// Database URL for the postgres-backed event store; absent selects the
    /// in-memory backend.
    pub database_url: Option<String>,
}

impl EngineConfig {
    /// Load from environment variables, falling back to demo-friendly
    /// defaults for anything not set.
    pub fn from_env() -> Self {
        Self {
            model_api_key: env::var("WORKFLOW_MODEL_API_KEY").ok(),
            model_name: env::var("WORKFLOW_MODEL_NAME")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            app_identifier: env::var("WORKFLOW_APP_ID")
                .unwrap_or_else(|_| "workflow-engine".to_string()),
            email_from: env::var("WORKFLOW_EMAIL_FROM")
                .unwrap_or_else(|_| "workflow@localhost".to_string()),
            public_base_url: env::var("WORKFLOW_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            knowledge_base_api_key: env::var("WORKFLOW_KB_API_KEY").ok(),
            database_url: parse_database_url(),
        }
    }
}

/// `--database-url <url>` takes precedence over `DATABASE_URL`, mirroring
/// the teacher's CLI-then-env selection for the event-store backend.
fn parse_database_url() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    for (i, arg) in args.iter().enumerate() {
        if arg == "--database-url" {
            return args.get(i + 1).cloned();
        }
        if let Some(value) = arg.strip_prefix("--database-url=") {
            return Some(value.to_string());
        }
    }
    env::var("DATABASE_URL").ok()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_demo_friendly_when_env_unset() {
        let cfg = EngineConfig {
            model_api_key: None,
            model_name: "gpt-4o-mini".to_string(),
            app_identifier: "workflow-engine".to_string(),
            email_from: "workflow@localhost".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            knowledge_base_api_key: None,
            database_url: None,
        };
        assert_eq!(cfg.model_name, "gpt-4o-mini");
    }
}
