//! Shared scalar and value types used across the graph model, variable scope,
//! and the wire protocols that surround them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

pub fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// ─── Value ──────────────────────────────────────────────────────

/// A variable-scope value. Workflow authors never see anything richer than
/// this tagged union — it is the only shape domain data can take inside the
/// engine's orchestration state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Canonical literal rendering used when substituting `${name}` into a
    /// gateway condition or templated string. Strings are quoted; everything
    /// else renders as its literal form.
    pub fn render_literal(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
            Value::List(_) | Value::Map(_) => {
                serde_json::to_string(self).unwrap_or_else(|_| "null".to_string())
            }
        }
    }

    /// Bare string form, used for `${name}` substitution into recipient/subject
    /// templates where quoting would be wrong.
    pub fn render_bare(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.render_literal(),
        }
    }

    /// Truthiness used by fallback condition evaluation: case-insensitive
    /// match against `true`, `yes`, `1`, `approved`.
    pub fn is_truthy_fallback(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => matches!(
                s.to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "approved"
            ),
            _ => false,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_bare())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

/// The variable scope carried along one traversal path. A single logical
/// path is always the exclusive writer of its own scope; at merge points the
/// winning path's scope becomes the continuation's scope.
pub type VariableScope = BTreeMap<String, Value>;

/// The well-known variable key seeded into every instance at start.
pub const INSTANCE_ID_VAR: &str = "workflowInstanceId";
