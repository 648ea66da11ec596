//! `scriptTask` sandbox. Exposes only the variable scope and rhai's
//! built-in expression/statement subset — no file, network, or process
//! access is ever registered on the engine.

use rhai::{Dynamic, Engine, Scope};
use std::collections::BTreeMap;

use crate::error::AdapterError;
use crate::types::{Value, VariableScope};

pub trait ScriptSandbox: Send + Sync {
    fn eval(&self, script: &str, scope: &VariableScope) -> Result<Value, AdapterError>;
}

pub struct RhaiScriptSandbox {
    engine: Engine,
}

impl Default for RhaiScriptSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl RhaiScriptSandbox {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(200_000);
        engine.set_max_expr_depths(64, 64);
        Self { engine }
    }
}

impl ScriptSandbox for RhaiScriptSandbox {
    fn eval(&self, script: &str, scope: &VariableScope) -> Result<Value, AdapterError> {
        let mut rhai_scope = Scope::new();
        for (name, value) in scope {
            rhai_scope.push(name.clone(), value_to_dynamic(value));
        }
        let result: Dynamic = self
            .engine
            .eval_with_scope(&mut rhai_scope, script)
            .map_err(|e| AdapterError::ScriptFailed(e.to_string()))?;
        Ok(dynamic_to_value(result))
    }
}

fn value_to_dynamic(v: &Value) -> Dynamic {
    match v {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => Dynamic::from(*n),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::List(items) => {
            let arr: rhai::Array = items.iter().map(value_to_dynamic).collect();
            Dynamic::from(arr)
        }
        Value::Map(map) => {
            let mut m = rhai::Map::new();
            for (k, v) in map {
                m.insert(k.into(), value_to_dynamic(v));
            }
            Dynamic::from(m)
        }
    }
}

fn dynamic_to_value(d: Dynamic) -> Value {
    if d.is_unit() {
        return Value::Null;
    }
    if d.is_bool() {
        return Value::Bool(d.as_bool().unwrap_or_default());
    }
    if d.is_int() {
        return Value::Number(d.as_int().unwrap_or_default() as f64);
    }
    if d.is_float() {
        return Value::Number(d.as_float().unwrap_or_default());
    }
    if d.is_string() {
        return Value::String(d.into_string().unwrap_or_default());
    }
    if d.is_array() {
        let arr = d.cast::<rhai::Array>();
        return Value::List(arr.into_iter().map(dynamic_to_value).collect());
    }
    if d.is_map() {
        let map = d.cast::<rhai::Map>();
        let converted: BTreeMap<String, Value> = map
            .into_iter()
            .map(|(k, v)| (k.to_string(), dynamic_to_value(v)))
            .collect();
        return Value::Map(converted);
    }
    Value::String(d.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic_over_scope() {
        let sandbox = RhaiScriptSandbox::new();
        let mut scope = VariableScope::new();
        scope.insert("x".to_string(), Value::Number(4.0));
        let result = sandbox.eval("x * 2", &scope).unwrap();
        assert_eq!(result, Value::Number(8.0));
    }

    #[test]
    fn rejects_script_errors() {
        let sandbox = RhaiScriptSandbox::new();
        let scope = VariableScope::new();
        assert!(sandbox.eval("undefined_fn()", &scope).is_err());
    }
}
