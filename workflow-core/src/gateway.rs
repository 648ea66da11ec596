//! Gateway Evaluator (C2). Given a branching node and the live variable
//! scope, decides which outgoing flows fire.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::ExecutionError;
use crate::graph::{Flow, Node, NodeKind};
use crate::types::{Value, VariableScope};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").unwrap())
}

/// Substitute every `${name}` placeholder in `expr` with the variable's
/// canonical literal rendering (strings quoted, everything else literal).
pub fn substitute(expr: &str, scope: &VariableScope) -> String {
    placeholder_re()
        .replace_all(expr, |caps: &regex::Captures| {
            let name = &caps[1];
            scope
                .get(name)
                .map(Value::render_literal)
                .unwrap_or_else(|| "null".to_string())
        })
        .into_owned()
}

/// Substitute `${name}` with the variable's bare (unquoted) string form, for
/// templated subject/body/recipient strings rather than expressions.
pub fn substitute_bare(template: &str, scope: &VariableScope) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            scope
                .get(name)
                .map(Value::render_bare)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Evaluate a gateway condition: substitute, then evaluate in a sandboxed
/// arithmetic/comparison context. Falls back to fuzzy truthy matching on the
/// resolved string if the expression doesn't parse/evaluate.
pub fn evaluate_condition(expr: &str, scope: &VariableScope) -> bool {
    let resolved = substitute(expr, scope);
    match crate::expr::eval_bool(&resolved) {
        Ok(b) => b,
        Err(_) => Value::String(resolved).is_truthy_fallback(),
    }
}

/// The ordered list of outgoing flows that fire for a gateway node, given the
/// live variable scope.
pub fn evaluate_gateway<'a>(
    node: &Node,
    outgoing: &[&'a Flow],
    scope: &VariableScope,
) -> Result<Vec<&'a Flow>, ExecutionError> {
    match node.kind {
        NodeKind::ExclusiveGateway => {
            for flow in outgoing {
                if let Some(cond) = &flow.condition {
                    if !cond.trim().is_empty() && evaluate_condition(cond, scope) {
                        return Ok(vec![*flow]);
                    }
                }
            }
            if let Some(default) = outgoing
                .iter()
                .find(|f| f.condition.as_deref().map(str::trim).unwrap_or("").is_empty())
            {
                return Ok(vec![*default]);
            }
            Err(ExecutionError::GatewayNoMatch(node.id.clone()))
        }
        NodeKind::ParallelGateway => Ok(outgoing.to_vec()),
        NodeKind::InclusiveGateway => {
            let fired: Vec<&Flow> = outgoing
                .iter()
                .filter(|f| match &f.condition {
                    None => true,
                    Some(c) if c.trim().is_empty() => true,
                    Some(c) => evaluate_condition(c, scope),
                })
                .copied()
                .collect();
            if fired.is_empty() {
                Err(ExecutionError::GatewayNoMatch(node.id.clone()))
            } else {
                Ok(fired)
            }
        }
        _ => Ok(outgoing.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn scope_with(pairs: &[(&str, Value)]) -> VariableScope {
        let mut m = BTreeMap::new();
        for (k, v) in pairs {
            m.insert(k.to_string(), v.clone());
        }
        m
    }

    #[test]
    fn substitutes_quoted_strings() {
        let scope = scope_with(&[("name", Value::String("alice".into()))]);
        assert_eq!(substitute("${name} == \"alice\"", &scope), "\"alice\" == \"alice\"");
    }

    #[test]
    fn exclusive_gateway_picks_default_when_no_condition_matches() {
        let node = Node {
            id: "gw".into(),
            kind: NodeKind::ExclusiveGateway,
            display_name: "gw".into(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        };
        let a = Flow {
            id: "a".into(),
            from: "gw".into(),
            to: "A".into(),
            name: None,
            condition: Some("${approved} == true".into()),
        };
        let b = Flow {
            id: "b".into(),
            from: "gw".into(),
            to: "B".into(),
            name: None,
            condition: None,
        };
        let scope = scope_with(&[("approved", Value::Bool(false))]);
        let fired = evaluate_gateway(&node, &[&a, &b], &scope).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].to, "B");
    }

    #[test]
    fn inclusive_gateway_fires_all_truthy_plus_unconditional() {
        let node = Node {
            id: "gw".into(),
            kind: NodeKind::InclusiveGateway,
            display_name: "gw".into(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        };
        let p = Flow {
            id: "p".into(),
            from: "gw".into(),
            to: "P".into(),
            name: None,
            condition: Some("${x} > 1".into()),
        };
        let q = Flow {
            id: "q".into(),
            from: "gw".into(),
            to: "Q".into(),
            name: None,
            condition: None,
        };
        let scope = scope_with(&[("x", Value::Number(5.0))]);
        let fired = evaluate_gateway(&node, &[&p, &q], &scope).unwrap();
        assert_eq!(fired.len(), 2);
    }

    #[test]
    fn gateway_no_match_fails() {
        let node = Node {
            id: "gw".into(),
            kind: NodeKind::ExclusiveGateway,
            display_name: "gw".into(),
            attached_to_ref: None,
            properties: BTreeMap::new(),
        };
        let a = Flow {
            id: "a".into(),
            from: "gw".into(),
            to: "A".into(),
            name: None,
            condition: Some("${x} == 1".into()),
        };
        let scope = scope_with(&[("x", Value::Number(2.0))]);
        let err = evaluate_gateway(&node, &[&a], &scope).unwrap_err();
        assert!(matches!(err, ExecutionError::GatewayNoMatch(_)));
    }
}
