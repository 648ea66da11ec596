//! Deserializes the workflow-definition YAML document (§6) into an
//! executable `workflow_core::Graph`. Treated as a narrow, transport-side
//! collaborator: the engine only ever consumes the resulting `Graph`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as Json;
use workflow_core::{Flow, Graph, GraphParseError, Node, NodeKind};

#[derive(Deserialize)]
struct Document {
    process: ProcessDoc,
}

#[derive(Deserialize)]
struct ProcessDoc {
    id: String,
    name: String,
    #[serde(default)]
    elements: Vec<RawElement>,
    #[serde(default)]
    connections: Vec<RawConnection>,
    #[serde(default, rename = "subProcessDefinitions")]
    sub_process_definitions: Vec<RawSubProcessDefinition>,
}

#[derive(Deserialize)]
struct RawElement {
    id: String,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    name: String,
    #[serde(default, rename = "attachedToRef")]
    attached_to_ref: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Json>,
    #[serde(default, rename = "childElements")]
    child_elements: Vec<RawElement>,
    #[serde(default, rename = "childConnections")]
    child_connections: Vec<RawConnection>,
}

#[derive(Deserialize)]
struct RawConnection {
    #[serde(default)]
    id: Option<String>,
    from: String,
    to: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, Json>,
}

#[derive(Deserialize)]
struct RawSubProcessDefinition {
    name: String,
    #[serde(default)]
    elements: Vec<RawElement>,
    #[serde(default)]
    connections: Vec<RawConnection>,
}

/// Parses a workflow-definition YAML document into an executable `Graph`.
///
/// `eventSubProcess` children are flattened into the containing graph's own
/// node/flow lists, matching `Graph::event_subprocess_starts()`'s assumption
/// that event-subprocess starts live alongside the main flow. Plain
/// `subProcess` children are kept private to their container and recorded
/// under `Graph::inline_subgraphs`, keyed by the container node's id.
pub fn parse_process_yaml(yaml: &str) -> Result<Graph, GraphParseError> {
    let doc: Document = serde_yaml::from_str(yaml)?;
    build_graph(
        doc.process.id,
        doc.process.name,
        doc.process.elements,
        doc.process.connections,
        doc.process.sub_process_definitions,
    )
}

fn build_graph(
    id: String,
    name: String,
    elements: Vec<RawElement>,
    connections: Vec<RawConnection>,
    sub_process_definitions: Vec<RawSubProcessDefinition>,
) -> Result<Graph, GraphParseError> {
    let mut nodes = Vec::new();
    let mut flows = Vec::new();
    let mut inline_subgraphs = BTreeMap::new();

    for el in elements {
        flatten_element(el, &mut nodes, &mut flows, &mut inline_subgraphs)?;
    }
    for conn in connections {
        flows.push(to_flow(conn));
    }

    let mut subprocess_definitions = BTreeMap::new();
    for sub in sub_process_definitions {
        let def_name = sub.name.clone();
        let graph = build_graph(def_name.clone(), def_name.clone(), sub.elements, sub.connections, Vec::new())?;
        subprocess_definitions.insert(def_name, graph);
    }

    Graph::new(id, name, nodes, flows, subprocess_definitions, inline_subgraphs)
}

fn flatten_element(
    el: RawElement,
    nodes: &mut Vec<Node>,
    flows: &mut Vec<Flow>,
    inline_subgraphs: &mut BTreeMap<String, Graph>,
) -> Result<(), GraphParseError> {
    let RawElement {
        id,
        kind,
        name,
        attached_to_ref,
        properties,
        child_elements,
        child_connections,
    } = el;

    match kind {
        NodeKind::SubProcess if !child_elements.is_empty() || !child_connections.is_empty() => {
            let graph = build_graph(
                id.clone(),
                name.clone(),
                child_elements,
                child_connections,
                Vec::new(),
            )?;
            inline_subgraphs.insert(id.clone(), graph);
            nodes.push(Node {
                id,
                kind,
                display_name: name,
                attached_to_ref,
                properties,
            });
        }
        _ => {
            nodes.push(Node {
                id,
                kind,
                display_name: name,
                attached_to_ref,
                properties,
            });
            for child in child_elements {
                flatten_element(child, nodes, flows, inline_subgraphs)?;
            }
            for conn in child_connections {
                flows.push(to_flow(conn));
            }
        }
    }
    Ok(())
}

fn to_flow(conn: RawConnection) -> Flow {
    let condition = conn
        .properties
        .get("condition")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let id = conn
        .id
        .unwrap_or_else(|| format!("{}-{}", conn.from, conn.to));
    Flow {
        id,
        from: conn.from,
        to: conn.to,
        name: conn.name,
        condition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_linear_process() {
        let yaml = r#"
process:
  id: p1
  name: Demo
  elements:
    - id: start
      type: startEvent
      name: Start
    - id: t1
      type: task
      name: Do work
    - id: end
      type: endEvent
      name: End
  connections:
    - from: start
      to: t1
    - from: t1
      to: end
"#;
        let graph = parse_process_yaml(yaml).unwrap();
        assert_eq!(graph.process_id, "p1");
        assert_eq!(graph.get_start_event().unwrap().id, "start");
        assert_eq!(graph.outgoing("start").len(), 1);
    }

    #[test]
    fn flattens_event_subprocess_children() {
        let yaml = r#"
process:
  id: p1
  name: Demo
  elements:
    - id: start
      type: startEvent
    - id: end
      type: endEvent
    - id: escalation
      type: eventSubProcess
      childElements:
        - id: escStart
          type: errorStartEvent
        - id: escEnd
          type: endEvent
      childConnections:
        - from: escStart
          to: escEnd
  connections:
    - from: start
      to: end
"#;
        let graph = parse_process_yaml(yaml).unwrap();
        assert!(graph.node("escStart").is_some());
        assert_eq!(graph.event_subprocess_starts().len(), 1);
    }

    #[test]
    fn keeps_sub_process_children_private_to_an_inline_subgraph() {
        let yaml = r#"
process:
  id: p1
  name: Demo
  elements:
    - id: start
      type: startEvent
    - id: embedded
      type: subProcess
      childElements:
        - id: innerStart
          type: startEvent
        - id: innerEnd
          type: endEvent
      childConnections:
        - from: innerStart
          to: innerEnd
    - id: end
      type: endEvent
  connections:
    - from: start
      to: embedded
    - from: embedded
      to: end
"#;
        let graph = parse_process_yaml(yaml).unwrap();
        assert!(graph.node("innerStart").is_none());
        assert!(graph.inline_subgraph("embedded").is_some());
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = parse_process_yaml("not: [valid").unwrap_err();
        assert!(matches!(err, GraphParseError::Yaml(_)));
    }
}
