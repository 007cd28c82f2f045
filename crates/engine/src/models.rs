//! Core domain models for the flow engine.
//!
//! These types mirror the graph documents the visual editor produces. The
//! engine reads them and never writes them back; a run works on an
//! `Arc<Flow>` snapshot taken when it starts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// NodeInstance
// ---------------------------------------------------------------------------

/// Canvas coordinates; carried through untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One configured node in a flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    /// Unique within the flow; referenced by connections and placeholders.
    pub id: String,
    /// Registry key of the node type implementation.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub position: Position,
    /// Type-specific parameter map.
    #[serde(default)]
    pub parameters: Value,
}

impl NodeInstance {
    /// Convenience constructor for tests and programmatic flows.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, parameters: Value) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            slug: id.clone(),
            id,
            node_type: node_type.into(),
            position: Position::default(),
            parameters,
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Directed edge from one node's output port to another's input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    pub source_node_id: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub target_node_id: String,
    #[serde(default)]
    pub target_handle: Option<String>,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source_node_id = source.into();
        let target_node_id = target.into();
        Self {
            id: format!("{source_node_id}->{target_node_id}"),
            source_node_id,
            source_handle: None,
            target_node_id,
            target_handle: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A complete flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeInstance>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Explicit terminal node; inferred from the graph when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

impl Flow {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<NodeInstance>,
        connections: Vec<Connection>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes,
            connections,
            terminal: None,
        }
    }

    pub fn with_terminal(mut self, node_id: impl Into<String>) -> Self {
        self.terminal = Some(node_id.into());
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Distinct source node ids feeding `node_id`, in connection order.
    pub fn sources_of(&self, node_id: &str) -> Vec<&str> {
        let mut sources: Vec<&str> = Vec::new();
        for conn in self.connections.iter().filter(|c| c.target_node_id == node_id) {
            if !sources.contains(&conn.source_node_id.as_str()) {
                sources.push(conn.source_node_id.as_str());
            }
        }
        sources
    }

    pub fn has_outgoing(&self, node_id: &str) -> bool {
        self.connections.iter().any(|c| c.source_node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_document() {
        let flow: Flow = serde_json::from_value(json!({
            "id": "flow-1",
            "name": "Lookup",
            "nodes": [
                { "id": "t", "type": "trigger", "name": "Start", "slug": "start",
                  "position": { "x": 10.0, "y": 20.0 }, "parameters": {} },
                { "id": "a", "type": "transform", "parameters": { "code": "return input;" } }
            ],
            "connections": [
                { "id": "c1", "sourceNodeId": "t", "sourceHandle": "out",
                  "targetNodeId": "a", "targetHandle": "in" }
            ]
        }))
        .unwrap();

        assert_eq!(flow.nodes[0].node_type, "trigger");
        assert_eq!(flow.nodes[0].position, Position { x: 10.0, y: 20.0 });
        assert_eq!(flow.nodes[1].slug, "");
        assert_eq!(flow.connections[0].source_handle.as_deref(), Some("out"));
        assert_eq!(flow.terminal, None);
    }

    #[test]
    fn sources_are_deduplicated_in_connection_order() {
        let flow = Flow::new(
            "f",
            "f",
            vec![],
            vec![
                Connection::new("b", "c"),
                Connection::new("a", "c"),
                Connection::new("b", "c"),
            ],
        );
        assert_eq!(flow.sources_of("c"), vec!["b", "a"]);
        assert!(flow.has_outgoing("a"));
        assert!(!flow.has_outgoing("c"));
    }
}
