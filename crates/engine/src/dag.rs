//! Flow graph validation. Run this before executing a flow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the flow.
//! 2. Every connection must reference valid node IDs (source and target).
//! 3. Every node type must be registered.
//! 4. The connection graph must be acyclic (topological sort must succeed).
//!
//! Returns a topologically-sorted list of node IDs on success.

use std::collections::{HashMap, HashSet, VecDeque};

use nodes::builtin::output::{RETURN_TYPE_NAME, UI_TYPE_NAME};
use nodes::{template, NodeRegistry};
use serde_json::Value;

use crate::executor::TRIGGER_ALIAS;
use crate::{models::Flow, EngineError};

/// Validate the flow against `registry` and return nodes in topological
/// order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if a connection references a missing node.
/// - [`EngineError::UnknownNodeType`] if a node's type is not registered.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_flow(flow: &Flow, registry: &NodeRegistry) -> Result<Vec<String>, EngineError> {
    check_structure(flow)?;

    for node in &flow.nodes {
        if !registry.contains(&node.node_type) {
            return Err(EngineError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }

    sort_checked(flow)
}

/// Unique ids and known connection endpoints.
fn check_structure(flow: &Flow) -> Result<(), EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &flow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    for conn in &flow.connections {
        if !seen_ids.contains(conn.source_node_id.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: conn.source_node_id.clone(),
                side: "connection source",
            });
        }
        if !seen_ids.contains(conn.target_node_id.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: conn.target_node_id.clone(),
                side: "connection target",
            });
        }
    }

    if let Some(terminal) = &flow.terminal {
        if !seen_ids.contains(terminal.as_str()) {
            return Err(EngineError::UnknownNodeReference {
                node_id: terminal.clone(),
                side: "terminal",
            });
        }
    }

    Ok(())
}

/// Kahn's algorithm, seeded in node declaration order so the result is
/// stable for a given document.
pub fn topological_order(flow: &Flow) -> Result<Vec<String>, EngineError> {
    check_structure(flow)?;
    sort_checked(flow)
}

/// [`topological_order`] for a flow that already passed `check_structure`.
fn sort_checked(flow: &Flow) -> Result<Vec<String>, EngineError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &flow.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }

    for conn in &flow.connections {
        adjacency
            .entry(conn.source_node_id.as_str())
            .or_default()
            .push(conn.target_node_id.as_str());
        *in_degree.entry(conn.target_node_id.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = flow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(flow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());

        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    // Anything left with incoming edges sits on a cycle.
    if sorted.len() != flow.nodes.len() {
        let stuck = flow
            .nodes
            .iter()
            .find(|n| in_degree.get(n.id.as_str()).is_some_and(|&d| d > 0))
            .map(|n| n.id.clone())
            .unwrap_or_default();
        return Err(EngineError::CycleDetected(stuck));
    }

    Ok(sorted)
}

/// Pick the node whose result is the run's result.
///
/// An explicit `Flow::terminal` wins. Otherwise the unique sink; with
/// several sinks, the last `return`/`ui` sink in `order`, else the last sink.
pub fn terminal_node(flow: &Flow, order: &[String]) -> Result<String, EngineError> {
    if let Some(terminal) = &flow.terminal {
        return Ok(terminal.clone());
    }

    let sinks: Vec<&String> = order.iter().filter(|id| !flow.has_outgoing(id)).collect();
    let is_output = |id: &str| {
        flow.node(id)
            .is_some_and(|n| n.node_type == RETURN_TYPE_NAME || n.node_type == UI_TYPE_NAME)
    };

    sinks
        .iter()
        .rev()
        .find(|id| is_output(id.as_str()))
        .or_else(|| sinks.last())
        .map(|id| (*id).clone())
        .ok_or(EngineError::NoTerminalNode)
}

/// A placeholder naming a node that is not in the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    /// Node whose parameters contain the placeholder.
    pub node_id: String,
    /// The id the placeholder points at.
    pub target: String,
}

/// Placeholders in node parameters that point at nodes missing from the
/// flow. These resolve to empty strings at run time, so they are reported
/// rather than rejected.
pub fn dangling_references(flow: &Flow) -> Vec<DanglingReference> {
    fn collect<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
        match value {
            Value::String(s) => out.push(s),
            Value::Array(items) => items.iter().for_each(|v| collect(v, out)),
            Value::Object(map) => map.values().for_each(|v| collect(v, out)),
            _ => {}
        }
    }

    let mut found = Vec::new();
    for node in &flow.nodes {
        let mut strings = Vec::new();
        collect(&node.parameters, &mut strings);
        for placeholder in strings.into_iter().flat_map(template::placeholders) {
            let known = flow.node(&placeholder.node_id).is_some() || placeholder.node_id == TRIGGER_ALIAS;
            let reference = DanglingReference {
                node_id: node.id.clone(),
                target: placeholder.node_id,
            };
            if !known && !found.contains(&reference) {
                found.push(reference);
            }
        }
    }
    found
}
