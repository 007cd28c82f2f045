//! Engine-level error types.

use nodes::NodeError;
use thiserror::Error;

/// Errors produced by the flow engine (validation + execution).
///
/// Node failures are not engine errors: they come back as a failed
/// `ExecutionResult` inside a successful run.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A connection or terminal override references a node ID that doesn't
    /// exist in the flow.
    #[error("{side} references unknown node '{node_id}'")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// No implementation is registered for a node's type.
    #[error("node '{node_id}' has unregistered type '{node_type}'")]
    UnknownNodeType {
        node_id: String,
        node_type: String,
    },

    /// The graph, or a chain of placeholder lookups, loops back on itself.
    #[error("flow contains a cycle through '{0}'")]
    CycleDetected(String),

    #[error("flow has no nodes")]
    NoTerminalNode,

    // ------ Execution errors ------

    /// A chain of upstream lookups went deeper than the configured limit.
    #[error("lookup chain exceeded depth {limit} at node '{node_id}'")]
    DepthExceeded { node_id: String, limit: usize },

    #[error("unknown flow '{0}'")]
    UnknownFlow(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// Schema inference for a node failed.
    #[error("node '{node_id}' failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    // ------ Setup errors ------

    #[error("configuration error: {0}")]
    Config(String),
}
