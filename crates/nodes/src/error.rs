//! Node-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification carried by every failed [`ExecutionResult`].
///
/// The string form (`as_str`) is what ends up in output payloads under
/// `errorType`, so downstream templates and the editor can branch on it.
///
/// [`ExecutionResult`]: crate::traits::ExecutionResult
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    /// Missing or malformed parameter, detected before any suspension point.
    Validation,
    /// Sandbox or network deadline exceeded.
    Timeout,
    /// Sandboxed code touched something outside the allow-list.
    BlockedAccess,
    /// User code threw (or failed to compile).
    Runtime,
    /// Connection, DNS or TLS failure.
    Network,
    /// An upstream lookup failed while resolving placeholders.
    TemplateResolution,
    /// Anything else.
    Unexpected,
}

impl NodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeErrorKind::Validation => "validation",
            NodeErrorKind::Timeout => "timeout",
            NodeErrorKind::BlockedAccess => "blocked_access",
            NodeErrorKind::Runtime => "runtime",
            NodeErrorKind::Network => "network",
            NodeErrorKind::TemplateResolution => "template_resolution",
            NodeErrorKind::Unexpected => "unexpected",
        }
    }
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised inside a node's execution.
///
/// These never cross the `execute` boundary: nodes turn them into a failed
/// [`ExecutionResult`](crate::traits::ExecutionResult) with the same message.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Timeout(String),

    #[error("access to '{identifier}' is blocked in the sandbox")]
    BlockedAccess { identifier: String },

    #[error("{0}")]
    Runtime(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("template resolution failed: {0}")]
    TemplateResolution(String),

    #[error("{0}")]
    Unexpected(String),
}

impl NodeError {
    pub fn kind(&self) -> NodeErrorKind {
        match self {
            NodeError::Validation(_) => NodeErrorKind::Validation,
            NodeError::Timeout(_) => NodeErrorKind::Timeout,
            NodeError::BlockedAccess { .. } => NodeErrorKind::BlockedAccess,
            NodeError::Runtime(_) => NodeErrorKind::Runtime,
            NodeError::Network(_) => NodeErrorKind::Network,
            NodeError::TemplateResolution(_) => NodeErrorKind::TemplateResolution,
            NodeError::Unexpected(_) => NodeErrorKind::Unexpected,
        }
    }
}

/// Failure of a `getNodeValue` lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// No node with that id exists in the flow.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// The node is already being resolved further up the same lookup chain.
    #[error("cyclic reference through node '{0}'")]
    Cycle(String),

    #[error("lookup of '{node_id}' failed: {message}")]
    Failed { node_id: String, message: String },
}
