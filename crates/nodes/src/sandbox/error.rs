//! Sandbox failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::NodeError;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxError {
    /// The code did not finish within its execution budget.
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The code referenced a global outside the allow-list, or tried to
    /// generate code at runtime.
    #[error("access to '{identifier}' is blocked in the sandbox")]
    BlockedGlobalAccess { identifier: String },

    /// User code threw, or failed to compile.
    #[error("{0}")]
    RuntimeError(String),

    /// An interpreter limit (loop iterations, call depth) was hit before the
    /// deadline.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("code too large (max {max} bytes, got {actual} bytes)")]
    CodeTooLarge { max: usize, actual: usize },

    /// The input or the result could not cross the sandbox boundary.
    #[error("value conversion failed: {0}")]
    Conversion(String),

    /// The worker could not be started, or died without a result.
    #[error("sandbox worker failed: {0}")]
    Worker(String),
}

impl From<SandboxError> for NodeError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Timeout { .. } => NodeError::Timeout(err.to_string()),
            SandboxError::BlockedGlobalAccess { identifier } => NodeError::BlockedAccess { identifier },
            SandboxError::RuntimeError(message) => NodeError::Runtime(message),
            SandboxError::CodeTooLarge { .. } => NodeError::Validation(err.to_string()),
            SandboxError::ResourceLimit(_) | SandboxError::Conversion(_) => NodeError::Runtime(err.to_string()),
            SandboxError::Worker(_) => NodeError::Unexpected(err.to_string()),
        }
    }
}
