//! Worker process for process-isolated sandbox runs.
//!
//! The parent writes one [`WorkerRequest`] as JSON to the worker's stdin and
//! closes it. The worker evaluates the script and writes
//! `Result<Value, SandboxError>` as JSON to stdout. One run per process, so
//! killing the process at the deadline reclaims everything the script held.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{evaluate, SandboxConfig, SandboxError};

/// File stem of the worker binary shipped with this crate.
pub const WORKER_BIN: &str = "agentflow-sandbox";

/// Environment variable overriding where the worker binary lives.
pub const WORKER_ENV: &str = "AGENTFLOW_SANDBOX_WORKER";

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WorkerRequest {
    pub config: SandboxConfig,
    pub script: String,
    pub input: Value,
}

/// Evaluate a single request read from stdin and write the reply to stdout.
///
/// Script failures are part of the reply; only I/O on the pipes is an error.
pub fn serve_stdio() -> std::io::Result<()> {
    let mut raw = Vec::new();
    std::io::stdin().lock().read_to_end(&mut raw)?;

    let reply: Result<Value, SandboxError> = match serde_json::from_slice::<WorkerRequest>(&raw) {
        Ok(request) => evaluate(&request.config, &request.script, &request.input),
        Err(e) => Err(SandboxError::Worker(format!("malformed request: {e}"))),
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &reply)?;
    stdout.flush()
}
