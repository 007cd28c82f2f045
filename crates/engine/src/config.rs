//! Engine configuration, loaded from TOML.
//!
//! Every section is optional; missing keys fall back to their defaults.
//!
//! ```toml
//! [sandbox]
//! timeout_ms = 2000
//! isolation = "process"
//! worker_path = "/usr/local/bin/agentflow-sandbox"
//!
//! [http]
//! default_timeout_ms = 10000
//!
//! [executor]
//! max_depth = 128
//! ```

use std::path::Path;
use std::sync::Arc;

use nodes::{HttpConfig, NodeRegistry, ReqwestTransport, Sandbox, SandboxConfig};
use serde::{Deserialize, Serialize};

use crate::executor::ExecutorConfig;
use crate::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sandbox: SandboxConfig,
    pub http: HttpConfig,
    pub executor: ExecutorConfig,
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Registry of built-in node types wired to a real HTTP client.
    pub fn build_registry(&self) -> Result<NodeRegistry, EngineError> {
        let transport = ReqwestTransport::new(&self.http).map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(NodeRegistry::with_builtins(
            Sandbox::new(self.sandbox.clone()),
            Arc::new(transport),
            &self.http,
        ))
    }
}
