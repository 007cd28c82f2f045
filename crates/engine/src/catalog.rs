//! Flow catalog: the trigger-invocation entry point.
//!
//! The editor pushes new flow versions with [`FlowCatalog::upsert`] at any
//! time. A run clones the current `Arc<Flow>` when it starts and works on
//! that snapshot, so edits made mid-run only affect later runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::executor::{GraphExecutor, RunOutcome};
use crate::models::Flow;
use crate::EngineError;

pub struct FlowCatalog {
    executor: GraphExecutor,
    flows: RwLock<HashMap<String, Arc<Flow>>>,
}

impl FlowCatalog {
    pub fn new(executor: GraphExecutor) -> Self {
        Self {
            executor,
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a flow. Returns the previous version, if any.
    pub fn upsert(&self, flow: Flow) -> Option<Arc<Flow>> {
        debug!(flow_id = %flow.id, "flow updated");
        self.flows.write().insert(flow.id.clone(), Arc::new(flow))
    }

    pub fn remove(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.write().remove(flow_id)
    }

    /// Current snapshot of a flow.
    pub fn get(&self, flow_id: &str) -> Option<Arc<Flow>> {
        self.flows.read().get(flow_id).cloned()
    }

    pub fn flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Run `flow_id` with `input` and return the outcome of its terminal
    /// node.
    #[instrument(skip(self, input))]
    pub async fn invoke(&self, flow_id: &str, input: Value) -> Result<RunOutcome, EngineError> {
        let flow = self
            .get(flow_id)
            .ok_or_else(|| EngineError::UnknownFlow(flow_id.to_owned()))?;
        self.executor.run(flow, input).await
    }
}
