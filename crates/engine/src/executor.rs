//! Flow execution engine.
//!
//! `GraphExecutor` is the central orchestrator:
//! 1. Validates the flow and produces a topological ordering.
//! 2. Picks the terminal node and asks for its value.
//! 3. Each requested node first pulls the outputs of its incoming
//!    connections, then executes with a lookup that resolves further
//!    `{{nodeId.path}}` references on demand.
//! 4. Every node runs at most once per pass; later requests get the
//!    memoized result.
//!
//! Node failures never abort the pass. A failed node's error-shaped output
//! flows downstream like any other value; only the terminal node's result
//! is reported to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use nodes::{ExecutionContext, ExecutionResult, LookupError, NodeRegistry, NodeValueLookup};

use crate::dag::{terminal_node, validate_flow};
use crate::models::Flow;
use crate::EngineError;

/// Node id that resolves to the trigger input when no node carries it.
pub const TRIGGER_ALIAS: &str = "trigger";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Longest chain of nested upstream lookups allowed in one pass.
    pub max_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

// ---------------------------------------------------------------------------
// Output of a completed run
// ---------------------------------------------------------------------------

/// The result of running a full flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub flow_id: String,
    pub terminal_node_id: String,
    /// The terminal node's result; this is what the caller sees.
    pub result: ExecutionResult,
    /// Every node that executed during the pass.
    pub node_results: BTreeMap<String, ExecutionResult>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

/// State shared by every lookup in one pass. Dropped when the run ends.
struct Pass {
    run_id: Uuid,
    flow: Arc<Flow>,
    registry: Arc<NodeRegistry>,
    trigger_input: Value,
    cells: HashMap<String, OnceCell<ExecutionResult>>,
    max_depth: usize,
    /// First structural error hit during the pass; fails the run at the end.
    fault: Mutex<Option<EngineError>>,
}

impl Pass {
    fn record_fault(&self, err: EngineError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            warn!(run_id = %self.run_id, "{err}");
            *fault = Some(err);
        }
    }

    /// Result of `node_id`, executing it on first request.
    ///
    /// `chain` holds the nodes whose evaluation is waiting on this one.
    fn evaluate<'a>(
        self: &'a Arc<Self>,
        node_id: &'a str,
        chain: &'a [String],
    ) -> BoxFuture<'a, Result<ExecutionResult, LookupError>> {
        Box::pin(async move {
            if chain.iter().any(|id| id == node_id) {
                self.record_fault(EngineError::CycleDetected(node_id.to_owned()));
                return Err(LookupError::Cycle(node_id.to_owned()));
            }
            if chain.len() >= self.max_depth {
                self.record_fault(EngineError::DepthExceeded {
                    node_id: node_id.to_owned(),
                    limit: self.max_depth,
                });
                return Err(LookupError::Failed {
                    node_id: node_id.to_owned(),
                    message: "lookup chain too deep".into(),
                });
            }

            let cell = self
                .cells
                .get(node_id)
                .ok_or_else(|| LookupError::UnknownNode(node_id.to_owned()))?;

            cell.get_or_try_init(|| self.execute_node(node_id, chain))
                .await
                .cloned()
        })
    }

    async fn execute_node(self: &Arc<Self>, node_id: &str, chain: &[String]) -> Result<ExecutionResult, LookupError> {
        let node = self
            .flow
            .node(node_id)
            .ok_or_else(|| LookupError::UnknownNode(node_id.to_owned()))?;
        let node_type = self.registry.get(&node.node_type).ok_or_else(|| LookupError::Failed {
            node_id: node_id.to_owned(),
            message: format!("no implementation registered for type '{}'", node.node_type),
        })?;

        let mut chain = chain.to_vec();
        chain.push(node_id.to_owned());

        let input = self.gather_input(node_id, &chain).await?;

        let lookup = Arc::new(PassLookup {
            pass: Arc::clone(self),
            chain,
        });
        let ctx = ExecutionContext::new(node_id, node.parameters.clone(), input, lookup).with_run_id(self.run_id);

        let started = Instant::now();
        let result = node_type
            .execute(ctx)
            .instrument(info_span!("node", node_id, node_type = %node.node_type))
            .await;

        if result.success {
            debug!(node_id, elapsed = ?started.elapsed(), "node succeeded");
        } else {
            warn!(
                node_id,
                kind = ?result.error_kind,
                "node failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(result)
    }

    /// Value arriving on `node_id`'s incoming connections.
    ///
    /// No connections: the trigger input. One: that source's output.
    /// Several: an object keyed by source node id.
    async fn gather_input(self: &Arc<Self>, node_id: &str, chain: &[String]) -> Result<Value, LookupError> {
        let sources = self.flow.sources_of(node_id);
        match sources.as_slice() {
            [] => Ok(self.trigger_input.clone()),
            [single] => Ok(self.evaluate(single, chain).await?.output),
            many => {
                let mut merged = Map::new();
                for source in many {
                    let result = self.evaluate(source, chain).await?;
                    merged.insert((*source).to_owned(), result.output);
                }
                Ok(Value::Object(merged))
            }
        }
    }

    fn node_results(&self) -> BTreeMap<String, ExecutionResult> {
        self.cells
            .iter()
            .filter_map(|(id, cell)| cell.get().map(|r| (id.clone(), r.clone())))
            .collect()
    }
}

/// The `getNodeValue` accessor handed to one node's execution.
struct PassLookup {
    pass: Arc<Pass>,
    chain: Vec<String>,
}

impl NodeValueLookup for PassLookup {
    fn get_node_value<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Result<Value, LookupError>> {
        Box::pin(async move {
            if !self.pass.cells.contains_key(node_id) && node_id == TRIGGER_ALIAS {
                return Ok(self.pass.trigger_input.clone());
            }
            self.pass
                .evaluate(node_id, &self.chain)
                .await
                .map(|result| result.output)
        })
    }
}

// ---------------------------------------------------------------------------
// GraphExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one instance can serve any number of concurrent
/// runs.
#[derive(Debug, Clone)]
pub struct GraphExecutor {
    registry: Arc<NodeRegistry>,
    config: ExecutorConfig,
}

impl GraphExecutor {
    pub fn new(registry: NodeRegistry, config: ExecutorConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Run one forward pass of `flow` and return the terminal node's result.
    ///
    /// # Errors
    /// Returns `EngineError` for validation failures and for cycles or
    /// runaway depth discovered through placeholder lookups. Node failures
    /// are reported inside the outcome instead.
    #[instrument(skip(self, flow, trigger_input), fields(flow_id = %flow.id))]
    pub async fn run(&self, flow: Arc<Flow>, trigger_input: Value) -> Result<RunOutcome, EngineError> {
        let order = validate_flow(&flow, &self.registry)?;
        let terminal = terminal_node(&flow, &order)?;
        info!("flow validated: {} nodes, terminal '{}'", order.len(), terminal);

        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = Uuid::new_v4();

        let pass = Arc::new(Pass {
            run_id,
            flow: Arc::clone(&flow),
            registry: Arc::clone(&self.registry),
            trigger_input,
            cells: flow.nodes.iter().map(|n| (n.id.clone(), OnceCell::new())).collect(),
            max_depth: self.config.max_depth,
            fault: Mutex::new(None),
        });

        let evaluated = pass.evaluate(&terminal, &[]).await;

        if let Some(fault) = pass.fault.lock().take() {
            return Err(fault);
        }
        let result = evaluated.map_err(|e| match e {
            LookupError::Cycle(id) => EngineError::CycleDetected(id),
            LookupError::UnknownNode(id) => EngineError::UnknownNode(id),
            LookupError::Failed { node_id, message } => EngineError::Node {
                node_id,
                source: nodes::NodeError::Unexpected(message),
            },
        })?;

        let duration = started.elapsed();
        info!(
            %run_id,
            success = result.success,
            elapsed = ?duration,
            "flow run finished"
        );

        Ok(RunOutcome {
            run_id,
            flow_id: flow.id.clone(),
            terminal_node_id: terminal,
            result,
            node_results: pass.node_results(),
            started_at,
            duration,
        })
    }
}
