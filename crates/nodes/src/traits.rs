//! The node type contract every node must fulfil.
//!
//! Node implementations write against the typed [`Node`] trait. The engine
//! only ever sees the erased [`NodeType`] trait object, which every `Node`
//! gets for free through a blanket impl: parameters arrive as raw JSON and
//! are parsed into the node's own parameter struct before `execute` runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{LookupError, NodeError, NodeErrorKind};
use crate::schema::OutputSchema;
use crate::template;

// ---------------------------------------------------------------------------
// Upstream value lookup
// ---------------------------------------------------------------------------

/// Resolves a node id to that node's output within the current run.
///
/// The engine's implementation executes the node on first request and
/// memoizes the result for the rest of the pass.
pub trait NodeValueLookup: Send + Sync {
    fn get_node_value<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Result<Value, LookupError>>;
}

/// Fixed lookup table, used for sample runs and tests.
impl NodeValueLookup for HashMap<String, Value> {
    fn get_node_value<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Result<Value, LookupError>> {
        let found = self
            .get(node_id)
            .cloned()
            .ok_or_else(|| LookupError::UnknownNode(node_id.to_owned()));
        Box::pin(async move { found })
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Per-invocation bundle handed to exactly one `execute` call.
pub struct ExecutionContext<P> {
    /// ID of the current run, for log correlation.
    pub run_id: Uuid,
    /// ID of the node instance being executed.
    pub node_id: String,
    /// The node's parameters, already parsed.
    pub parameters: P,
    /// Value arriving on the node's incoming connections.
    pub input: Value,
    /// Accessor for upstream node outputs.
    pub lookup: Arc<dyn NodeValueLookup>,
}

impl<P> ExecutionContext<P> {
    pub fn new(node_id: impl Into<String>, parameters: P, input: Value, lookup: Arc<dyn NodeValueLookup>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            node_id: node_id.into(),
            parameters,
            input,
            lookup,
        }
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Fetch an upstream node's output.
    pub async fn get_node_value(&self, node_id: &str) -> Result<Value, LookupError> {
        self.lookup.get_node_value(node_id).await
    }

    /// Resolve `{{nodeId.path}}` placeholders against upstream outputs.
    pub async fn resolve(&self, template: &str) -> String {
        template::resolve(template, self.lookup.as_ref()).await
    }

    /// Swap the parameter payload, keeping everything else.
    pub fn with_parameters<Q>(self, parameters: Q) -> ExecutionContext<Q> {
        ExecutionContext {
            run_id: self.run_id,
            node_id: self.node_id,
            parameters,
            input: self.input,
            lookup: self.lookup,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// What every `execute` call returns, success or not.
///
/// `output` is always populated; on failure it carries an error-shaped
/// payload so downstream placeholders still resolve against something.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<NodeErrorKind>,
    pub output: Value,
}

impl ExecutionResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            output,
        }
    }

    pub fn failure(error: &NodeError, output: Value) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            output,
        }
    }

    /// Failure with the generic `{error, errorType}` payload.
    pub fn from_error(error: &NodeError) -> Self {
        Self::failure(error, error_payload(error))
    }
}

/// Minimal error-shaped output payload.
pub fn error_payload(error: &NodeError) -> Value {
    json!({
        "error": error.to_string(),
        "errorType": error.kind().as_str(),
    })
}

// ---------------------------------------------------------------------------
// Typed node trait
// ---------------------------------------------------------------------------

/// The typed contract node implementations write against.
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Parameter shape published by this node type.
    type Params: DeserializeOwned + Serialize + Default + Send + Sync + 'static;

    /// Registry key, e.g. `"api_call"`.
    fn type_name(&self) -> &'static str;

    /// Statically known output shape for the given parameters.
    fn output_schema(&self, params: &Self::Params) -> OutputSchema;

    /// Output shape discovered by a sample execution.
    ///
    /// Static-shape nodes keep the default, which returns
    /// [`Node::output_schema`].
    async fn resolve_output_schema(
        &self,
        params: &Self::Params,
        _sample_input: &Value,
    ) -> Result<OutputSchema, NodeError> {
        Ok(self.output_schema(params))
    }

    /// Run the node. Must not panic; failures go into the result.
    async fn execute(&self, ctx: ExecutionContext<Self::Params>) -> ExecutionResult;
}

// ---------------------------------------------------------------------------
// Erased node trait
// ---------------------------------------------------------------------------

/// Object-safe view of a [`Node`] working on raw JSON parameters.
///
/// The engine dispatches execution through `Arc<dyn NodeType>`.
#[async_trait]
pub trait NodeType: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Default parameter document for a freshly placed node.
    fn default_parameters(&self) -> Value;

    fn output_schema(&self, parameters: &Value) -> OutputSchema;

    async fn resolve_output_schema(
        &self,
        parameters: &Value,
        sample_input: &Value,
    ) -> Result<OutputSchema, NodeError>;

    async fn execute(&self, ctx: ExecutionContext<Value>) -> ExecutionResult;
}

/// Parse a raw parameter map into a node's typed parameters.
///
/// `null` means "nothing configured yet" and yields the defaults.
pub fn parse_parameters<P: DeserializeOwned + Default>(parameters: &Value) -> Result<P, NodeError> {
    if parameters.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(parameters.clone())
        .map_err(|e| NodeError::Validation(format!("invalid parameters: {e}")))
}

#[async_trait]
impl<N: Node> NodeType for N {
    fn type_name(&self) -> &'static str {
        Node::type_name(self)
    }

    fn default_parameters(&self) -> Value {
        serde_json::to_value(N::Params::default()).unwrap_or(Value::Null)
    }

    fn output_schema(&self, parameters: &Value) -> OutputSchema {
        let params = parse_parameters::<N::Params>(parameters).unwrap_or_default();
        Node::output_schema(self, &params)
    }

    async fn resolve_output_schema(
        &self,
        parameters: &Value,
        sample_input: &Value,
    ) -> Result<OutputSchema, NodeError> {
        let params = parse_parameters::<N::Params>(parameters)?;
        Node::resolve_output_schema(self, &params, sample_input).await
    }

    async fn execute(&self, ctx: ExecutionContext<Value>) -> ExecutionResult {
        match parse_parameters::<N::Params>(&ctx.parameters) {
            Ok(params) => Node::execute(self, ctx.with_parameters(params)).await,
            Err(err) => {
                tracing::warn!(node_id = %ctx.node_id, node_type = Node::type_name(self), "{err}");
                ExecutionResult::from_error(&err)
            }
        }
    }
}
