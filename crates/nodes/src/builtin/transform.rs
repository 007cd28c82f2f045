//! Transform node: runs user code in the sandbox against its input.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::NodeError;
use crate::sandbox::Sandbox;
use crate::schema::{self, OutputSchema, EXECUTION_FIELD};
use crate::traits::{ExecutionContext, ExecutionResult, Node};

pub const TYPE_NAME: &str = "transform";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransformParams {
    pub code: String,
    /// Schema from the last sample run.
    pub resolved_output_schema: Option<OutputSchema>,
    /// SHA-256 of the `code` that `resolved_output_schema` was inferred from.
    pub resolved_output_schema_hash: Option<String>,
}

impl TransformParams {
    /// Store `schema` as resolved for the current code.
    pub fn cache_schema(&mut self, resolved: OutputSchema) {
        self.resolved_output_schema_hash = Some(schema::code_hash(&self.code));
        self.resolved_output_schema = Some(resolved);
    }

    /// The cached schema, if it was resolved from the current code. A schema
    /// without a hash cannot be checked and is treated as stale.
    pub fn cached_schema(&self) -> Option<&OutputSchema> {
        let hash = self.resolved_output_schema_hash.as_deref()?;
        self.resolved_output_schema
            .as_ref()
            .filter(|_| hash == schema::code_hash(&self.code))
    }

    /// Drop a cached schema that no longer matches `code`. Returns whether
    /// anything was dropped.
    pub fn invalidate_stale(&mut self) -> bool {
        let stale = self.resolved_output_schema.is_some() && self.cached_schema().is_none();
        if stale {
            self.resolved_output_schema = None;
            self.resolved_output_schema_hash = None;
        }
        stale
    }
}

pub struct TransformNode {
    sandbox: Sandbox,
}

impl TransformNode {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Merge the `_execution` block into a successful result. Non-object
/// results are wrapped as `{ result: value }`.
fn success_output(value: Value, duration: Duration) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".into(), other);
            map
        }
    };
    map.insert(
        EXECUTION_FIELD.into(),
        json!({ "success": true, "durationMs": duration_ms(duration) }),
    );
    Value::Object(map)
}

fn failure_output(error: &NodeError, duration: Duration) -> Value {
    json!({
        EXECUTION_FIELD: {
            "success": false,
            "error": error.to_string(),
            "errorType": error.kind().as_str(),
            "durationMs": duration_ms(duration),
        }
    })
}

#[async_trait]
impl Node for TransformNode {
    type Params = TransformParams;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn output_schema(&self, params: &TransformParams) -> OutputSchema {
        match params.cached_schema() {
            Some(cached) => cached.clone(),
            None => OutputSchema::open(vec![schema::execution_metadata_field()]),
        }
    }

    async fn resolve_output_schema(
        &self,
        params: &TransformParams,
        sample_input: &Value,
    ) -> Result<OutputSchema, NodeError> {
        if params.code.trim().is_empty() {
            return Err(NodeError::Validation("transform code is empty".into()));
        }
        let outcome = self.sandbox.run(&params.code, sample_input).await?;
        debug!(duration_ms = duration_ms(outcome.duration), "resolved transform schema by sample run");
        Ok(schema::infer_from_value(&outcome.value).with_execution_metadata())
    }

    async fn execute(&self, ctx: ExecutionContext<TransformParams>) -> ExecutionResult {
        let started = Instant::now();

        if ctx.parameters.code.trim().is_empty() {
            let err = NodeError::Validation("transform code is empty".into());
            return ExecutionResult::failure(&err, failure_output(&err, started.elapsed()));
        }

        match self.sandbox.run(&ctx.parameters.code, &ctx.input).await {
            Ok(outcome) => {
                debug!(node_id = %ctx.node_id, duration_ms = duration_ms(outcome.duration), "transform succeeded");
                ExecutionResult::success(success_output(outcome.value, outcome.duration))
            }
            Err(sandbox_err) => {
                let err = NodeError::from(sandbox_err);
                warn!(node_id = %ctx.node_id, kind = %err.kind(), "transform failed: {err}");
                ExecutionResult::failure(&err, failure_output(&err, started.elapsed()))
            }
        }
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeErrorKind;
    use crate::sandbox::{Isolation, SandboxConfig};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn in_process() -> SandboxConfig {
        SandboxConfig {
            isolation: Isolation::Thread,
            loop_iteration_limit: 10_000_000,
            ..SandboxConfig::default()
        }
    }

    fn node() -> TransformNode {
        TransformNode::new(Sandbox::new(in_process()))
    }

    fn ctx(code: &str, input: Value) -> ExecutionContext<TransformParams> {
        let params = TransformParams {
            code: code.into(),
            ..TransformParams::default()
        };
        ExecutionContext::new("t1", params, input, Arc::new(HashMap::<String, Value>::new()))
    }

    #[tokio::test]
    async fn identity_transform_keeps_input_and_adds_metadata() {
        let input = json!({ "a": 1, "b": ["x"] });
        let result = node().execute(ctx("return input;", input.clone())).await;
        assert!(result.success);

        let mut output = result.output.clone();
        let meta = output.as_object_mut().unwrap().remove(EXECUTION_FIELD).unwrap();
        assert_eq!(output, input);
        assert_eq!(meta["success"], true);
        assert!(meta["durationMs"].as_u64().is_some());
    }

    #[tokio::test]
    async fn scalar_results_are_wrapped() {
        let result = node().execute(ctx("return input.n + 1;", json!({ "n": 1 }))).await;
        assert_eq!(result.output["result"], 2);
        assert_eq!(result.output[EXECUTION_FIELD]["success"], true);
    }

    #[tokio::test]
    async fn empty_code_is_a_validation_failure() {
        let result = node().execute(ctx("   ", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(NodeErrorKind::Validation));
        assert_eq!(result.output[EXECUTION_FIELD]["success"], false);
    }

    #[tokio::test]
    async fn blocked_global_surfaces_through_the_result() {
        let result = node().execute(ctx("return require('fs');", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(NodeErrorKind::BlockedAccess));
        assert!(result.error.as_deref().unwrap().contains("require"));
        assert_eq!(result.output[EXECUTION_FIELD]["errorType"], "blocked_access");
    }

    #[tokio::test]
    async fn timeout_surfaces_through_the_result() {
        let node = TransformNode::new(Sandbox::new(SandboxConfig {
            timeout_ms: 50,
            ..in_process()
        }));
        let result = node.execute(ctx("while (true) {}", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(NodeErrorKind::Timeout));
        assert!(result.output[EXECUTION_FIELD]["durationMs"].as_u64().is_some());
    }

    #[tokio::test]
    async fn schema_resolution_is_idempotent() {
        let params = TransformParams {
            code: "return { x: input.n * 2, label: 'v' };".into(),
            ..TransformParams::default()
        };
        let sample = json!({ "n": 1 });
        let first = node().resolve_output_schema(&params, &sample).await.unwrap();
        let second = node().resolve_output_schema(&params, &sample).await.unwrap();
        assert_eq!(first, second);
        assert!(first.field("x").is_some());
        assert!(first.field(EXECUTION_FIELD).is_some());
        assert!(!first.dynamic);
    }

    #[tokio::test]
    async fn cached_schema_is_used_until_code_changes() {
        let mut params = TransformParams {
            code: "return { x: 1 };".into(),
            ..TransformParams::default()
        };
        let schema = node().resolve_output_schema(&params, &json!({})).await.unwrap();
        params.cache_schema(schema.clone());
        assert_eq!(node().output_schema(&params), schema);
        assert!(!params.invalidate_stale());

        params.code = "return { y: 1 };".into();
        assert!(node().output_schema(&params).dynamic);
        assert!(params.invalidate_stale());
        assert!(params.resolved_output_schema.is_none());
        assert!(params.resolved_output_schema_hash.is_none());
    }

    #[test]
    fn cached_schema_is_a_plain_schema_on_the_wire() {
        let mut params = TransformParams {
            code: "return { x: 1 };".into(),
            ..TransformParams::default()
        };
        params.cache_schema(OutputSchema::new(vec![schema::SchemaField::new("x", schema::SchemaType::Number)]));

        let wire = serde_json::to_value(&params).unwrap();
        assert_eq!(wire["resolvedOutputSchema"]["fields"][0]["name"], "x");
        assert_eq!(wire["resolvedOutputSchemaHash"], schema::code_hash("return { x: 1 };"));

        let unhashed: TransformParams = serde_json::from_value(json!({
            "code": "return { x: 1 };",
            "resolvedOutputSchema": { "fields": [] }
        }))
        .unwrap();
        assert!(unhashed.cached_schema().is_none());
        assert!(node().output_schema(&unhashed).dynamic);
    }
}
