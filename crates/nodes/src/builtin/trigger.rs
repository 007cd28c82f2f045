//! Trigger node: the entry point of a flow. Emits the run's trigger input.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::schema::OutputSchema;
use crate::schema::SchemaField;
use crate::traits::{ExecutionContext, ExecutionResult, Node};

pub const TYPE_NAME: &str = "trigger";

/// How a run of the flow gets started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    /// Exposed to an agent as a callable tool.
    ToolCall {
        #[serde(rename = "toolName")]
        tool_name: String,
    },
    Webhook {
        path: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerParams {
    pub kind: TriggerKind,
    /// Declared shape of the trigger input.
    pub input_schema: Vec<SchemaField>,
}

pub struct TriggerNode;

#[async_trait]
impl Node for TriggerNode {
    type Params = TriggerParams;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn output_schema(&self, params: &TriggerParams) -> OutputSchema {
        if params.input_schema.is_empty() {
            OutputSchema::open(Vec::new())
        } else {
            OutputSchema::new(params.input_schema.clone())
        }
    }

    async fn execute(&self, ctx: ExecutionContext<TriggerParams>) -> ExecutionResult {
        ExecutionResult::success(ctx.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaType;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn emits_trigger_input_unchanged() {
        let input = json!({ "userId": 7 });
        let ctx = ExecutionContext::new(
            "trigger",
            TriggerParams::default(),
            input.clone(),
            Arc::new(HashMap::<String, Value>::new()),
        );
        let result = TriggerNode.execute(ctx).await;
        assert!(result.success);
        assert_eq!(result.output, input);
    }

    #[test]
    fn parses_tool_call_kind() {
        let params: TriggerParams = serde_json::from_value(json!({
            "kind": { "type": "tool_call", "toolName": "lookup_user" },
            "inputSchema": [{ "name": "userId", "type": "number" }]
        }))
        .unwrap();
        assert_eq!(
            params.kind,
            TriggerKind::ToolCall {
                tool_name: "lookup_user".into()
            }
        );

        let schema = TriggerNode.output_schema(&params);
        assert!(schema.is_static());
        assert_eq!(schema.field("userId").unwrap().field_type, SchemaType::Number);
    }

    #[test]
    fn undeclared_input_is_an_open_schema() {
        assert!(!TriggerNode.output_schema(&TriggerParams::default()).is_static());
    }
}
