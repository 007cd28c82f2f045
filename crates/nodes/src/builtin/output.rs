//! Output-side data containers: `return` and `ui`.
//!
//! Neither does any work beyond resolving placeholders in its parameters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::schema::{OutputSchema, SchemaField, SchemaType};
use crate::template;
use crate::traits::{ExecutionContext, ExecutionResult, Node};

pub const RETURN_TYPE_NAME: &str = "return";
pub const UI_TYPE_NAME: &str = "ui";

// ---------------------------------------------------------------------------
// return
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnParams {
    /// Value handed back to the caller; `null` passes the input through.
    pub value: Value,
}

pub struct ReturnNode;

#[async_trait]
impl Node for ReturnNode {
    type Params = ReturnParams;

    fn type_name(&self) -> &'static str {
        RETURN_TYPE_NAME
    }

    fn output_schema(&self, params: &ReturnParams) -> OutputSchema {
        match &params.value {
            Value::Object(_) => {
                let mut schema = crate::schema::infer_from_value(&params.value);
                schema.dynamic = true;
                schema
            }
            _ => OutputSchema::open(Vec::new()),
        }
    }

    async fn execute(&self, ctx: ExecutionContext<ReturnParams>) -> ExecutionResult {
        if ctx.parameters.value.is_null() {
            return ExecutionResult::success(ctx.input);
        }
        let output = template::resolve_value(&ctx.parameters.value, ctx.lookup.as_ref()).await;
        ExecutionResult::success(output)
    }
}

// ---------------------------------------------------------------------------
// ui
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiParams {
    /// Component identifier understood by the chat front end.
    pub component: String,
    pub props: Value,
}

pub struct UiNode;

#[async_trait]
impl Node for UiNode {
    type Params = UiParams;

    fn type_name(&self) -> &'static str {
        UI_TYPE_NAME
    }

    fn output_schema(&self, _params: &UiParams) -> OutputSchema {
        OutputSchema::new(vec![
            SchemaField::new("component", SchemaType::String),
            SchemaField::new("props", SchemaType::Object).dynamic(),
        ])
    }

    async fn execute(&self, ctx: ExecutionContext<UiParams>) -> ExecutionResult {
        if ctx.parameters.component.trim().is_empty() {
            return ExecutionResult::from_error(&NodeError::Validation("component is required".into()));
        }
        let props = match &ctx.parameters.props {
            Value::Null => json!({}),
            props => template::resolve_value(props, ctx.lookup.as_ref()).await,
        };
        ExecutionResult::success(json!({
            "component": ctx.parameters.component,
            "props": props,
        }))
    }
}
