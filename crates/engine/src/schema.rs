//! Output schema lookups for the editor.
//!
//! The editor asks for a node's schema to render type hints. Static-shape
//! nodes answer from their parameters alone; transforms can be resolved by a
//! live sample run and the result cached back into their parameters.

use std::sync::Arc;

use nodes::builtin::transform::{self, TransformParams};
use nodes::traits::parse_parameters;
use nodes::{NodeRegistry, NodeType, OutputSchema};
use serde_json::Value;
use tracing::{info, instrument};

use crate::models::NodeInstance;
use crate::EngineError;

fn node_type(registry: &NodeRegistry, node: &NodeInstance) -> Result<Arc<dyn NodeType>, EngineError> {
    registry.get(&node.node_type).ok_or_else(|| EngineError::UnknownNodeType {
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
    })
}

/// Schema from the node's current parameters, without running anything.
///
/// For transforms this is the cached schema while it still matches the
/// code, and an open placeholder otherwise.
pub fn output_schema(registry: &NodeRegistry, node: &NodeInstance) -> Result<OutputSchema, EngineError> {
    Ok(node_type(registry, node)?.output_schema(&node.parameters))
}

/// Schema discovered by running the node once against `sample_input`.
#[instrument(skip(registry, node, sample_input), fields(node_id = %node.id))]
pub async fn infer_output_schema(
    registry: &NodeRegistry,
    node: &NodeInstance,
    sample_input: &Value,
) -> Result<OutputSchema, EngineError> {
    node_type(registry, node)?
        .resolve_output_schema(&node.parameters, sample_input)
        .await
        .map_err(|source| EngineError::Node {
            node_id: node.id.clone(),
            source,
        })
}

/// New parameters for `node` with `resolvedOutputSchema` and
/// `resolvedOutputSchemaHash` filled in.
///
/// The node itself is left alone; the caller stores the returned document.
/// Types without a cacheable schema get their parameters back unchanged.
pub async fn resolve_and_cache(
    registry: &NodeRegistry,
    node: &NodeInstance,
    sample_input: &Value,
) -> Result<Value, EngineError> {
    if node.node_type != transform::TYPE_NAME {
        node_type(registry, node)?;
        return Ok(node.parameters.clone());
    }

    let schema = infer_output_schema(registry, node, sample_input).await?;
    let mut params: TransformParams = parse_parameters(&node.parameters).map_err(|source| EngineError::Node {
        node_id: node.id.clone(),
        source,
    })?;
    params.cache_schema(schema);
    info!(node_id = %node.id, "cached resolved output schema");

    serde_json::to_value(&params).map_err(|e| EngineError::Node {
        node_id: node.id.clone(),
        source: nodes::NodeError::Unexpected(e.to_string()),
    })
}
