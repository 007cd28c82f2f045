//! Registry mapping node type names to their implementations.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{ApiCallNode, ReturnNode, TransformNode, TriggerNode, UiNode};
use crate::http::{HttpConfig, HttpTransport};
use crate::sandbox::Sandbox;
use crate::traits::NodeType;

#[derive(Clone, Default)]
pub struct NodeRegistry {
    types: HashMap<String, Arc<dyn NodeType>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in node type.
    pub fn with_builtins(sandbox: Sandbox, transport: Arc<dyn HttpTransport>, http: &HttpConfig) -> Self {
        let mut registry = Self::new();
        registry.register(TriggerNode);
        registry.register(TransformNode::new(sandbox));
        registry.register(ApiCallNode::new(transport, http.default_timeout_ms));
        registry.register(ReturnNode);
        registry.register(UiNode);
        registry
    }

    /// Register a node type under its own type name, replacing any previous
    /// registration.
    pub fn register<N: NodeType + 'static>(&mut self, node: N) -> &mut Self {
        self.register_arc(Arc::new(node))
    }

    pub fn register_arc(&mut self, node: Arc<dyn NodeType>) -> &mut Self {
        self.types.insert(node.type_name().to_owned(), node);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeType>> {
        self.types.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNode, MockTransport};

    #[test]
    fn builtins_are_registered() {
        let registry = NodeRegistry::with_builtins(
            Sandbox::default(),
            Arc::new(MockTransport::new()),
            &HttpConfig::default(),
        );
        assert_eq!(registry.type_names(), vec!["api_call", "return", "transform", "trigger", "ui"]);
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let mut registry = NodeRegistry::new();
        registry.register(MockNode::echo("step"));
        registry.register(MockNode::returning("step", serde_json::json!({})));
        assert_eq!(registry.type_names(), vec!["step"]);
        assert!(registry.contains("step"));
        assert!(registry.get("missing").is_none());
    }
}
