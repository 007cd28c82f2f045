//! Test doubles: `MockNode` and `MockTransport`.
//!
//! Useful in unit and integration tests where a real node implementation or
//! a real network is either unavailable or irrelevant.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::schema::{OutputSchema, SchemaField, SchemaType};
use crate::traits::{ExecutionContext, ExecutionResult, Node};

// ---------------------------------------------------------------------------
// MockNode
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Succeed with a specific JSON value.
    ReturnValue(Value),
    /// Succeed with whatever arrived on the node's input.
    Echo,
    /// Fail with the given error.
    Fail(NodeError),
}

/// A mock node that records every input it receives and returns a
/// programmer-specified result.
///
/// Registered under a caller-chosen type name, so several mocks with
/// different behaviour can live in one registry.
pub struct MockNode {
    type_name: &'static str,
    behaviour: MockBehaviour,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with_behaviour(type_name: &'static str, behaviour: MockBehaviour) -> Self {
        Self {
            type_name,
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(type_name: &'static str, value: Value) -> Self {
        Self::with_behaviour(type_name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that passes its input through.
    pub fn echo(type_name: &'static str) -> Self {
        Self::with_behaviour(type_name, MockBehaviour::Echo)
    }

    /// Create a mock that always fails.
    pub fn failing(type_name: &'static str, error: NodeError) -> Self {
        Self::with_behaviour(type_name, MockBehaviour::Fail(error))
    }

    /// Shared handle on the recorded inputs; stays valid after the node is
    /// moved into a registry.
    pub fn calls(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Node for MockNode {
    type Params = Value;

    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn output_schema(&self, _params: &Value) -> OutputSchema {
        OutputSchema::new(vec![SchemaField::new("node", SchemaType::String)])
    }

    async fn execute(&self, ctx: ExecutionContext<Value>) -> ExecutionResult {
        self.calls.lock().push(ctx.input.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Tag the output with the node id so tests can trace the
                // data flowing through the graph.
                let mut out = json!({ "node": ctx.node_id });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                ExecutionResult::success(out)
            }
            MockBehaviour::Echo => ExecutionResult::success(ctx.input),
            MockBehaviour::Fail(err) => ExecutionResult::from_error(err),
        }
    }
}

// ---------------------------------------------------------------------------
// MockTransport
// ---------------------------------------------------------------------------

/// Scripted HTTP transport that records every request it is handed.
///
/// Responses are served in order; once the script runs out the last
/// response is repeated. An optional delay simulates a slow remote.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    last: Mutex<Option<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport answering every request with `status` and a JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Self::new().respond(Ok(json_response(status, body)))
    }

    pub fn respond(self, response: Result<HttpResponse, TransportError>) -> Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

/// A response with a JSON body and matching content type.
pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        status_text: String::new(),
        headers: [("content-type".to_string(), "application/json".to_string())]
            .into_iter()
            .collect(),
        body: body.to_string(),
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(next) = next {
            *last = Some(next);
        }
        last.clone()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())))
    }
}
