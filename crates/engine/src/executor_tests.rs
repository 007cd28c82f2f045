//! Integration tests for the flow execution engine.
//!
//! These tests run real built-in nodes (sandboxed transforms, return nodes)
//! alongside `MockNode`s, with a `MockTransport` standing in for the network.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use nodes::mock::{MockNode, MockTransport};
use nodes::{HttpConfig, Isolation, NodeError, NodeErrorKind, NodeRegistry, Sandbox, SandboxConfig};

use crate::catalog::FlowCatalog;
use crate::executor::{ExecutorConfig, GraphExecutor};
use crate::models::{Connection, Flow, NodeInstance};
use crate::EngineError;

/// Built-ins wired to `transport`, plus whatever mocks the test adds.
fn registry_with(transport: Arc<MockTransport>, mocks: Vec<MockNode>) -> NodeRegistry {
    let sandbox = Sandbox::new(SandboxConfig {
        isolation: Isolation::Thread,
        ..SandboxConfig::default()
    });
    let mut registry = NodeRegistry::with_builtins(sandbox, transport, &HttpConfig::default());
    for mock in mocks {
        registry.register(mock);
    }
    registry
}

fn executor(registry: NodeRegistry) -> GraphExecutor {
    GraphExecutor::new(registry, ExecutorConfig::default())
}

fn trigger(id: &str) -> NodeInstance {
    NodeInstance::new(id, "trigger", json!({}))
}

fn return_node(id: &str, value: Value) -> NodeInstance {
    NodeInstance::new(id, "return", json!({ "value": value }))
}

// ============================================================
// End-to-end scenario
// ============================================================

#[tokio::test]
async fn transform_output_feeds_api_call_header() {
    let transport = Arc::new(MockTransport::json(200, json!({ "ok": true })));
    let flow = Flow::new(
        "scenario",
        "transform then call",
        vec![
            trigger("t"),
            NodeInstance::new("A", "transform", json!({ "code": "return {x: input.n * 2}" })),
            NodeInstance::new(
                "B",
                "api_call",
                json!({
                    "method": "GET",
                    "url": "https://api.example.test/items",
                    "headers": [{ "key": "Authorization", "value": "Bearer {{A.x}}" }]
                }),
            ),
        ],
        vec![Connection::new("t", "A"), Connection::new("A", "B")],
    );

    let outcome = executor(registry_with(transport.clone(), vec![]))
        .run(Arc::new(flow), json!({ "n": 21 }))
        .await
        .expect("run should succeed");

    let sent = transport.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header("Authorization"), Some("Bearer 42"));

    assert_eq!(outcome.terminal_node_id, "B");
    assert!(outcome.result.success);
    assert_eq!(outcome.result.output["status"], 200);
    assert_eq!(outcome.node_results["A"].output["x"], 42);
    assert_eq!(outcome.node_results["A"].output["_execution"]["success"], true);
}

// ============================================================
// Memoization and laziness
// ============================================================

#[tokio::test]
async fn shared_upstream_runs_once_in_a_diamond() {
    //     src
    //    /   \
    //   b     c
    //    \   /
    //      d
    let source = MockNode::returning("source", json!({ "v": 1 }));
    let source_calls = source.calls();
    let echo = MockNode::echo("echo");
    let echo_calls = echo.calls();

    let flow = Flow::new(
        "diamond",
        "diamond",
        vec![
            NodeInstance::new("src", "source", Value::Null),
            NodeInstance::new("b", "echo", Value::Null),
            NodeInstance::new("c", "echo", Value::Null),
            NodeInstance::new("d", "echo", Value::Null),
        ],
        vec![
            Connection::new("src", "b"),
            Connection::new("src", "c"),
            Connection::new("b", "d"),
            Connection::new("c", "d"),
        ],
    );

    let outcome = executor(registry_with(Arc::new(MockTransport::new()), vec![source, echo]))
        .run(Arc::new(flow), json!({ "origin": "trigger" }))
        .await
        .unwrap();

    assert_eq!(source_calls.lock().len(), 1);
    assert_eq!(echo_calls.lock().len(), 3);
    assert_eq!(source_calls.lock()[0], json!({ "origin": "trigger" }));

    // Several incoming connections arrive keyed by source id.
    assert_eq!(
        outcome.result.output,
        json!({
            "b": { "node": "src", "v": 1 },
            "c": { "node": "src", "v": 1 }
        })
    );
}

#[tokio::test]
async fn template_references_run_each_node_once_and_skip_unused_nodes() {
    let counter = MockNode::returning("counter", json!({ "v": 7 }));
    let counter_calls = counter.calls();
    let unused = MockNode::returning("unused", json!({}));
    let unused_calls = unused.calls();

    // `src` and `spare` are not wired to anything; `out` only reaches `src`
    // through placeholders.
    let flow = Flow::new(
        "refs",
        "refs",
        vec![
            NodeInstance::new("src", "counter", Value::Null),
            NodeInstance::new("spare", "unused", Value::Null),
            return_node("out", json!({ "first": "{{src.v}}", "again": "v={{src.v}}" })),
        ],
        vec![],
    );

    let outcome = executor(registry_with(Arc::new(MockTransport::new()), vec![counter, unused]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.terminal_node_id, "out");
    assert_eq!(outcome.result.output, json!({ "first": 7, "again": "v=7" }));
    assert_eq!(counter_calls.lock().len(), 1);
    assert_eq!(unused_calls.lock().len(), 0);
    assert!(!outcome.node_results.contains_key("spare"));
}

#[tokio::test]
async fn trigger_alias_resolves_to_trigger_input() {
    let flow = Flow::new(
        "alias",
        "alias",
        vec![return_node("out", json!({ "token": "{{trigger.token}}" }))],
        vec![],
    );

    let outcome = executor(registry_with(Arc::new(MockTransport::new()), vec![]))
        .run(Arc::new(flow), json!({ "token": "abc" }))
        .await
        .unwrap();

    assert_eq!(outcome.result.output, json!({ "token": "abc" }));
}

// ============================================================
// Failure handling
// ============================================================

#[tokio::test]
async fn upstream_failure_degrades_to_error_payload() {
    let boom = MockNode::failing("boom", NodeError::Runtime("something broke".into()));
    let flow = Flow::new(
        "failing",
        "failing",
        vec![
            NodeInstance::new("b", "boom", Value::Null),
            return_node("out", json!({ "why": "{{b.error}}", "missing": "[{{b.data.id}}]" })),
        ],
        vec![Connection::new("b", "out")],
    );

    let outcome = executor(registry_with(Arc::new(MockTransport::new()), vec![boom]))
        .run(Arc::new(flow), json!({}))
        .await
        .expect("a node failure does not abort the run");

    assert!(outcome.result.success);
    assert_eq!(outcome.result.output, json!({ "why": "something broke", "missing": "[]" }));

    let failed = &outcome.node_results["b"];
    assert!(!failed.success);
    assert_eq!(failed.error_kind, Some(NodeErrorKind::Runtime));
}

#[tokio::test]
async fn terminal_failure_is_the_visible_result() {
    let flow = Flow::new(
        "sandboxed",
        "sandboxed",
        vec![
            trigger("t"),
            NodeInstance::new("A", "transform", json!({ "code": "return process.env;" })),
        ],
        vec![Connection::new("t", "A")],
    );

    let outcome = executor(registry_with(Arc::new(MockTransport::new()), vec![]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.terminal_node_id, "A");
    assert!(!outcome.result.success);
    assert_eq!(outcome.result.error_kind, Some(NodeErrorKind::BlockedAccess));
    assert!(outcome.result.error.as_deref().unwrap().contains("process"));
}

#[tokio::test]
async fn invalid_parameters_fail_the_node_not_the_run() {
    let flow = Flow::new(
        "bad-params",
        "bad-params",
        vec![NodeInstance::new("B", "api_call", json!({ "method": "TRACE", "url": "x" }))],
        vec![],
    );
    let transport = Arc::new(MockTransport::new());

    let outcome = executor(registry_with(transport.clone(), vec![]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap();

    assert_eq!(outcome.result.error_kind, Some(NodeErrorKind::Validation));
    assert_eq!(transport.request_count(), 0);
}

// ============================================================
// Rejected flows
// ============================================================

#[tokio::test]
async fn connection_cycle_is_rejected_before_execution() {
    let echo = MockNode::echo("echo");
    let calls = echo.calls();
    let flow = Flow::new(
        "loop",
        "loop",
        vec![
            NodeInstance::new("x", "echo", Value::Null),
            NodeInstance::new("y", "echo", Value::Null),
        ],
        vec![Connection::new("x", "y"), Connection::new("y", "x")],
    );

    let err = executor(registry_with(Arc::new(MockTransport::new()), vec![echo]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected(_)));
    assert_eq!(calls.lock().len(), 0);
}

#[tokio::test]
async fn placeholder_cycle_is_detected_instead_of_recursing() {
    let flow = Flow::new(
        "ref-loop",
        "ref-loop",
        vec![
            return_node("a", json!({ "x": "{{b.x}}" })),
            return_node("b", json!({ "x": "{{a.x}}" })),
        ],
        vec![],
    )
    .with_terminal("a");

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        executor(registry_with(Arc::new(MockTransport::new()), vec![])).run(Arc::new(flow), json!({})),
    )
    .await
    .expect("cycle detection must not hang")
    .unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected(id) if id == "a"));
}

#[tokio::test]
async fn self_reference_is_a_cycle() {
    let flow = Flow::new("self", "self", vec![return_node("a", json!("{{a}}"))], vec![]);

    let err = executor(registry_with(Arc::new(MockTransport::new()), vec![]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::CycleDetected(_)));
}

#[tokio::test]
async fn deep_lookup_chains_are_bounded() {
    // n0 <- n1 <- n2 <- ... each returning the previous one's value.
    let nodes: Vec<NodeInstance> = (0..6)
        .map(|i| {
            let value = if i == 0 { json!("leaf") } else { json!(format!("{{{{n{}}}}}", i - 1)) };
            return_node(&format!("n{i}"), value)
        })
        .collect();
    let flow = Flow::new("deep", "deep", nodes, vec![]).with_terminal("n5");
    let registry = registry_with(Arc::new(MockTransport::new()), vec![]);

    let shallow = GraphExecutor::new(registry.clone(), ExecutorConfig { max_depth: 3 });
    let err = shallow.run(Arc::new(flow.clone()), json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::DepthExceeded { limit: 3, .. }));

    let outcome = executor(registry).run(Arc::new(flow), json!({})).await.unwrap();
    assert_eq!(outcome.result.output, json!("leaf"));
}

#[tokio::test]
async fn unregistered_type_is_rejected() {
    let flow = Flow::new("f", "f", vec![NodeInstance::new("a", "teleport", Value::Null)], vec![]);
    let err = executor(registry_with(Arc::new(MockTransport::new()), vec![]))
        .run(Arc::new(flow), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownNodeType { .. }));
}

// ============================================================
// Catalog snapshots
// ============================================================

fn versioned_flow(version: &str) -> Flow {
    Flow::new(
        "versioned",
        "versioned",
        vec![
            trigger("t"),
            NodeInstance::new("call", "api_call", json!({ "url": "https://api.example.test/slow" })),
            return_node("out", json!({ "version": version, "status": "{{call.status}}" })),
        ],
        vec![Connection::new("t", "call"), Connection::new("call", "out")],
    )
}

#[tokio::test]
async fn edits_during_a_run_are_not_observed() {
    let transport = Arc::new(MockTransport::json(200, json!({})).with_delay(Duration::from_millis(200)));
    let catalog = FlowCatalog::new(executor(registry_with(transport, vec![])));
    catalog.upsert(versioned_flow("v1"));

    let edit = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        catalog.upsert(versioned_flow("v2"));
    };
    let (outcome, _) = tokio::join!(catalog.invoke("versioned", json!({})), edit);

    let outcome = outcome.unwrap();
    assert_eq!(outcome.result.output, json!({ "version": "v1", "status": 200 }));

    let next = catalog.invoke("versioned", json!({})).await.unwrap();
    assert_eq!(next.result.output["version"], "v2");
}

#[tokio::test]
async fn unknown_flow_is_rejected() {
    let catalog = FlowCatalog::new(executor(registry_with(Arc::new(MockTransport::new()), vec![])));
    let err = catalog.invoke("nope", json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownFlow(id) if id == "nope"));
}
