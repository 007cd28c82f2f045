//! API-call node: one outbound HTTP request with templated URL, headers
//! and body.
//!
//! "Success" means the round trip completed. A 404 or 500 still yields
//! `success: true`; callers branch on the `status` field.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::NodeError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::schema::{OutputSchema, SchemaField, SchemaType};
use crate::traits::{ExecutionContext, ExecutionResult, Node};

pub const TYPE_NAME: &str = "api_call";

/// One request header; `value` may contain placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiCallParams {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<HeaderEntry>,
    /// Milliseconds; falls back to the node's configured default.
    pub timeout: Option<u64>,
    /// Raw body template, sent for POST/PUT/PATCH only.
    pub body: Option<String>,
}

pub struct ApiCallNode {
    transport: Arc<dyn HttpTransport>,
    default_timeout_ms: u64,
}

impl ApiCallNode {
    pub fn new(transport: Arc<dyn HttpTransport>, default_timeout_ms: u64) -> Self {
        Self {
            transport,
            default_timeout_ms,
        }
    }

    /// Resolve every placeholder and assemble the outgoing request.
    async fn build_request(&self, ctx: &ExecutionContext<ApiCallParams>) -> Result<HttpRequest, NodeError> {
        let params = &ctx.parameters;

        let url = ctx.resolve(&params.url).await;
        if url.trim().is_empty() {
            return Err(NodeError::Unexpected(format!(
                "url '{}' resolved to an empty string",
                params.url
            )));
        }

        let mut headers = Vec::with_capacity(params.headers.len());
        for entry in &params.headers {
            if entry.key.trim().is_empty() {
                continue;
            }
            headers.push((entry.key.clone(), ctx.resolve(&entry.value).await));
        }

        let body = match &params.body {
            Some(body) if params.method.allows_body() => Some(ctx.resolve(body).await),
            _ => None,
        };

        Ok(HttpRequest {
            method: params.method,
            url,
            headers,
            body,
        })
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Structured parse for JSON content types, raw text otherwise.
fn parse_body(response: &HttpResponse) -> Value {
    let is_json = response
        .content_type()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if is_json {
        if let Ok(parsed) = serde_json::from_str(&response.body) {
            return parsed;
        }
    }
    Value::String(response.body.clone())
}

fn success_output(response: &HttpResponse, duration: Duration) -> Value {
    json!({
        "status": response.status,
        "statusText": response.status_text,
        "headers": response.headers,
        "data": parse_body(response),
        "durationMs": duration_ms(duration),
    })
}

fn failure_output(error: &NodeError, duration: Duration) -> Value {
    json!({
        "status": 0,
        "statusText": "",
        "headers": {},
        "data": null,
        "durationMs": duration_ms(duration),
        "error": error.to_string(),
        "errorType": error.kind().as_str(),
    })
}

#[async_trait]
impl Node for ApiCallNode {
    type Params = ApiCallParams;

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn output_schema(&self, _params: &ApiCallParams) -> OutputSchema {
        OutputSchema::new(vec![
            SchemaField::new("status", SchemaType::Number).describe("HTTP status code, 0 when no response"),
            SchemaField::new("statusText", SchemaType::String),
            SchemaField::new("headers", SchemaType::Object).describe("Response headers"),
            SchemaField::new("data", SchemaType::Any)
                .dynamic()
                .describe("Parsed JSON body, or raw text"),
            SchemaField::new("durationMs", SchemaType::Number),
            SchemaField::new("error", SchemaType::String).optional(),
            SchemaField::new("errorType", SchemaType::String).optional(),
        ])
    }

    async fn execute(&self, ctx: ExecutionContext<ApiCallParams>) -> ExecutionResult {
        let started = Instant::now();

        if ctx.parameters.url.trim().is_empty() {
            let err = NodeError::Validation("URL is required".into());
            return ExecutionResult::failure(&err, failure_output(&err, started.elapsed()));
        }

        let request = match self.build_request(&ctx).await {
            Ok(request) => request,
            Err(err) => {
                warn!(node_id = %ctx.node_id, "failed to prepare request: {err}");
                return ExecutionResult::failure(&err, failure_output(&err, started.elapsed()));
            }
        };

        let timeout_ms = ctx.parameters.timeout.unwrap_or(self.default_timeout_ms);
        let method = request.method;
        let url = request.url.clone();

        let sent = tokio::time::timeout(Duration::from_millis(timeout_ms), self.transport.send(request)).await;
        let elapsed = started.elapsed();

        let outcome = match sent {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                Err(NodeError::Timeout(format!("request timeout after {timeout_ms}ms")))
            }
            Ok(Err(err)) => Err(NodeError::from(err)),
        };

        match outcome {
            Ok(response) => {
                info!(
                    node_id = %ctx.node_id,
                    method = method.as_str(),
                    %url,
                    status = response.status,
                    duration_ms = duration_ms(elapsed),
                    "request completed"
                );
                ExecutionResult::success(success_output(&response, elapsed))
            }
            Err(err) => {
                warn!(
                    node_id = %ctx.node_id,
                    method = method.as_str(),
                    %url,
                    kind = %err.kind(),
                    "request failed: {err}"
                );
                ExecutionResult::failure(&err, failure_output(&err, elapsed))
            }
        }
    }
}
