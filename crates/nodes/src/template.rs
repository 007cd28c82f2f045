//! `{{nodeId.path}}` placeholder resolution.
//!
//! The matcher only accepts `{{ ident(.ident)* }}` where an identifier is
//! `[A-Za-z0-9_$-]+`. Anything else between braces is left as literal text.
//!
//! Resolution is lenient: a placeholder whose node lookup fails, or whose
//! path walks off the end of the value, renders as the empty string. One
//! broken reference never fails the whole template.

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::traits::NodeValueLookup;

/// Upper bound on the length of a single placeholder body.
const MAX_PATH_LEN: usize = 256;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// The referenced node id (first path segment).
    pub node_id: String,
    /// Property segments walked through the node's output.
    pub path: Vec<String>,
}

#[derive(Debug)]
enum Piece<'a> {
    Text(&'a str),
    Placeholder { node_id: &'a str, path: Vec<&'a str> },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'-'
}

fn skip_spaces(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn ident(src: &str, start: usize) -> Option<(&str, usize)> {
    let bytes = src.as_bytes();
    let mut end = start;
    while end < bytes.len() && is_ident_byte(bytes[end]) {
        end += 1;
    }
    (end > start).then(|| (&src[start..end], end))
}

/// Try to parse a placeholder starting at `start` (which points at `{{`).
///
/// Returns the identifiers and the byte offset just past the closing `}}`.
fn placeholder_at(src: &str, start: usize) -> Option<(Vec<&str>, usize)> {
    let bytes = src.as_bytes();
    let limit = (start + MAX_PATH_LEN).min(bytes.len());

    let mut pos = skip_spaces(bytes, start + 2);
    let (first, next) = ident(src, pos)?;
    let mut segments = vec![first];
    pos = next;

    while pos < limit && bytes[pos] == b'.' {
        let (segment, next) = ident(src, pos + 1)?;
        segments.push(segment);
        pos = next;
    }

    pos = skip_spaces(bytes, pos);
    if pos >= limit || !src[pos..].starts_with("}}") {
        return None;
    }
    Some((segments, pos + 2))
}

fn parse(src: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut cursor = 0;

    while let Some(offset) = src[cursor..].find("{{") {
        let open = cursor + offset;
        match placeholder_at(src, open) {
            Some((mut segments, end)) => {
                if open > text_start {
                    pieces.push(Piece::Text(&src[text_start..open]));
                }
                let node_id = segments.remove(0);
                pieces.push(Piece::Placeholder { node_id, path: segments });
                text_start = end;
                cursor = end;
            }
            // Not a placeholder: step one byte so `{{{a}}}` still finds `{{a}}`.
            None => cursor = open + 1,
        }
    }

    if text_start < src.len() {
        pieces.push(Piece::Text(&src[text_start..]));
    }
    pieces
}

/// All placeholders referenced by `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<Placeholder> {
    parse(template)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Placeholder { node_id, path } => Some(Placeholder {
                node_id: node_id.to_owned(),
                path: path.into_iter().map(str::to_owned).collect(),
            }),
            Piece::Text(_) => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Value walking and rendering
// ---------------------------------------------------------------------------

/// Walk `path` through `value`; `None` as soon as a segment is missing or
/// the current value cannot be indexed.
pub fn lookup_path<'v, S: AsRef<str>>(value: &'v Value, path: &[S]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, segment| {
        let segment = segment.as_ref();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

/// String form of a substituted value.
pub fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

async fn resolve_placeholder(node_id: &str, path: &[&str], lookup: &dyn NodeValueLookup) -> Option<Value> {
    match lookup.get_node_value(node_id).await {
        Ok(value) => lookup_path(&value, path).cloned(),
        Err(err) => {
            debug!(node_id, error = %err, "placeholder lookup failed, substituting empty string");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Public resolution entry points
// ---------------------------------------------------------------------------

/// Substitute every placeholder in `template`, left to right.
///
/// A template without placeholders comes back unchanged and `lookup` is
/// never invoked.
pub async fn resolve(template: &str, lookup: &dyn NodeValueLookup) -> String {
    let pieces = parse(template);
    if !pieces.iter().any(|p| matches!(p, Piece::Placeholder { .. })) {
        return template.to_owned();
    }

    let mut out = String::with_capacity(template.len());
    for piece in pieces {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Placeholder { node_id, path } => {
                let value = resolve_placeholder(node_id, &path, lookup).await;
                out.push_str(&render(value.as_ref()));
            }
        }
    }
    out
}

/// Resolve placeholders in every string leaf of a JSON document.
///
/// A string consisting of exactly one placeholder is replaced by the
/// referenced value itself (so objects stay objects); unresolvable
/// references in that position become `null`.
pub fn resolve_value<'a>(value: &'a Value, lookup: &'a dyn NodeValueLookup) -> BoxFuture<'a, Value> {
    Box::pin(async move {
        match value {
            Value::String(s) => {
                let pieces = parse(s);
                if let [Piece::Placeholder { node_id, path }] = pieces.as_slice() {
                    resolve_placeholder(node_id, path, lookup)
                        .await
                        .unwrap_or(Value::Null)
                } else {
                    Value::String(resolve(s, lookup).await)
                }
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(resolve_value(item, lookup).await);
                }
                Value::Array(resolved)
            }
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), resolve_value(item, lookup).await);
                }
                Value::Object(resolved)
            }
            other => other.clone(),
        }
    })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LookupError;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    /// Counts calls and always fails.
    struct FailingLookup {
        calls: AtomicUsize,
    }

    impl NodeValueLookup for FailingLookup {
        fn get_node_value<'a>(&'a self, node_id: &'a str) -> BoxFuture<'a, Result<Value, LookupError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Err(LookupError::Failed {
                    node_id: node_id.to_owned(),
                    message: "boom".into(),
                })
            })
        }
    }

    #[tokio::test]
    async fn nested_property_is_substituted() {
        let lookup = table(&[("a", json!({ "b": "v" }))]);
        assert_eq!(resolve("x={{a.b}}", &lookup).await, "x=v");
    }

    #[tokio::test]
    async fn numbers_and_bools_render_as_text() {
        let lookup = table(&[("a", json!({ "n": 42, "ok": true, "f": 1.5 }))]);
        assert_eq!(resolve("{{a.n}}/{{a.ok}}/{{a.f}}", &lookup).await, "42/true/1.5");
    }

    #[tokio::test]
    async fn missing_property_renders_empty() {
        let lookup = table(&[("a", json!({ "b": 1 }))]);
        assert_eq!(resolve("Bearer {{a.missing}}", &lookup).await, "Bearer ");
        assert_eq!(resolve("[{{a.b.c}}]", &lookup).await, "[]");
    }

    #[tokio::test]
    async fn failed_lookup_renders_empty_and_completes() {
        let lookup = FailingLookup { calls: AtomicUsize::new(0) };
        assert_eq!(resolve("pre {{a.b}} post {{c}}", &lookup).await, "pre  post ");
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn template_without_placeholders_skips_lookup() {
        let lookup = FailingLookup { calls: AtomicUsize::new(0) };
        let text = "plain {text} with { braces } and }} stray";
        assert_eq!(resolve(text, &lookup).await, text);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn array_segments_index_by_position() {
        let lookup = table(&[("list", json!({ "items": [{ "id": "first" }, { "id": "second" }] }))]);
        assert_eq!(resolve("{{list.items.1.id}}", &lookup).await, "second");
        assert_eq!(resolve("{{list.items.9.id}}", &lookup).await, "");
    }

    #[tokio::test]
    async fn objects_render_as_json() {
        let lookup = table(&[("a", json!({ "obj": { "k": 1 } }))]);
        assert_eq!(resolve("{{a.obj}}", &lookup).await, r#"{"k":1}"#);
    }

    #[tokio::test]
    async fn whitespace_inside_braces_is_tolerated() {
        let lookup = table(&[("trigger", json!({ "token": "abc" }))]);
        assert_eq!(resolve("{{ trigger.token }}", &lookup).await, "abc");
    }

    #[tokio::test]
    async fn malformed_placeholders_stay_literal() {
        let lookup = table(&[("a", json!({ "b": "v" }))]);
        assert_eq!(resolve("{{a..b}} {{ }} {{a b}}", &lookup).await, "{{a..b}} {{ }} {{a b}}");
        assert_eq!(resolve("{{{a.b}}}", &lookup).await, "{v}");
    }

    #[tokio::test]
    async fn multiple_placeholders_resolve_in_order() {
        let lookup = table(&[("a", json!({ "x": 1 })), ("b", json!({ "y": 2 }))]);
        assert_eq!(resolve("{{b.y}}-{{a.x}}-{{b.y}}", &lookup).await, "2-1-2");
    }

    #[test]
    fn placeholders_are_listed_in_order() {
        let found = placeholders("{{A.x}} and {{trigger.token.value}} and {{bad..}}");
        assert_eq!(
            found,
            vec![
                Placeholder { node_id: "A".into(), path: vec!["x".into()] },
                Placeholder {
                    node_id: "trigger".into(),
                    path: vec!["token".into(), "value".into()],
                },
            ]
        );
    }

    #[tokio::test]
    async fn padded_placeholder_renders_as_text() {
        let lookup = table(&[("a", json!({ "obj": { "k": 1 }, "n": 3 }))]);
        let doc = json!({ "padded": " {{a.obj}} ", "num": "{{a.n}} " });
        let resolved = resolve_value(&doc, &lookup).await;
        assert_eq!(resolved, json!({ "padded": " {\"k\":1} ", "num": "3 " }));
    }

    #[tokio::test]
    async fn resolve_value_keeps_types_for_whole_placeholders() {
        let lookup = table(&[("a", json!({ "obj": { "k": 1 }, "n": 3 }))]);
        let doc = json!({
            "whole": "{{a.obj}}",
            "mixed": "n={{a.n}}",
            "missing": "{{a.nope}}",
            "list": ["{{a.n}}", 7],
        });
        let resolved = resolve_value(&doc, &lookup).await;
        assert_eq!(
            resolved,
            json!({
                "whole": { "k": 1 },
                "mixed": "n=3",
                "missing": null,
                "list": [3, 7],
            })
        );
    }
}
