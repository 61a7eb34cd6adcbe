#![warn(missing_docs)]

//! # codewire-openapi
//!
//! OpenAPI document processing for the codewire gateway.
//!
//! Agent code never sees the raw OpenAPI document — it sees a flattened view
//! where every `#/...` reference has been inlined, path templates carry the
//! server base path, and only the fields useful for discovery survive. The
//! processed document is injected into the sandbox as the `spec` global.
//!
//! All functions here are pure and operate on [`serde_json::Value`] trees.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use url::Url;

mod resolve;

pub use resolve::resolve_refs;

/// Default bound on how many `$ref`s may be open on one resolution branch.
pub const DEFAULT_MAX_REF_DEPTH: usize = 50;

/// HTTP methods that appear as operation keys on a path item.
const PATH_ITEM_METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// Operation fields copied through without reference resolution.
const VERBATIM_FIELDS: [&str; 3] = ["summary", "description", "tags"];

/// Operation fields that get their own reference-resolution pass.
const RESOLVED_FIELDS: [&str; 3] = ["parameters", "requestBody", "responses"];

/// Flatten an OpenAPI document into the `{ paths }` structure served to
/// agent search code.
///
/// For every path item, `fullPath` is the server base path plus the path
/// template. Only the methods in [`PATH_ITEM_METHODS`] are kept; non-HTTP
/// keys at path-item level are discarded. `summary`, `description` and
/// `tags` are copied verbatim while `parameters`, `requestBody` and
/// `responses` are resolved independently — each gets a fresh ancestor
/// chain, but the memo is shared across the whole call so repeated schemas
/// resolve once.
///
/// `info`, `servers` and `components` are omitted from the output: every
/// schema has already been inlined wherever it is used.
pub fn process_spec(doc: &Value, max_ref_depth: usize) -> Value {
    let base_path = extract_server_base_path(doc);
    let mut memo = HashMap::new();
    let mut paths = Map::new();

    if let Some(doc_paths) = doc.get("paths").and_then(Value::as_object) {
        for (path, item) in doc_paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            let full_path = format!("{base_path}{path}");
            let mut entry = Map::new();
            for method in PATH_ITEM_METHODS {
                let Some(operation) = item.get(method).and_then(Value::as_object) else {
                    continue;
                };
                let mut out = Map::new();
                for field in VERBATIM_FIELDS {
                    if let Some(value) = operation.get(field) {
                        out.insert(field.to_string(), value.clone());
                    }
                }
                for field in RESOLVED_FIELDS {
                    if let Some(value) = operation.get(field) {
                        out.insert(
                            field.to_string(),
                            resolve::resolve_with_memo(value, doc, max_ref_depth, &mut memo),
                        );
                    }
                }
                entry.insert(method.to_string(), Value::Object(out));
            }
            paths.insert(full_path, Value::Object(entry));
        }
    }

    tracing::debug!(paths = paths.len(), "processed OpenAPI document");
    json!({ "paths": Value::Object(paths) })
}

/// Unique operation tags across the document, sorted by descending
/// frequency. Ties keep first-seen document order (the sort is stable), but
/// callers should only rely on the frequency ordering.
pub fn extract_tags(doc: &Value) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    if let Some(paths) = doc.get("paths").and_then(Value::as_object) {
        for item in paths.values() {
            let Some(item) = item.as_object() else {
                continue;
            };
            for method in PATH_ITEM_METHODS {
                let tags = item
                    .get(method)
                    .and_then(|op| op.get("tags"))
                    .and_then(Value::as_array);
                let Some(tags) = tags else {
                    continue;
                };
                for tag in tags.iter().filter_map(Value::as_str) {
                    let count = counts.entry(tag.to_string()).or_insert(0);
                    if *count == 0 {
                        order.push(tag.to_string());
                    }
                    *count += 1;
                }
            }
        }
    }

    order.sort_by(|a, b| counts[b].cmp(&counts[a]));
    order
}

/// Pathname portion of `servers[0].url`, trailing slashes stripped.
///
/// Relative server URLs (`/api/v3`) are resolved against a placeholder
/// origin so their path comes out unchanged. Returns an empty string when
/// no server is declared or the URL has no path.
pub fn extract_server_base_path(doc: &Value) -> String {
    let raw = doc
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str);
    let Some(raw) = raw else {
        return String::new();
    };

    let parsed = Url::parse(raw).or_else(|_| {
        Url::parse("http://localhost")
            .expect("static base URL parses")
            .join(raw)
    });
    match parsed {
        Ok(url) => url.path().trim_end_matches('/').to_string(),
        Err(_) => String::new(),
    }
}
