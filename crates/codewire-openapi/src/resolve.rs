//! Recursive `$ref` resolution with cycle detection.
//!
//! Cycle detection is per branch: the set of refs currently open on the call
//! stack above a node, not a global "seen" set. A global set would mis-flag
//! the second of two sibling references to the same schema as circular. A
//! cross-branch memo keyed by ref string still shares the resolved value, so
//! repeated schemas are only walked once per document pass.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};

/// Keys never copied into resolved output and never followed as pointer
/// segments. Letting them through would let a hostile document smuggle
/// prototype-polluting keys into the sandbox.
const UNSAFE_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Replace every `#/...` reference in `node` with its target value from
/// `root`.
///
/// A ref that appears in its own ancestor chain becomes
/// `{ "$circular": ref }`; one that would open more than `max_ref_depth`
/// nested refs becomes `{ "$circular": ref, "$reason": "max depth exceeded" }`.
/// Pointer segments naming one of the unsafe keys yield
/// `{ "$ref": ref, "$error": "unsafe ref path" }`, and pointers whose target
/// does not exist yield `{ "$ref": ref, "$error": "target not found" }`.
pub fn resolve_refs(node: &Value, root: &Value, max_ref_depth: usize) -> Value {
    let mut memo = HashMap::new();
    resolve_with_memo(node, root, max_ref_depth, &mut memo)
}

/// Same as [`resolve_refs`] but sharing the caller's memo, so several
/// traversals over one document (e.g. per operation field) resolve each
/// schema once.
pub(crate) fn resolve_with_memo(
    node: &Value,
    root: &Value,
    max_ref_depth: usize,
    memo: &mut HashMap<String, Value>,
) -> Value {
    resolve_node(node, root, &HashSet::new(), max_ref_depth, memo)
}

fn resolve_node(
    node: &Value,
    root: &Value,
    ancestors: &HashSet<String>,
    max_ref_depth: usize,
    memo: &mut HashMap<String, Value>,
) -> Value {
    match node {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_node(item, root, ancestors, max_ref_depth, memo))
                .collect(),
        ),
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                return resolve_pointer(reference, root, ancestors, max_ref_depth, memo);
            }
            let mut out = Map::new();
            for (key, value) in map {
                if UNSAFE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                // Plain traversal shares the ancestor chain; only descending
                // through a ref extends it.
                out.insert(
                    key.clone(),
                    resolve_node(value, root, ancestors, max_ref_depth, memo),
                );
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn resolve_pointer(
    reference: &str,
    root: &Value,
    ancestors: &HashSet<String>,
    max_ref_depth: usize,
    memo: &mut HashMap<String, Value>,
) -> Value {
    if ancestors.contains(reference) {
        return json!({ "$circular": reference });
    }
    if ancestors.len() >= max_ref_depth {
        return json!({ "$circular": reference, "$reason": "max depth exceeded" });
    }
    if let Some(cached) = memo.get(reference) {
        return cached.clone();
    }

    let target = match lookup(reference, root) {
        Ok(target) => target,
        Err(marker) => return marker,
    };

    // Clone-and-extend so sibling refs resolved later do not inherit this
    // branch's ancestry.
    let mut branch = ancestors.clone();
    branch.insert(reference.to_string());
    let resolved = resolve_node(target, root, &branch, max_ref_depth, memo);
    memo.insert(reference.to_string(), resolved.clone());
    resolved
}

/// Walk a `#/a/b/c` pointer from the document root. Errors come back as the
/// marker object to splice into the output.
fn lookup<'a>(reference: &str, root: &'a Value) -> Result<&'a Value, Value> {
    let not_found = || json!({ "$ref": reference, "$error": "target not found" });

    let Some(pointer) = reference.strip_prefix("#/") else {
        return Err(not_found());
    };

    let mut current = root;
    for segment in pointer.split('/') {
        if UNSAFE_KEYS.contains(&segment) {
            return Err(json!({ "$ref": reference, "$error": "unsafe ref path" }));
        }
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => value,
                None => return Err(not_found()),
            },
            Value::Array(items) => {
                match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                    Some(value) => value,
                    None => return Err(not_found()),
                }
            }
            _ => return Err(not_found()),
        };
    }
    Ok(current)
}
