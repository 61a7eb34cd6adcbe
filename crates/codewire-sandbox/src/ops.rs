//! deno_core op definitions for the sandbox.
//!
//! The `#[op2]` macro generates additional public items (v8 function
//! pointers, metadata structs) that cannot carry doc comments, so
//! `missing_docs` is suppressed at module level — the actual functions and
//! types are documented below.
#![allow(missing_docs)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use deno_core::op2;
use deno_core::OpState;
use deno_error::JsErrorBox;

use crate::HostFunction;

/// Host functions callable from sandbox code, keyed by binding name:
/// `"name"` for bare function globals, `"namespace.member"` for namespace
/// members. Built fresh for every execution.
pub struct HostFunctions(pub HashMap<String, Arc<dyn HostFunction>>);

/// Wrapper for the execution result envelope stored in OpState.
pub struct ExecutionResult(pub String);

/// Store the execution result envelope.
#[op2(fast)]
pub fn op_wire_set_result(state: &mut OpState, #[string] json: &str) {
    state.put(ExecutionResult(json.to_string()));
}

/// Dispatch a sandbox call to the host function registered under `binding`.
///
/// Arguments and results cross the boundary as JSON strings; the
/// (de)serialization round-trip is also the deep copy the isolation
/// contract requires. Host errors become catchable JS exceptions carrying
/// the original message.
#[op2(async)]
#[string]
pub async fn op_wire_host_call(
    op_state: Rc<RefCell<OpState>>,
    #[string] binding: String,
    #[string] args_json: String,
) -> Result<String, JsErrorBox> {
    tracing::debug!(binding = %binding, args_len = args_json.len(), "host call dispatched");

    let function = {
        let state = op_state.borrow();
        let table = state.borrow::<HostFunctions>();
        table.0.get(&binding).cloned()
    };
    let Some(function) = function else {
        return Err(JsErrorBox::generic(format!(
            "unknown host binding: {binding}"
        )));
    };

    let args: Vec<serde_json::Value> = serde_json::from_str(&args_json)
        .map_err(|e| JsErrorBox::generic(format!("invalid call arguments: {e}")))?;

    let result = function
        .invoke(args)
        .await
        .map_err(|e| JsErrorBox::generic(e.to_string()))?;

    serde_json::to_string(&result)
        .map_err(|e| JsErrorBox::generic(format!("result serialization failed: {e}")))
}

deno_core::extension!(wire_ext, ops = [op_wire_set_result, op_wire_host_call]);
