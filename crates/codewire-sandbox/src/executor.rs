//! Sandbox executor — creates fresh V8 isolates and runs agent-written code.
//!
//! Each execution gets a brand new runtime. No state leaks between calls.
//!
//! V8 isolates are `!Send`, so all JsRuntime operations run on a dedicated
//! thread with its own single-threaded tokio runtime. The public API is
//! fully async and `Send`-safe.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::SandboxError;
use crate::ops::{wire_ext, ExecutionResult, HostFunctions};
use crate::{Injected, NamespaceEntry};

/// Configuration for the sandbox executor.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Budget for one execution: the CPU watchdog and the event-loop drive
    /// both use it, so synchronous loops and stalled async code are capped
    /// alike.
    pub timeout: Duration,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Maximum size of agent code in bytes.
    pub max_code_size: usize,
    /// Maximum size of the JSON result envelope in bytes.
    pub max_output_size: usize,
    /// Maximum simultaneous isolates. Further calls queue rather than fail.
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_heap_size: 64 * 1024 * 1024, // 64 MB
            max_code_size: 64 * 1024,        // 64 KB
            max_output_size: 10 * 1024 * 1024, // 10 MB
            max_concurrent: 8,
        }
    }
}

/// The sandbox executor. Creates a fresh V8 isolate for each execution.
///
/// `Send + Sync` safe — all V8 operations are dispatched to a dedicated
/// thread internally. A semaphore bounds the number of simultaneous
/// isolates; waiters queue, so overlapping calls remain allowed.
pub struct SandboxExecutor {
    config: SandboxConfig,
    semaphore: Arc<Semaphore>,
}

impl SandboxExecutor {
    /// Create a new executor with the given configuration.
    pub fn new(config: SandboxConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self { config, semaphore }
    }

    /// The executor's configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run one piece of agent code with the given globals injected.
    ///
    /// `code` must be an expression evaluating to an async zero-argument
    /// function; it is wrapped as `(<code>)()` and its awaited return value
    /// becomes the result. Data globals are deep-copied in, function and
    /// namespace globals become async callables dispatching to their
    /// [`HostFunction`](crate::HostFunction)s, and the result is deep-copied
    /// back out before the isolate is torn down.
    pub async fn execute(
        &self,
        code: &str,
        globals: BTreeMap<String, Injected>,
    ) -> Result<Value, SandboxError> {
        tracing::info!(code_len = code.len(), globals = globals.len(), "execute: starting");

        if code.len() > self.config.max_code_size {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_size,
                actual: code.len(),
            });
        }

        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("executor semaphore closed")))?;

        let code = code.to_string();
        let config = self.config.clone();

        // V8 isolates are !Send — run everything on a dedicated thread
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    if tx.send(Err(SandboxError::Execution(e.into()))).is_err() {
                        tracing::warn!("sandbox result receiver dropped");
                    }
                    return;
                }
            };
            let result = rt.block_on(run_execution(&config, &code, globals));
            if tx.send(result).is_err() {
                tracing::warn!("sandbox result receiver dropped before result was sent");
            }
        });

        let result = rx
            .await
            .map_err(|_| SandboxError::Execution(anyhow::anyhow!("sandbox thread panicked")))?;

        match &result {
            Ok(_) => tracing::info!("execute: complete"),
            Err(e) => tracing::warn!(error = %e, "execute: failed"),
        }

        result
    }
}

/// Headroom granted after a heap-limit trip, so the termination exception
/// can unwind before V8 hits the hard wall and aborts the process.
const HEAP_GRACE_BYTES: usize = 2 * 1024 * 1024;

/// Trip record shared between [`on_near_heap_limit`] and the executing call.
struct HeapGuard {
    isolate: v8::IsolateHandle,
    tripped: AtomicBool,
}

impl HeapGuard {
    /// Box the guard and hook it into the isolate. The box must stay on the
    /// caller's frame until the callback has been unhooked again.
    fn install(runtime: &mut JsRuntime) -> Box<HeapGuard> {
        let guard = Box::new(HeapGuard {
            isolate: runtime.v8_isolate().thread_safe_handle(),
            tripped: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            on_near_heap_limit,
            guard.as_ref() as *const HeapGuard as *mut std::ffi::c_void,
        );
        guard
    }

    /// Detach the callback; no V8 activity can observe the guard afterwards.
    fn unhook(runtime: &mut JsRuntime) {
        runtime
            .v8_isolate()
            .remove_near_heap_limit_callback(on_near_heap_limit, 0);
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

extern "C" fn on_near_heap_limit(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` is the boxed HeapGuard from HeapGuard::install. V8 only
    // fires this callback while running JS on the isolate, and run_user_code
    // unhooks it before the box leaves that frame, so the reference is live
    // for every possible invocation. The guard's state is atomic, which
    // keeps the shared reference sound even for re-entrant calls.
    let guard = unsafe { &*data.cast::<HeapGuard>() };
    if guard
        .tripped
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        guard.isolate.terminate_execution();
    }
    current_heap_limit + HEAP_GRACE_BYTES
}

/// Kills synchronous runaway loops, which never yield to the event loop and
/// so never hit the wall-clock bound.
///
/// A helper thread sleeps on a condvar with the CPU budget as its deadline
/// and terminates V8 execution when the deadline passes. Disarming flips
/// the flag, wakes the condvar, and joins the thread, so the isolate handle
/// can never be used after the isolate is gone.
struct CpuWatchdog {
    disarmed: Arc<(Mutex<bool>, Condvar)>,
    fired: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpuWatchdog {
    fn arm(isolate: v8::IsolateHandle, budget: Duration) -> Self {
        let disarmed = Arc::new((Mutex::new(false), Condvar::new()));
        let fired = Arc::new(AtomicBool::new(false));
        let thread_disarmed = disarmed.clone();
        let thread_fired = fired.clone();
        let thread = std::thread::spawn(move || {
            let (flag, condvar) = &*thread_disarmed;
            let deadline = Instant::now() + budget;
            let mut disarmed = flag.lock().unwrap_or_else(|e| e.into_inner());
            while !*disarmed {
                let now = Instant::now();
                if now >= deadline {
                    thread_fired.store(true, Ordering::SeqCst);
                    isolate.terminate_execution();
                    return;
                }
                // Deadline-based wait: spurious wakeups just re-check.
                let (flag_guard, _) = condvar
                    .wait_timeout(disarmed, deadline - now)
                    .unwrap_or_else(|e| e.into_inner());
                disarmed = flag_guard;
            }
        });
        Self {
            disarmed,
            fired,
            thread: Some(thread),
        }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn disarm(&mut self) {
        let (flag, condvar) = &*self.disarmed;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        condvar.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Run one execution on the current thread (must be called from a dedicated
/// thread, not the main tokio runtime).
async fn run_execution(
    config: &SandboxConfig,
    code: &str,
    globals: BTreeMap<String, Injected>,
) -> Result<Value, SandboxError> {
    let bootstrap = build_bootstrap(&globals)?;
    let table = function_table(&globals);
    let mut runtime = create_runtime(config.max_heap_size, table);

    runtime
        .execute_script("[wire:bootstrap]", bootstrap)
        .map_err(|e| SandboxError::JsError {
            message: e.to_string(),
        })?;

    run_user_code(&mut runtime, code, config).await
}

/// Create a fresh JsRuntime with the wire extension loaded and V8 heap
/// limits set.
fn create_runtime(max_heap_size: usize, table: HostFunctions) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);

    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![wire_ext::init_ops()],
        create_params: Some(create_params),
        ..Default::default()
    });

    runtime.op_state().borrow_mut().put(table);
    runtime
}

/// Collect the host functions reachable from the given globals, keyed by
/// their sandbox binding names.
fn function_table(globals: &BTreeMap<String, Injected>) -> HostFunctions {
    let mut table = HashMap::new();
    for (name, injected) in globals {
        match injected {
            Injected::Function(function) => {
                table.insert(name.clone(), function.clone());
            }
            Injected::Namespace(members) => {
                for (member, entry) in members {
                    if let NamespaceEntry::Function(function) = entry {
                        table.insert(format!("{name}.{member}"), function.clone());
                    }
                }
            }
            Injected::Data(_) => {}
        }
    }
    HostFunctions(table)
}

/// True when `name` can be used verbatim as a JS global identifier.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Render a Rust string as a JS string literal.
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Build the bootstrap script: capture ops in a closure, materialise the
/// injected globals, silence console, and strip the escape hatches.
fn build_bootstrap(globals: &BTreeMap<String, Injected>) -> Result<String, SandboxError> {
    let mut bindings = String::new();
    for (name, injected) in globals {
        if !is_identifier(name) {
            return Err(SandboxError::InvalidGlobalName { name: name.clone() });
        }
        match injected {
            Injected::Data(value) => {
                let json = serde_json::to_string(value)?;
                bindings.push_str(&format!("                    globalThis.{name} = {json};\n"));
            }
            Injected::Function(_) => {
                bindings.push_str(&format!(
                    "                    globalThis.{name} = bind({});\n",
                    js_string(name)
                ));
            }
            Injected::Namespace(members) => {
                let mut props = Vec::new();
                for (member, entry) in members {
                    if !is_identifier(member) {
                        return Err(SandboxError::InvalidGlobalName {
                            name: format!("{name}.{member}"),
                        });
                    }
                    match entry {
                        NamespaceEntry::Data(value) => {
                            props.push(format!("{member}: {}", serde_json::to_string(value)?));
                        }
                        NamespaceEntry::Function(_) => {
                            props.push(format!(
                                "{member}: bind({})",
                                js_string(&format!("{name}.{member}"))
                            ));
                        }
                    }
                }
                bindings.push_str(&format!(
                    "                    globalThis.{name} = Object.freeze({{ {} }});\n",
                    props.join(", ")
                ));
            }
        }
    }

    Ok(format!(
        r#"
                ((ops) => {{
                    const hostCall = ops.op_wire_host_call;
                    const setResult = (json) => ops.op_wire_set_result(json);
                    globalThis.__wire = Object.freeze({{ setResult }});
                    const bind = (key) => async (...args) => {{
                        const resultJson = await hostCall(key, JSON.stringify(args));
                        return JSON.parse(resultJson);
                    }};
{bindings}
                    // A sandbox-reachable logger accumulating into host
                    // memory would bypass the heap cap.
                    const noop = () => {{}};
                    globalThis.console = Object.freeze({{ log: noop, warn: noop, error: noop }});

                    delete globalThis.Deno;

                    // Remove code generation primitives so prototype chain
                    // access cannot reach Function.
                    delete globalThis.eval;
                    const AsyncFunction = (async function(){{}}).constructor;
                    const GeneratorFunction = (function*(){{}}).constructor;
                    Object.defineProperty(Function.prototype, 'constructor', {{
                        value: undefined, configurable: false, writable: false
                    }});
                    Object.defineProperty(AsyncFunction.prototype, 'constructor', {{
                        value: undefined, configurable: false, writable: false
                    }});
                    Object.defineProperty(GeneratorFunction.prototype, 'constructor', {{
                        value: undefined, configurable: false, writable: false
                    }});
                }})(Deno.core.ops);
            "#
    ))
}

/// Wrap the agent's async function expression, execute it, and extract the
/// result envelope.
///
/// Three tripwires bound the run: a [`HeapGuard`] terminates execution near
/// the heap cap, a [`CpuWatchdog`] terminates synchronous loops at the CPU
/// budget, and the event-loop drive is wall-clock-bounded so stalls on host
/// I/O cannot hang the call.
async fn run_user_code(
    runtime: &mut JsRuntime,
    code: &str,
    config: &SandboxConfig,
) -> Result<Value, SandboxError> {
    let heap_guard = HeapGuard::install(runtime);
    let mut watchdog = CpuWatchdog::arm(
        runtime.v8_isolate().thread_safe_handle(),
        config.timeout,
    );

    // --- Execute agent code ---
    let wrapped = format!(
        r#"
        (async () => {{
            try {{
                const __fn = ({code});
                const __value = await __fn();
                if (__value !== undefined && JSON.stringify(__value) === undefined) {{
                    throw new Error("execution result is not JSON-serialisable");
                }}
                __wire.setResult(
                    JSON.stringify({{ ok: __value === undefined ? null : __value }})
                );
            }} catch (e) {{
                __wire.setResult(
                    JSON.stringify({{ error: (e && e.message) || String(e) }})
                );
            }}
        }})();
        "#
    );

    let mut wall_timed_out = false;
    let exec_error = match runtime.execute_script("[wire:run]", wrapped) {
        Ok(_) => {
            // Drive the event loop to resolve async operations, bounded
            // wall-clock.
            match tokio::time::timeout(
                config.timeout,
                runtime.run_event_loop(PollEventLoopOptions::default()),
            )
            .await
            {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => {
                    wall_timed_out = true;
                    None
                }
            }
        }
        Err(e) => Some(e.to_string()),
    };

    // Tear the tripwires down before reading the verdicts: disarm joins the
    // watchdog thread and unhook detaches the heap callback, so neither can
    // touch the isolate or the guard once this frame returns.
    watchdog.disarm();
    HeapGuard::unhook(runtime);

    // --- Check error causes in priority order ---
    if heap_guard.tripped() {
        return Err(SandboxError::HeapLimitExceeded {
            max_heap_bytes: config.max_heap_size,
        });
    }

    if watchdog.fired() || wall_timed_out {
        return Err(SandboxError::Timeout {
            timeout_ms: config.timeout.as_millis() as u64,
        });
    }

    if let Some(message) = exec_error {
        return Err(SandboxError::JsError { message });
    }

    // --- Extract the result envelope from OpState ---
    let envelope_json = {
        let state = runtime.op_state();
        let state = state.borrow();
        state
            .try_borrow::<ExecutionResult>()
            .map(|r| r.0.clone())
            .ok_or_else(|| SandboxError::JsError {
                message: "no result returned from sandbox execution".into(),
            })?
    };

    if envelope_json.len() > config.max_output_size {
        return Err(SandboxError::OutputTooLarge {
            max: config.max_output_size,
        });
    }

    let envelope: Value = serde_json::from_str(&envelope_json)?;

    if let Some(error) = envelope.get("error") {
        return Err(SandboxError::JsError {
            message: error.as_str().unwrap_or("unknown error").to_string(),
        });
    }

    Ok(envelope.get("ok").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostFunction;
    use serde_json::json;

    fn executor() -> SandboxExecutor {
        SandboxExecutor::new(SandboxConfig::default())
    }

    fn no_globals() -> BTreeMap<String, Injected> {
        BTreeMap::new()
    }

    fn data_global(name: &str, value: Value) -> BTreeMap<String, Injected> {
        let mut globals = BTreeMap::new();
        globals.insert(name.to_string(), Injected::Data(value));
        globals
    }

    /// Host function that echoes its arguments back.
    struct EchoFunction;

    #[async_trait::async_trait]
    impl HostFunction for EchoFunction {
        async fn invoke(&self, args: Vec<Value>) -> Result<Value, anyhow::Error> {
            Ok(json!({ "args": args, "status": "ok" }))
        }
    }

    /// Host function that always fails.
    struct FailingFunction;

    #[async_trait::async_trait]
    impl HostFunction for FailingFunction {
        async fn invoke(&self, _args: Vec<Value>) -> Result<Value, anyhow::Error> {
            Err(anyhow::anyhow!("host refused the call"))
        }
    }

    fn namespace_global(
        name: &str,
        member: &str,
        function: Arc<dyn HostFunction>,
    ) -> BTreeMap<String, Injected> {
        let mut members = BTreeMap::new();
        members.insert(member.to_string(), NamespaceEntry::Function(function));
        let mut globals = BTreeMap::new();
        globals.insert(name.to_string(), Injected::Namespace(members));
        globals
    }

    #[tokio::test]
    async fn data_global_is_queryable() {
        let exec = executor();
        let spec = json!({
            "paths": {
                "/pets": {"get": {"tags": ["pets"]}},
                "/users": {"get": {"tags": ["users"]}}
            }
        });

        let code = r#"async () => {
            return Object.keys(spec.paths).filter(p => p.includes("pet"));
        }"#;

        let result = exec.execute(code, data_global("spec", spec)).await.unwrap();
        assert_eq!(result, json!(["/pets"]));
    }

    #[tokio::test]
    async fn function_global_returns_copied_host_value() {
        let exec = executor();
        let mut globals = BTreeMap::new();
        globals.insert(
            "echo".to_string(),
            Injected::Function(Arc::new(EchoFunction)),
        );

        let code = r#"async () => {
            const result = await echo(1, "two", { three: 3 });
            return result.args;
        }"#;

        let result = exec.execute(code, globals).await.unwrap();
        assert_eq!(result, json!([1, "two", {"three": 3}]));
    }

    #[tokio::test]
    async fn namespace_member_is_callable() {
        let exec = executor();
        let globals = namespace_global("api", "request", Arc::new(EchoFunction));

        let code = r#"async () => {
            const result = await api.request({ method: "GET", path: "/pets" });
            return result.status;
        }"#;

        let result = exec.execute(code, globals).await.unwrap();
        assert_eq!(result, "ok");
    }

    #[tokio::test]
    async fn namespace_object_is_frozen() {
        let exec = executor();
        let globals = namespace_global("api", "request", Arc::new(EchoFunction));

        let code = r#"async () => Object.isFrozen(api)"#;

        let result = exec.execute(code, globals).await.unwrap();
        assert_eq!(result, true);
    }

    #[tokio::test]
    async fn namespace_data_members_are_injected() {
        let exec = executor();
        let mut members = BTreeMap::new();
        members.insert(
            "request".to_string(),
            NamespaceEntry::Function(Arc::new(EchoFunction) as Arc<dyn HostFunction>),
        );
        members.insert(
            "baseUrl".to_string(),
            NamespaceEntry::Data(json!("http://localhost")),
        );
        let mut globals = BTreeMap::new();
        globals.insert("api".to_string(), Injected::Namespace(members));

        let code = r#"async () => api.baseUrl"#;
        let result = exec.execute(code, globals).await.unwrap();
        assert_eq!(result, "http://localhost");
    }

    #[tokio::test]
    async fn host_errors_are_catchable_with_original_message() {
        let exec = executor();
        let globals = namespace_global("api", "request", Arc::new(FailingFunction));

        let code = r#"async () => {
            try {
                await api.request({});
                return "should not reach here";
            } catch (e) {
                return e.message;
            }
        }"#;

        let result = exec.execute(code, globals).await.unwrap();
        assert!(
            result.as_str().unwrap().contains("host refused the call"),
            "got: {result:?}"
        );
    }

    #[tokio::test]
    async fn uncaught_host_error_fails_the_execution() {
        let exec = executor();
        let globals = namespace_global("api", "request", Arc::new(FailingFunction));

        let code = r#"async () => {
            await api.request({});
            return "unreachable";
        }"#;

        let err = exec.execute(code, globals).await.unwrap_err();
        assert!(err.to_string().contains("host refused the call"), "{err}");
    }

    #[tokio::test]
    async fn js_errors_are_captured() {
        let exec = executor();
        let code = r#"async () => {
            throw new Error("intentional test error");
        }"#;

        let err = exec.execute(code, no_globals()).await.unwrap_err();
        assert!(matches!(err, SandboxError::JsError { .. }));
        assert!(err.to_string().contains("intentional test error"));
    }

    #[tokio::test]
    async fn parse_errors_are_captured() {
        let exec = executor();
        let err = exec
            .execute("async () => { this is not javascript", no_globals())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::JsError { .. }));
    }

    #[tokio::test]
    async fn non_function_expression_fails() {
        let exec = executor();
        let err = exec.execute("42", no_globals()).await.unwrap_err();
        assert!(matches!(err, SandboxError::JsError { .. }));
    }

    #[tokio::test]
    async fn undefined_result_becomes_null() {
        let exec = executor();
        let result = exec
            .execute("async () => {}", no_globals())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn non_serialisable_result_is_an_error() {
        let exec = executor();
        let err = exec
            .execute("async () => (() => {})", no_globals())
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("not JSON-serialisable"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn no_state_survives_between_executions() {
        let exec = executor();
        exec.execute(
            r#"async () => { globalThis.leak = "from first call"; return 1; }"#,
            no_globals(),
        )
        .await
        .unwrap();

        let result = exec
            .execute(r#"async () => typeof globalThis.leak"#, no_globals())
            .await
            .unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn console_is_silent_but_callable() {
        let exec = executor();
        let code = r#"async () => {
            console.log("into the void");
            console.warn("still nothing");
            console.error("nope");
            return "done";
        }"#;
        let result = exec.execute(code, no_globals()).await.unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn deno_global_is_not_accessible() {
        let exec = executor();
        let code = r#"async () => {
            const props = Object.getOwnPropertyNames(globalThis);
            return !props.includes("Deno");
        }"#;
        let result = exec.execute(code, no_globals()).await.unwrap();
        assert_eq!(result, true);
    }

    #[tokio::test]
    async fn eval_is_not_accessible() {
        let exec = executor();
        let result = exec
            .execute(r#"async () => typeof globalThis.eval"#, no_globals())
            .await
            .unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn function_constructor_is_blocked() {
        let exec = executor();
        let globals = namespace_global("api", "request", Arc::new(EchoFunction));
        // Try to reach Function via the prototype chain of an injected callable
        let code = r#"async () => String(api.request.constructor)"#;
        let result = exec.execute(code, globals).await.unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn async_function_constructor_is_blocked() {
        let exec = executor();
        let code = r#"async () => {
            const fn = async () => {};
            return String(fn.constructor);
        }"#;
        let result = exec.execute(code, no_globals()).await.unwrap();
        assert_eq!(result, "undefined");
    }

    #[tokio::test]
    async fn no_network_access() {
        let exec = executor();
        let code = r#"async () => {
            try {
                await fetch("https://example.com");
                return "ESCAPED";
            } catch (e) {
                return "CONTAINED";
            }
        }"#;
        let result = exec.execute(code, no_globals()).await.unwrap();
        assert_eq!(result, "CONTAINED");
    }

    #[tokio::test]
    async fn cpu_bound_infinite_loop_is_terminated() {
        let exec = SandboxExecutor::new(SandboxConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        });

        let code = r#"async () => { while (true) {} }"#;

        let start = std::time::Instant::now();
        let err = exec.execute(code, no_globals()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(
            matches!(err, SandboxError::Timeout { .. }),
            "expected timeout, got: {err:?}"
        );
        assert!(
            elapsed < Duration::from_secs(5),
            "should complete reasonably fast, took: {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn heap_limit_prevents_oom() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_heap_size: 10 * 1024 * 1024,  // 10 MB
            timeout: Duration::from_secs(30), // long timeout so the heap fills first
            ..Default::default()
        });

        let code = r#"async () => {
            const arr = [];
            while (true) {
                arr.push(new Array(100000).fill("x"));
            }
        }"#;

        let err = exec.execute(code, no_globals()).await.unwrap_err();
        assert!(
            matches!(
                err,
                SandboxError::HeapLimitExceeded { .. } | SandboxError::JsError { .. }
            ),
            "expected heap limit or JS error, got: {err:?}"
        );
    }

    #[tokio::test]
    async fn oversized_code_is_rejected() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_code_size: 128,
            ..Default::default()
        });
        let code = format!("async () => {{ return \"{}\"; }}", "x".repeat(256));
        let err = exec.execute(&code, no_globals()).await.unwrap_err();
        assert!(matches!(err, SandboxError::CodeTooLarge { .. }));
    }

    #[tokio::test]
    async fn oversized_output_is_rejected() {
        let exec = SandboxExecutor::new(SandboxConfig {
            max_output_size: 1024,
            ..Default::default()
        });
        let code = r#"async () => "y".repeat(10000)"#;
        let err = exec.execute(code, no_globals()).await.unwrap_err();
        assert!(matches!(err, SandboxError::OutputTooLarge { max: 1024 }));
    }

    #[tokio::test]
    async fn invalid_global_name_is_rejected() {
        let exec = executor();
        let err = exec
            .execute(
                "async () => 1",
                data_global("not a name", json!(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidGlobalName { .. }));
    }

    #[test]
    fn identifier_check() {
        assert!(is_identifier("api"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$dollar"));
        assert!(is_identifier("a1_b2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("with space"));
        assert!(!is_identifier("semi;colon"));
    }
}
