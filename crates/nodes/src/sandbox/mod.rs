//! Sandboxed execution of user-authored transform code.
//!
//! Code runs in a fresh `boa_engine` context. Before user code runs, every
//! global outside [`SandboxConfig::allowed_globals`] is deleted, `console` is
//! replaced by no-op stubs, and the `constructor` slot of each function
//! prototype is swapped for a thrower so code cannot be synthesized from
//! strings.
//!
//! The interpreter has no way to be interrupted from outside, so by default
//! each run happens in its own `agentflow-sandbox` worker process (see
//! [`worker`]). When the wall-clock deadline fires the caller gets
//! [`SandboxError::Timeout`] and the process is killed and reaped before the
//! call returns. [`Isolation::Thread`] runs in-process instead; there an
//! abandoned worker thread only stops once it hits an interpreter limit.

pub mod error;
pub mod normalize;
pub mod worker;

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use boa_engine::error::JsNativeErrorKind;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsError, JsString, JsValue, Source};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub use error::SandboxError;
pub use normalize::{CodeShape, NormalizedCode};

use normalize::{INPUT_BINDING, RESULT_BINDING};
use worker::WorkerRequest;

/// Globals user code may touch.
pub const DEFAULT_ALLOWED_GLOBALS: &[&str] = &[
    "JSON",
    "Math",
    "Object",
    "Array",
    "String",
    "Number",
    "Boolean",
    "Date",
    "RegExp",
    "Map",
    "Set",
    "Symbol",
    "Error",
    "TypeError",
    "RangeError",
    "SyntaxError",
    "ReferenceError",
    "EvalError",
    "URIError",
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURIComponent",
    "decodeURIComponent",
    "encodeURI",
    "decodeURI",
    "undefined",
    "NaN",
    "Infinity",
    "console",
];

/// Where a sandbox run executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One worker process per run, killed at the deadline.
    #[default]
    Process,
    /// One worker thread per run. A timed-out thread is abandoned and runs
    /// until an interpreter limit stops it.
    Thread,
}

/// Resource limits for sandboxed code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock budget per execution, in milliseconds.
    pub timeout_ms: u64,
    /// Max source length in bytes.
    pub max_code_length: usize,
    /// Loop iterations a script may run in total, counted across all of its
    /// loops. Hitting it is a [`SandboxError::ResourceLimit`], not a timeout.
    pub loop_iteration_limit: u64,
    /// Max call depth. Hitting it is a [`SandboxError::ResourceLimit`].
    pub recursion_limit: usize,
    pub allowed_globals: Vec<String>,
    pub isolation: Isolation,
    /// Worker binary for [`Isolation::Process`]. When unset, the
    /// `AGENTFLOW_SANDBOX_WORKER` variable is consulted, then the directory of
    /// the running executable and its parent.
    pub worker_path: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_code_length: 100_000,
            loop_iteration_limit: 100_000_000,
            recursion_limit: 512,
            allowed_globals: DEFAULT_ALLOWED_GLOBALS.iter().map(|s| s.to_string()).collect(),
            isolation: Isolation::Process,
            worker_path: None,
        }
    }
}

/// A successful sandbox run.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    pub value: Value,
    pub duration: Duration,
}

/// Runs transform code under a [`SandboxConfig`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: Arc<SandboxConfig>,
    /// `None` means runs stay in-process.
    worker: Option<PathBuf>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let worker = match config.isolation {
            Isolation::Thread => None,
            Isolation::Process => {
                let found = locate_worker(&config);
                if found.is_none() {
                    warn!(
                        binary = worker::WORKER_BIN,
                        "sandbox worker binary not found, running scripts on in-process threads"
                    );
                }
                found
            }
        };
        Self {
            config: Arc::new(config),
            worker,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The worker binary runs are sent to, or `None` when they run in-process.
    pub fn worker_path(&self) -> Option<&Path> {
        self.worker.as_deref()
    }

    /// Run `code` against `input` with the configured deadline.
    pub async fn run(&self, code: &str, input: &Value) -> Result<SandboxOutcome, SandboxError> {
        self.run_with_timeout(code, input, Duration::from_millis(self.config.timeout_ms))
            .await
    }

    /// Run `code` against `input`, giving up after `timeout`.
    pub async fn run_with_timeout(
        &self,
        code: &str,
        input: &Value,
        timeout: Duration,
    ) -> Result<SandboxOutcome, SandboxError> {
        if code.len() > self.config.max_code_length {
            return Err(SandboxError::CodeTooLarge {
                max: self.config.max_code_length,
                actual: code.len(),
            });
        }

        let normalized = normalize::normalize(code);
        debug!(shape = ?normalized.shape, "normalized sandbox code");

        let started = Instant::now();
        let result = match &self.worker {
            Some(worker) => self.run_in_process(worker, normalized.script, input, timeout).await,
            None => self.run_in_thread(normalized.script, input, timeout).await,
        };
        result.map(|value| SandboxOutcome {
            value,
            duration: started.elapsed(),
        })
    }

    async fn run_in_process(
        &self,
        worker: &Path,
        script: String,
        input: &Value,
        timeout: Duration,
    ) -> Result<Value, SandboxError> {
        let request = serde_json::to_vec(&WorkerRequest {
            config: (*self.config).clone(),
            script,
            input: input.clone(),
        })
        .map_err(|e| SandboxError::Conversion(e.to_string()))?;

        let mut child = tokio::process::Command::new(worker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Worker(format!("cannot start {}: {e}", worker.display())))?;

        let mut stdin = child.stdin.take();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let exchange = async {
            if let Some(mut pipe) = stdin.take() {
                pipe.write_all(&request).await?;
                // Dropping the pipe here sends EOF.
            }
            let mut out = Vec::new();
            let mut err = Vec::new();
            if let (Some(o), Some(e)) = (stdout.as_mut(), stderr.as_mut()) {
                tokio::try_join!(o.read_to_end(&mut out), e.read_to_end(&mut err))?;
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, out, err))
        };
        let exchanged = tokio::time::timeout(timeout, exchange).await;

        match exchanged {
            Ok(Ok((status, out, err))) => decode_reply(status, &out, &err),
            Ok(Err(e)) => Err(SandboxError::Worker(e.to_string())),
            Err(_) => {
                let timeout_ms = millis(timeout);
                warn!(timeout_ms, pid = ?child.id(), "sandbox deadline exceeded, killing worker process");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill sandbox worker");
                }
                Err(SandboxError::Timeout { timeout_ms })
            }
        }
    }

    async fn run_in_thread(&self, script: String, input: &Value, timeout: Duration) -> Result<Value, SandboxError> {
        let config = Arc::clone(&self.config);
        let input = input.clone();
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("sandbox-worker".into())
            .spawn(move || {
                let result = evaluate(&config, &script, &input);
                // The receiver is gone when the deadline already fired.
                let _ = tx.send(result);
            })
            .map_err(|e| SandboxError::Worker(e.to_string()))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SandboxError::Worker("worker exited without a result".into())),
            Err(_) => {
                let timeout_ms = millis(timeout);
                warn!(timeout_ms, "sandbox deadline exceeded, abandoning worker thread");
                Err(SandboxError::Timeout { timeout_ms })
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn locate_worker(config: &SandboxConfig) -> Option<PathBuf> {
    if let Some(path) = &config.worker_path {
        return Some(path.clone());
    }
    if let Some(path) = std::env::var_os(worker::WORKER_ENV) {
        return Some(PathBuf::from(path));
    }
    // Test binaries live one level below the binaries in `target/<profile>/deps`.
    let exe = std::env::current_exe().ok()?;
    let file_name = format!("{}{}", worker::WORKER_BIN, std::env::consts::EXE_SUFFIX);
    exe.ancestors()
        .skip(1)
        .take(2)
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn decode_reply(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Result<Value, SandboxError> {
    match serde_json::from_slice::<Result<Value, SandboxError>>(stdout) {
        Ok(reply) => reply,
        Err(_) => Err(SandboxError::Worker(format!(
            "worker exited with {status}: {}",
            String::from_utf8_lossy(stderr).trim()
        ))),
    }
}

/// Script run before user code to strip the global object down to the
/// allow-list.
fn prelude(allowed_globals: &[String]) -> String {
    let allowed = serde_json::to_string(allowed_globals).unwrap_or_else(|_| "[]".into());
    format!(
        r#"
(function (global, allowed) {{
    var noop = function () {{}};
    global.console = {{ log: noop, info: noop, warn: noop, error: noop, debug: noop, trace: noop }};
    var blocked = function (name) {{
        return function () {{ throw new EvalError(name); }};
    }};
    [
        function () {{ return function () {{}}; }},
        function () {{ return function* () {{}}; }},
        function () {{ return async function () {{}}; }},
        function () {{ return async function* () {{}}; }}
    ].forEach(function (make) {{
        try {{
            Object.defineProperty(Object.getPrototypeOf(make()), "constructor", {{
                value: blocked("Function"),
                writable: false,
                enumerable: false,
                configurable: false
            }});
        }} catch (e) {{}}
    }});
    Object.getOwnPropertyNames(global).forEach(function (key) {{
        if (allowed.indexOf(key) === -1) {{
            try {{ delete global[key]; }} catch (e) {{}}
        }}
    }});
}})(this, {allowed});
"#
    )
}

/// Worker-side evaluation. Owns its interpreter context start to finish.
fn evaluate(config: &SandboxConfig, script: &str, input: &Value) -> Result<Value, SandboxError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(config.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(config.recursion_limit);

    context
        .eval(Source::from_bytes(prelude(&config.allowed_globals).as_bytes()))
        .map_err(|e| SandboxError::Worker(format!("failed to prepare globals: {e}")))?;

    let js_input = JsValue::from_json(input, &mut context).map_err(|e| SandboxError::Conversion(e.to_string()))?;
    context
        .register_global_property(JsString::from(INPUT_BINDING), js_input, Attribute::all())
        .map_err(|e| SandboxError::Worker(e.to_string()))?;

    context
        .eval(Source::from_bytes(script.as_bytes()))
        .map_err(|e| classify(e, &mut context))?;

    let result = context
        .global_object()
        .get(JsString::from(RESULT_BINDING), &mut context)
        .map_err(|e| classify(e, &mut context))?;

    if result.is_undefined() {
        return Ok(Value::Null);
    }
    result
        .to_json(&mut context)
        .map(integral_numbers)
        .map_err(|e| SandboxError::Conversion(e.to_string()))
}

/// JS numbers are all doubles; hand integral ones back as JSON integers,
/// the way `JSON.stringify` prints them.
fn integral_numbers(value: Value) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    match value {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < MAX_SAFE => Value::from(f as i64),
            _ => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(integral_numbers).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, integral_numbers(v))).collect()),
        other => other,
    }
}

/// Map an interpreter error onto the sandbox failure taxonomy.
fn classify(err: JsError, context: &mut Context) -> SandboxError {
    let native = match err.try_native(context) {
        Ok(native) => native,
        Err(_) => return SandboxError::RuntimeError(format!("Uncaught {err}")),
    };

    let message = native.message().to_string();
    match &native.kind {
        JsNativeErrorKind::Reference => match message.strip_suffix(" is not defined") {
            Some(identifier) => SandboxError::BlockedGlobalAccess {
                identifier: identifier.to_owned(),
            },
            None => SandboxError::RuntimeError(native.to_string()),
        },
        JsNativeErrorKind::Eval => SandboxError::BlockedGlobalAccess { identifier: message },
        JsNativeErrorKind::RuntimeLimit => SandboxError::ResourceLimit(message),
        _ => SandboxError::RuntimeError(native.to_string()),
    }
}
