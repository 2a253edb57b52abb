//! Native runtime: host Rust functions exposed as a language backend.
//!
//! The "guest code" of this runtime is a [`NativeLibrary`] of named
//! functions. `call(fn)` dispatches by name and `execute(code)` treats the
//! trimmed code as a symbol name. It is served by the generic
//! [`PooledRuntime`], so it honours pool sizing, timeouts and cancellation
//! like any other backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use polyglot_common::value::{arg_f64, arg_str};
use polyglot_common::{ExecutionError, PolyglotError, Result, RuntimeConfig, Value};
use polyglot_core::{Engine, EngineFactory, PooledRuntime};

/// Name the native runtime registers under.
pub const NATIVE_RUNTIME: &str = "native";

/// A host function callable from the native runtime.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync>;

/// Named set of host functions.
#[derive(Clone, Default)]
pub struct NativeLibrary {
    functions: BTreeMap<String, NativeFn>,
}

impl NativeLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// A library with the built-ins `add`, `mul`, `concat`, `len` and `echo`.
    pub fn with_builtins() -> Self {
        Self::new()
            .with_function("add", add)
            .with_function("mul", mul)
            .with_function("concat", concat)
            .with_function("len", len)
            .with_function("echo", echo)
    }

    /// Add a function, replacing any previous one with the same name.
    #[must_use]
    pub fn with_function<F>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("functions", &self.names())
            .finish()
    }
}

/// One worker's view of the library.
pub struct NativeEngine {
    worker_id: usize,
    library: Arc<NativeLibrary>,
    invocations: Arc<AtomicU64>,
}

impl NativeEngine {
    fn invoke(&mut self, symbol: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        let function = self
            .library
            .get(symbol)
            .ok_or_else(|| ExecutionError::new(format!("undefined symbol: {symbol}")))?;

        self.invocations.fetch_add(1, Ordering::Relaxed);
        trace!(worker_id = self.worker_id, symbol, "Native invocation");
        function(args)
    }
}

impl Engine for NativeEngine {
    fn execute(&mut self, code: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        let symbol = code.trim();
        if symbol.is_empty() {
            return Err(ExecutionError::new("empty program"));
        }
        self.invoke(symbol, args)
    }

    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        self.invoke(function, args)
    }

    fn close(&mut self) {
        debug!(
            worker_id = self.worker_id,
            invocations = self.invocations.load(Ordering::Relaxed),
            "Native engine closed"
        );
    }
}

/// Creates [`NativeEngine`]s sharing one library.
pub struct NativeFactory {
    library: Arc<NativeLibrary>,
    counters: Mutex<Vec<Arc<AtomicU64>>>,
}

impl NativeFactory {
    pub fn new(library: NativeLibrary) -> Self {
        Self {
            library: Arc::new(library),
            counters: Mutex::new(Vec::new()),
        }
    }

    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    /// Invocation count of every engine created so far, by creation order.
    pub fn invocations(&self) -> Vec<u64> {
        self.counters
            .lock()
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total_invocations(&self) -> u64 {
        self.invocations().iter().sum()
    }
}

impl EngineFactory for NativeFactory {
    type Engine = NativeEngine;

    fn create(&self, id: usize, _config: &RuntimeConfig) -> Result<NativeEngine> {
        let invocations = Arc::new(AtomicU64::new(0));
        self.counters.lock().push(invocations.clone());

        Ok(NativeEngine {
            worker_id: id,
            library: self.library.clone(),
            invocations,
        })
    }
}

/// The native backend.
pub type NativeRuntime = PooledRuntime<NativeFactory>;

/// Build a native runtime named [`NATIVE_RUNTIME`] serving `library`.
pub fn native_runtime(library: NativeLibrary) -> NativeRuntime {
    PooledRuntime::new(
        NATIVE_RUNTIME,
        env!("CARGO_PKG_VERSION"),
        NativeFactory::new(library),
    )
}

fn invalid(err: PolyglotError) -> ExecutionError {
    ExecutionError::with_source(err.to_string(), err)
}

fn arithmetic(
    name: &str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, ExecutionError> {
    if args.len() != 2 {
        return Err(ExecutionError::new(format!(
            "{name}: expected 2 arguments, got {}",
            args.len()
        )));
    }

    if let (Value::Int(a), Value::Int(b)) = (&args[0], &args[1]) {
        return int_op(*a, *b)
            .map(Value::Int)
            .ok_or_else(|| ExecutionError::new(format!("{name}: integer overflow")));
    }

    let a = arg_f64(args, 0, name).map_err(invalid)?;
    let b = arg_f64(args, 1, name).map_err(invalid)?;
    Ok(Value::Float(float_op(a, b)))
}

fn add(args: &[Value]) -> Result<Value, ExecutionError> {
    arithmetic("add", args, i64::checked_add, |a, b| a + b)
}

fn mul(args: &[Value]) -> Result<Value, ExecutionError> {
    arithmetic("mul", args, i64::checked_mul, |a, b| a * b)
}

fn concat(args: &[Value]) -> Result<Value, ExecutionError> {
    let mut out = String::new();
    for index in 0..args.len() {
        out.push_str(arg_str(args, index, "concat").map_err(invalid)?);
    }
    Ok(Value::String(out))
}

fn len(args: &[Value]) -> Result<Value, ExecutionError> {
    let count = match args.first() {
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Bytes(b)) => b.len(),
        Some(Value::List(items)) => items.len(),
        Some(Value::Map(map)) => map.len(),
        Some(other) => {
            return Err(ExecutionError::new(format!(
                "len: argument 0 has no length, got {}",
                other.type_name()
            )));
        }
        None => return Err(ExecutionError::new("len: missing argument 0")),
    };

    i64::try_from(count)
        .map(Value::Int)
        .map_err(|_| ExecutionError::new("len: length out of range"))
}

fn echo(args: &[Value]) -> Result<Value, ExecutionError> {
    Ok(match args {
        [] => Value::Null,
        [single] => single.clone(),
        many => Value::List(many.to_vec()),
    })
}
