//! Workers: exclusive owners of one backend execution context.
//!
//! A backend plugs into the pool machinery by implementing [`Engine`] for
//! its execution context (one interpreter state, one VM instance, ...).
//! [`Worker`] wraps exactly one engine and serializes access to it.

use parking_lot::Mutex;
use tracing::{debug, trace};

use polyglot_common::{ExecutionError, PolyglotError, Result, Value};

/// One backend specific execution context.
///
/// Engines are driven synchronously and never concurrently; they may block.
pub trait Engine: Send + 'static {
    /// Run a piece of code.
    fn execute(&mut self, code: &str, args: &[Value]) -> Result<Value, ExecutionError>;

    /// Invoke a function by name.
    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ExecutionError>;

    /// Release the underlying context. Called at most once.
    fn close(&mut self) {}
}

/// A single engine guarded by an exclusive lock.
///
/// Even if a worker is misused from several threads, the engine is never
/// driven concurrently. Once shut down, every call fails with
/// [`PolyglotError::WorkerShutdown`].
pub struct Worker<E> {
    id: usize,
    engine: Mutex<Option<E>>,
}

impl<E: Engine> Worker<E> {
    /// Wrap an engine.
    pub fn new(id: usize, engine: E) -> Self {
        Self {
            id,
            engine: Mutex::new(Some(engine)),
        }
    }

    /// Index of this worker inside its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run code on this worker's engine.
    pub fn execute(&self, code: &str, args: &[Value]) -> Result<Value> {
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(PolyglotError::WorkerShutdown {
            worker_id: self.id,
        })?;

        trace!(worker_id = self.id, "Worker executing code");
        Ok(engine.execute(code, args)?)
    }

    /// Call a function on this worker's engine.
    pub fn call(&self, function: &str, args: &[Value]) -> Result<Value> {
        let mut guard = self.engine.lock();
        let engine = guard.as_mut().ok_or(PolyglotError::WorkerShutdown {
            worker_id: self.id,
        })?;

        trace!(worker_id = self.id, function, "Worker calling function");
        Ok(engine.call(function, args)?)
    }

    /// Close the engine. Idempotent.
    ///
    /// Blocks until an in-flight call on this worker returns.
    pub fn shutdown(&self) {
        let mut guard = self.engine.lock();
        if let Some(mut engine) = guard.take() {
            engine.close();
            debug!(worker_id = self.id, "Worker shut down");
        }
    }

    /// Returns `true` once the worker has been shut down.
    pub fn is_shutdown(&self) -> bool {
        self.engine.lock().is_none()
    }
}

impl<E> std::fmt::Debug for Worker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingEngine {
        closed: Arc<AtomicUsize>,
    }

    impl Engine for CountingEngine {
        fn execute(&mut self, code: &str, _args: &[Value]) -> Result<Value, ExecutionError> {
            if code == "fail" {
                return Err(ExecutionError::new("syntax error"));
            }
            Ok(Value::from(format!("ran {code}")))
        }

        fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ExecutionError> {
            Ok(Value::from(format!("{function}/{}", args.len())))
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn worker() -> (Worker<CountingEngine>, Arc<AtomicUsize>) {
        let closed = Arc::new(AtomicUsize::new(0));
        let engine = CountingEngine {
            closed: closed.clone(),
        };
        (Worker::new(3, engine), closed)
    }

    #[test]
    fn test_execute_and_call() {
        let (worker, _) = worker();

        assert_eq!(worker.id(), 3);
        assert_eq!(worker.execute("x", &[]).unwrap(), Value::from("ran x"));
        assert_eq!(
            worker.call("f", &[Value::Int(1)]).unwrap(),
            Value::from("f/1")
        );
    }

    #[test]
    fn test_backend_error_is_wrapped() {
        let (worker, _) = worker();

        let err = worker.execute("fail", &[]).unwrap_err();
        assert!(err.is_execution());
        assert_eq!(err.to_string(), "Execution error: syntax error");
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (worker, closed) = worker();

        worker.shutdown();
        worker.shutdown();

        assert!(worker.is_shutdown());
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let err = worker.call("f", &[]).unwrap_err();
        assert!(matches!(err, PolyglotError::WorkerShutdown { worker_id: 3 }));
    }
}
