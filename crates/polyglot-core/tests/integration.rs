//! Integration tests for polyglot-core.
//!
//! These tests drive the public API end to end:
//! - Orchestrator registration, dispatch and lifecycle
//! - Pooled runtimes: bounded concurrency and cancellation
//! - Shared memory regions and the bridge
//! - Several isolated orchestrators in one process

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use polyglot_common::value::arg_f64;
use polyglot_common::{Config, ExecutionError, PolyglotError, Result, RuntimeConfig, Value};
use polyglot_core::{
    Context, Engine, EngineFactory, MemoryType, Orchestrator, PooledRuntime, Runtime,
    RuntimeState,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Runtime that echoes its input, implemented directly on the trait.
struct MockRuntime;

#[async_trait]
impl Runtime for MockRuntime {
    async fn initialize(&self, _ctx: &Context, _config: RuntimeConfig) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: &Context, code: &str, _args: &[Value]) -> Result<Value> {
        Ok(Value::from(format!("executed: {code}")))
    }

    async fn call(&self, _ctx: &Context, function: &str, _args: &[Value]) -> Result<Value> {
        Ok(Value::from(format!("called: {function}")))
    }

    async fn shutdown(&self, _ctx: &Context) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// Shared counters observed by every [`SlowEngine`] of one runtime.
#[derive(Default)]
struct Gauge {
    invocations: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    closed: AtomicUsize,
}

/// Engine whose calls take a fixed time and report their concurrency.
struct SlowEngine {
    delay: Duration,
    gauge: Arc<Gauge>,
}

impl Engine for SlowEngine {
    fn execute(&mut self, code: &str, _args: &[Value]) -> Result<Value, ExecutionError> {
        self.gauge.invocations.fetch_add(1, Ordering::SeqCst);
        let now = self.gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);

        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Value::from(format!("executed: {code}")))
    }

    fn call(&mut self, function: &str, args: &[Value]) -> Result<Value, ExecutionError> {
        self.execute(function, args)
    }

    fn close(&mut self) {
        self.gauge.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct SlowFactory {
    delay: Duration,
    gauge: Arc<Gauge>,
}

impl EngineFactory for SlowFactory {
    type Engine = SlowEngine;

    fn create(&self, _id: usize, _config: &RuntimeConfig) -> Result<SlowEngine> {
        Ok(SlowEngine {
            delay: self.delay,
            gauge: self.gauge.clone(),
        })
    }
}

fn slow_runtime(name: &str, delay: Duration) -> (Arc<PooledRuntime<SlowFactory>>, Arc<Gauge>) {
    let gauge = Arc::new(Gauge::default());
    let factory = SlowFactory {
        delay,
        gauge: gauge.clone(),
    };
    (Arc::new(PooledRuntime::new(name, "1.0.0", factory)), gauge)
}

/// Wait until `counter` reaches `expected`, failing after two seconds.
async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected}, got {}",
        counter.load(Ordering::SeqCst)
    );
}

fn config_with(name: &str, workers: usize) -> Config {
    let mut config = Config::default();
    config.languages.insert(
        name.to_string(),
        RuntimeConfig::new(name, "1.0.0").with_max_concurrency(workers),
    );
    config
}

// ============================================================================
// Test: Dispatch
// ============================================================================

#[tokio::test]
async fn test_mock_dispatch() {
    let orch = Orchestrator::new(Config::default());
    let ctx = Context::background();

    orch.register_runtime(Arc::new(MockRuntime)).unwrap();
    orch.initialize(&ctx).await.unwrap();

    let out = orch.execute(&ctx, "mock", "x", &[]).await.unwrap();
    assert_eq!(out, Value::from("executed: x"));

    let out = orch.call(&ctx, "mock", "f", &[]).await.unwrap();
    assert_eq!(out, Value::from("called: f"));

    let err = orch
        .execute(&ctx, "unregistered", "x", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PolyglotError::RuntimeNotFound { .. }));
    assert!(err.is_not_started());

    orch.shutdown(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_runtimes_snapshot() {
    let orch = Orchestrator::new(Config::default());
    let (slow, _) = slow_runtime("slow", Duration::ZERO);

    orch.register_runtime(Arc::new(MockRuntime)).unwrap();
    orch.register_runtime(slow).unwrap();

    assert_eq!(orch.runtimes(), vec!["mock", "slow"]);
    assert_eq!(orch.runtime("slow").unwrap().version(), "1.0.0");
    assert!(orch.runtime("lua").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runtimes_snapshot_during_dispatch() {
    let (slow, gauge) = slow_runtime("slow", Duration::from_millis(20));
    let orch = Arc::new(Orchestrator::new(config_with("slow", 2)));
    orch.register_runtime(Arc::new(MockRuntime)).unwrap();
    orch.register_runtime(slow).unwrap();
    orch.initialize(&Context::background()).await.unwrap();

    let calls: Vec<_> = (0..6)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                let ctx = Context::background();
                if i % 2 == 0 {
                    orch.execute(&ctx, "slow", "x", &[]).await
                } else {
                    orch.call(&ctx, "slow", "f", &[]).await
                }
            })
        })
        .collect();

    // Snapshots taken while calls are in flight see the full registry.
    while gauge.invocations.load(Ordering::SeqCst) < 6 {
        assert_eq!(orch.runtimes(), vec!["mock", "slow"]);
        tokio::task::yield_now().await;
    }

    for call in calls {
        call.await.unwrap().unwrap();
    }
    assert_eq!(orch.runtimes(), vec!["mock", "slow"]);
}

// ============================================================================
// Test: Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_context_never_reaches_backend() {
    let (slow, gauge) = slow_runtime("slow", Duration::from_millis(10));
    let orch = Orchestrator::new(config_with("slow", 1));
    orch.register_runtime(slow).unwrap();
    orch.initialize(&Context::background()).await.unwrap();

    let ctx = Context::background();
    ctx.cancel();

    let err = orch.execute(&ctx, "slow", "x", &[]).await.unwrap_err();
    assert!(matches!(err, PolyglotError::Canceled));
    assert!(err.is_context_error());
    assert_eq!(gauge.invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deadline_cuts_call_short() {
    let (slow, _) = slow_runtime("slow", Duration::from_millis(300));
    let orch = Orchestrator::new(config_with("slow", 1));
    orch.register_runtime(slow).unwrap();
    orch.initialize(&Context::background()).await.unwrap();

    let ctx = Context::background().with_timeout(Duration::from_millis(20));
    let err = orch.execute(&ctx, "slow", "x", &[]).await.unwrap_err();
    assert!(matches!(err, PolyglotError::DeadlineExceeded));

    let metrics = orch.profiler().metrics("slow", "execute").unwrap();
    assert_eq!(metrics.error_count, 1);
}

// ============================================================================
// Test: Pool Bound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_concurrency() {
    let (slow, gauge) = slow_runtime("slow", Duration::from_millis(30));
    let orch = Arc::new(Orchestrator::new(config_with("slow", 2)));
    orch.register_runtime(slow.clone()).unwrap();
    orch.initialize(&Context::background()).await.unwrap();
    assert_eq!(slow.pool_size(), Some(2));

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let orch = orch.clone();
            tokio::spawn(async move {
                orch.execute(&Context::background(), "slow", &format!("job {i}"), &[])
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(gauge.invocations.load(Ordering::SeqCst), 10);
    assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(slow.available_workers(), Some(2));
}

// ============================================================================
// Test: Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (slow, _) = slow_runtime("slow", Duration::ZERO);
    let orch = Orchestrator::new(config_with("slow", 1));
    let ctx = Context::background();
    orch.register_runtime(slow.clone()).unwrap();
    orch.initialize(&ctx).await.unwrap();

    for _ in 0..3 {
        orch.shutdown(&ctx).await.unwrap();
        assert_eq!(orch.state(), RuntimeState::Shutdown);
        assert_eq!(slow.state(), RuntimeState::Shutdown);
    }

    let err = orch.call(&ctx, "slow", "f", &[]).await.unwrap_err();
    assert!(err.is_shutdown());
}

#[tokio::test]
async fn test_shutdown_with_cancelled_context_closes_engines() {
    let (slow, gauge) = slow_runtime("slow", Duration::ZERO);
    let orch = Orchestrator::new(config_with("slow", 3));
    orch.register_runtime(slow.clone()).unwrap();
    orch.initialize(&Context::background()).await.unwrap();

    let cancelled = Context::background();
    cancelled.cancel();

    let err = orch.shutdown(&cancelled).await.unwrap_err();
    match err {
        PolyglotError::ShutdownFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].component, "slow");
            assert!(matches!(failures[0].error, PolyglotError::Canceled));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orch.state(), RuntimeState::Shutdown);
    assert_eq!(slow.state(), RuntimeState::Shutdown);

    // Every engine is closed even though the caller stopped waiting.
    wait_for(&gauge.closed, 3).await;
    orch.shutdown(&Context::background()).await.unwrap();
}

#[tokio::test]
async fn test_disabled_runtime_is_not_started() {
    let (slow, gauge) = slow_runtime("slow", Duration::ZERO);
    let mut config = config_with("slow", 1);
    config.disable_runtime("slow");

    let orch = Orchestrator::new(config);
    let ctx = Context::background();
    orch.register_runtime(slow.clone()).unwrap();
    orch.initialize(&ctx).await.unwrap();

    assert_eq!(slow.state(), RuntimeState::Uninitialized);
    let err = orch.execute(&ctx, "slow", "x", &[]).await.unwrap_err();
    assert!(matches!(err, PolyglotError::NotInitialized { .. }));
    assert_eq!(gauge.invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_isolated_orchestrators_run_concurrently() {
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            tokio::spawn(async move {
                let (slow, gauge) = slow_runtime("slow", Duration::from_millis(5));
                let orch = Orchestrator::new(config_with("slow", 2));
                let ctx = Context::background();
                orch.register_runtime(slow).unwrap();
                orch.initialize(&ctx).await.unwrap();

                orch.memory()
                    .allocate("shared", 8, MemoryType::Bytes)
                    .unwrap();

                for n in 0..5 {
                    let out = orch
                        .execute(&ctx, "slow", &format!("{i}:{n}"), &[])
                        .await
                        .unwrap();
                    assert_eq!(out, Value::from(format!("executed: {i}:{n}")));
                }

                orch.shutdown(&ctx).await.unwrap();
                gauge.invocations.load(Ordering::SeqCst)
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), 5);
    }
}

// ============================================================================
// Test: Shared Memory
// ============================================================================

#[tokio::test]
async fn test_memory_round_trip() {
    let orch = Orchestrator::new(Config::default());
    let memory = orch.memory();

    let region = memory.allocate("r", 1024, MemoryType::Bytes).unwrap();
    region.write_at(0, b"hello").unwrap();

    let fetched = memory.get("r").unwrap();
    assert_eq!(fetched.read_at(0, 5).unwrap(), b"hello");
    assert_eq!(fetched.len(), 1024);

    memory.free("r").unwrap();
    let err = memory.get("r").unwrap_err();
    assert!(matches!(err, PolyglotError::RegionNotFound { .. }));
}

#[tokio::test]
async fn test_write_exclusivity() {
    let orch = Orchestrator::new(Config::default());
    let memory = orch.memory();
    memory.allocate("r", 64, MemoryType::Bytes).unwrap();

    memory.acquire_write("r").unwrap();
    let other = {
        let memory = memory.clone();
        tokio::spawn(async move { memory.acquire_write("r") })
    };
    let err = other.await.unwrap().unwrap_err();
    assert!(matches!(err, PolyglotError::WriteConflict { .. }));

    memory.release_write("r").unwrap();
    memory.acquire_write("r").unwrap();
    memory.release_write("r").unwrap();
}

// ============================================================================
// Test: Bridge
// ============================================================================

#[tokio::test]
async fn test_bridge_round_trip() {
    let orch = Orchestrator::new(Config::default());
    let bridge = orch.bridge_instance();
    let ctx = Context::background();

    bridge
        .register_sync("add", |_, args| {
            Ok(Value::Float(arg_f64(args, 0, "add")? + arg_f64(args, 1, "add")?))
        })
        .unwrap();

    let out = bridge
        .call(&ctx, "add", &[Value::Float(5.0), Value::Float(3.0)])
        .await
        .unwrap();
    assert_eq!(out, Value::Float(8.0));

    bridge.unregister("add").unwrap();
    let err = bridge.call(&ctx, "add", &[]).await.unwrap_err();
    assert!(matches!(err, PolyglotError::FunctionNotFound { .. }));
}
