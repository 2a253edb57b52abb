//! Generic pooled runtime adapter.
//!
//! [`PooledRuntime`] implements the [`Runtime`] contract once for every
//! backend: the backend only supplies an [`EngineFactory`] that creates one
//! [`Engine`] per worker.
//!
//! # Cancellation
//!
//! Every call acquires a worker, runs the engine on the blocking thread pool
//! and races that against the caller's [`Context`]. If the context finishes
//! first the caller gets the context error immediately. The backend call is
//! *not* interrupted: it keeps running on its worker, which only returns to
//! the pool once the backend returns. A cancelled call can therefore still
//! occupy a worker after the caller has moved on.
//!
//! ```text
//! caller ──► execute/call ──► Pool::acquire ──► spawn_blocking(engine)
//!    ▲                                                 │
//!    └──────── select!(ctx.done(), result) ◄───────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use polyglot_common::{PolyglotError, Result, RuntimeConfig, Value};

use crate::pool::Pool;
use crate::runtime::{Runtime, RuntimeState};
use crate::worker::{Engine, Worker};
use crate::Context;

/// Pool size used when the configuration asks for zero workers.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Creates the backend engines of a [`PooledRuntime`].
pub trait EngineFactory: Send + Sync + 'static {
    /// The engine type driven by each worker.
    type Engine: Engine;

    /// Create the engine for worker `id`.
    ///
    /// Runs on the blocking thread pool, so it may take as long as the
    /// backend needs to start (interpreter boot, compilation, ...).
    fn create(&self, id: usize, config: &RuntimeConfig) -> Result<Self::Engine>;
}

/// A [`Runtime`] backed by a fixed pool of engines.
pub struct PooledRuntime<F: EngineFactory> {
    name: String,
    version: String,
    factory: Arc<F>,
    state: RwLock<AdapterState<F::Engine>>,
    /// Serializes initialize and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
}

struct AdapterState<E> {
    phase: RuntimeState,
    pool: Option<Pool<E>>,
    config: Option<RuntimeConfig>,
}

impl<F: EngineFactory> PooledRuntime<F> {
    /// Create an uninitialized runtime.
    pub fn new(name: impl Into<String>, version: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            factory: Arc::new(factory),
            state: RwLock::new(AdapterState {
                phase: RuntimeState::Uninitialized,
                pool: None,
                config: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// The backend factory.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The configuration the runtime was initialized with.
    pub fn config(&self) -> Option<RuntimeConfig> {
        self.state.read().config.clone()
    }

    /// Number of workers, once initialized.
    pub fn pool_size(&self) -> Option<usize> {
        self.state.read().pool.as_ref().map(Pool::size)
    }

    /// Number of idle workers, once initialized.
    pub fn available_workers(&self) -> Option<usize> {
        self.state.read().pool.as_ref().map(Pool::available)
    }

    /// Fetch the pool if the runtime is ready, without touching it.
    fn ready_pool(&self) -> Result<(Pool<F::Engine>, Option<std::time::Duration>)> {
        let state = self.state.read();
        match (state.phase, &state.pool) {
            (RuntimeState::Ready, Some(pool)) => Ok((
                pool.clone(),
                state.config.as_ref().and_then(RuntimeConfig::timeout),
            )),
            (RuntimeState::Shutdown, _) => Err(PolyglotError::runtime_shutdown(&self.name)),
            _ => Err(PolyglotError::not_initialized(&self.name)),
        }
    }

    fn build_engines(factory: &F, size: usize, config: &RuntimeConfig) -> Result<Vec<F::Engine>> {
        let mut engines = Vec::with_capacity(size);
        for id in 0..size {
            match factory.create(id, config) {
                Ok(engine) => engines.push(engine),
                Err(err) => {
                    error!(runtime = %config.name, worker_id = id, error = %err, "Failed to create worker");
                    close_engines(engines);
                    return Err(err);
                }
            }
        }
        Ok(engines)
    }

    /// Run `job` on a pooled worker, racing it against `ctx`.
    async fn dispatch<J>(&self, ctx: &Context, job: J) -> Result<Value>
    where
        J: FnOnce(&Worker<F::Engine>) -> Result<Value> + Send + 'static,
    {
        let (pool, timeout) = self.ready_pool()?;
        let ctx = match timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };

        let result = ctx
            .run(async move {
                let worker = pool.acquire().await?;
                let handle = tokio::task::spawn_blocking(move || job(&*worker));
                handle.await.map_err(|e| {
                    PolyglotError::execution(format!("worker task failed: {e}"))
                })?
            })
            .await;

        if let Err(err) = &result {
            if err.is_context_error() {
                warn!(
                    runtime = %self.name,
                    error = %err,
                    "Call abandoned; its worker stays busy until the backend returns"
                );
            }
        }

        result
    }
}

fn close_engines<E: Engine>(engines: Vec<E>) {
    for mut engine in engines {
        engine.close();
    }
}

#[async_trait]
impl<F: EngineFactory> Runtime for PooledRuntime<F> {
    #[instrument(skip(self, ctx, config), fields(runtime = %self.name))]
    async fn initialize(&self, ctx: &Context, config: RuntimeConfig) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let phase = self.state.read().phase;
        match phase {
            RuntimeState::Shutdown => return Err(PolyglotError::runtime_shutdown(&self.name)),
            RuntimeState::Ready => {
                debug!("Runtime already initialized");
                return Ok(());
            }
            RuntimeState::Uninitialized => {}
        }

        if !config.enabled {
            info!("Runtime disabled by configuration");
            self.state.write().config = Some(config);
            return Ok(());
        }

        let size = match config.max_concurrency {
            0 => DEFAULT_POOL_SIZE,
            n => n,
        };

        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let factory = self.factory.clone();
        let build_config = config.clone();
        let mut build = tokio::task::spawn_blocking(move || {
            Self::build_engines(&factory, size, &build_config)
        });

        let joined = tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            joined = &mut build => Ok(joined),
        };

        let engines = match joined {
            Ok(joined) => joined
                .map_err(|e| PolyglotError::execution(format!("engine setup failed: {e}")))??,
            Err(err) => {
                // The engines are still being built; close them once they exist.
                let name = self.name.clone();
                tokio::spawn(async move {
                    if let Ok(Ok(engines)) = build.await {
                        let closed = engines.len();
                        if tokio::task::spawn_blocking(move || close_engines(engines))
                            .await
                            .is_ok()
                        {
                            debug!(runtime = %name, closed, "Closed engines of abandoned initialization");
                        }
                    }
                });
                return Err(err);
            }
        };

        let mut state = self.state.write();
        state.pool = Some(Pool::new(self.name.clone(), engines));
        state.config = Some(config);
        state.phase = RuntimeState::Ready;

        info!(workers = size, version = %self.version, "Runtime initialized");
        Ok(())
    }

    #[instrument(skip(self, ctx, code, args), fields(runtime = %self.name))]
    async fn execute(&self, ctx: &Context, code: &str, args: &[Value]) -> Result<Value> {
        let code = code.to_string();
        let args = args.to_vec();
        self.dispatch(ctx, move |worker| worker.execute(&code, &args))
            .await
    }

    #[instrument(skip(self, ctx, args), fields(runtime = %self.name))]
    async fn call(&self, ctx: &Context, function: &str, args: &[Value]) -> Result<Value> {
        let function = function.to_string();
        let args = args.to_vec();
        self.dispatch(ctx, move |worker| worker.call(&function, &args))
            .await
    }

    #[instrument(skip(self, ctx), fields(runtime = %self.name))]
    async fn shutdown(&self, ctx: &Context) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let pool = {
            let mut state = self.state.write();
            if state.phase == RuntimeState::Shutdown {
                return Ok(());
            }
            state.phase = RuntimeState::Shutdown;
            state.pool.take()
        };

        if let Some(pool) = pool {
            // Spawned before racing, so the pool closes even if ctx is done.
            let closing = tokio::task::spawn_blocking(move || pool.close());
            ctx.run(async move {
                closing
                    .await
                    .map_err(|e| PolyglotError::execution(format!("pool shutdown failed: {e}")))
            })
            .await?;
        }

        info!("Runtime shut down");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn state(&self) -> RuntimeState {
        self.state.read().phase
    }
}

impl<F: EngineFactory> std::fmt::Debug for PooledRuntime<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("PooledRuntime")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("state", &state.phase)
            .field("pool", &state.pool)
            .finish_non_exhaustive()
    }
}
