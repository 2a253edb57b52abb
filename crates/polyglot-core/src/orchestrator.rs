//! Multi-runtime dispatch.
//!
//! The [`Orchestrator`] owns the runtime registry together with one
//! [`MemoryCoordinator`], one [`Bridge`] and one [`Profiler`]. It is the
//! single entry point application code uses to initialize, dispatch to and
//! shut down the whole system.
//!
//! Lifecycle checks happen before any runtime is touched, so a rejected
//! call never has side effects:
//!
//! ```text
//! execute/call ──► name registered? ──► orchestrator ready? ──► runtime
//!                     │ no                 │ no
//!                     ▼                    ▼
//!               RuntimeNotFound     NotInitialized / OrchestratorShutdown
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use polyglot_common::{ComponentFailure, Config, PolyglotError, Result, RuntimeConfig, Value};

use crate::memory::MemoryCoordinator;
use crate::runtime::{Runtime, RuntimeState};
use crate::{Bridge, Context, Profiler};

/// Name used for orchestrator level lifecycle errors.
const COMPONENT: &str = "orchestrator";

#[derive(Default)]
struct Registry {
    /// Registration order, used for initialize and shutdown.
    order: Vec<String>,
    by_name: HashMap<String, Arc<dyn Runtime>>,
}

impl Registry {
    fn snapshot(&self) -> Vec<Arc<dyn Runtime>> {
        self.order
            .iter()
            .filter_map(|name| self.by_name.get(name).cloned())
            .collect()
    }
}

/// Registry and router for language runtimes.
///
/// Each orchestrator is independent; several can live in one process.
pub struct Orchestrator {
    config: Config,
    registry: RwLock<Registry>,
    phase: RwLock<RuntimeState>,
    memory: Arc<MemoryCoordinator>,
    bridge: Arc<Bridge>,
    profiler: Arc<Profiler>,
    /// Serializes initialize and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    /// Create an empty orchestrator.
    ///
    /// The configuration is used as given; call [`Config::validate`] first
    /// when it comes from an untrusted source.
    pub fn new(config: Config) -> Self {
        Self {
            memory: Arc::new(MemoryCoordinator::new(config.memory.clone())),
            bridge: Arc::new(Bridge::new()),
            profiler: Arc::new(Profiler::new()),
            registry: RwLock::new(Registry::default()),
            phase: RwLock::new(RuntimeState::Uninitialized),
            lifecycle: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Share an existing bridge instead of the orchestrator's own.
    #[must_use]
    pub fn with_bridge(mut self, bridge: Arc<Bridge>) -> Self {
        self.bridge = bridge;
        self
    }

    /// Add a runtime under its own name. The runtime is not initialized here.
    ///
    /// # Errors
    ///
    /// [`PolyglotError::DuplicateRuntime`] if the name is taken,
    /// [`PolyglotError::AlreadyInitialized`] once [`initialize`](Self::initialize)
    /// has succeeded, and [`PolyglotError::OrchestratorShutdown`] after shutdown.
    pub fn register_runtime(&self, runtime: Arc<dyn Runtime>) -> Result<()> {
        let phase = *self.phase.read();
        match phase {
            RuntimeState::Shutdown => return Err(PolyglotError::OrchestratorShutdown),
            RuntimeState::Ready => return Err(PolyglotError::AlreadyInitialized),
            RuntimeState::Uninitialized => {}
        }

        let name = runtime.name().to_string();
        let mut registry = self.registry.write();
        if registry.by_name.contains_key(&name) {
            return Err(PolyglotError::duplicate_runtime(name));
        }

        info!(runtime = %name, version = runtime.version(), "Runtime registered");
        registry.order.push(name.clone());
        registry.by_name.insert(name, runtime);
        Ok(())
    }

    /// Initialize every registered runtime, in registration order.
    ///
    /// Fail-fast: the first failure is returned as
    /// [`PolyglotError::InitializationFailed`] and the remaining runtimes are
    /// skipped. Runtimes initialized before the failure stay initialized;
    /// call [`shutdown`](Self::shutdown) to clean them up.
    #[instrument(skip(self, ctx))]
    pub async fn initialize(&self, ctx: &Context) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let phase = *self.phase.read();
        match phase {
            RuntimeState::Shutdown => return Err(PolyglotError::OrchestratorShutdown),
            RuntimeState::Ready => {
                debug!("Orchestrator already initialized");
                return Ok(());
            }
            RuntimeState::Uninitialized => {}
        }

        let runtimes = self.registry.read().snapshot();
        for runtime in &runtimes {
            let name = runtime.name();
            let config = self
                .config
                .runtime_config(name)
                .unwrap_or_else(|| RuntimeConfig::new(name, runtime.version()));

            if let Err(err) = runtime.initialize(ctx, config).await {
                error!(runtime = name, error = %err, "Runtime failed to initialize");
                return Err(PolyglotError::initialization_failed(name, err));
            }
        }

        *self.phase.write() = RuntimeState::Ready;
        self.memory.start_maintenance();

        info!(runtimes = runtimes.len(), "Orchestrator initialized");
        Ok(())
    }

    /// Run code in a runtime.
    #[instrument(skip(self, ctx, code, args), fields(request_id = %Uuid::new_v4()))]
    pub async fn execute(
        &self,
        ctx: &Context,
        runtime: &str,
        code: &str,
        args: &[Value],
    ) -> Result<Value> {
        let target = self.dispatch_target(runtime)?;
        debug!(args = args.len(), "Dispatching execute");

        self.profiler
            .track_call(runtime, "execute", target.execute(ctx, code, args))
            .await
    }

    /// Call a function in a runtime.
    #[instrument(skip(self, ctx, args), fields(request_id = %Uuid::new_v4()))]
    pub async fn call(
        &self,
        ctx: &Context,
        runtime: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        let target = self.dispatch_target(runtime)?;
        debug!(args = args.len(), "Dispatching call");

        self.profiler
            .track_call(runtime, function, target.call(ctx, function, args))
            .await
    }

    fn dispatch_target(&self, name: &str) -> Result<Arc<dyn Runtime>> {
        let runtime = self
            .registry
            .read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| PolyglotError::runtime_not_found(name))?;

        match *self.phase.read() {
            RuntimeState::Ready => Ok(runtime),
            RuntimeState::Uninitialized => Err(PolyglotError::not_initialized(COMPONENT)),
            RuntimeState::Shutdown => Err(PolyglotError::OrchestratorShutdown),
        }
    }

    /// Shut down every runtime, then the memory coordinator.
    ///
    /// Best-effort: every runtime is attempted and failures are collected
    /// into [`PolyglotError::ShutdownFailed`]. A second call is a no-op.
    #[instrument(skip(self, ctx))]
    pub async fn shutdown(&self, ctx: &Context) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut phase = self.phase.write();
            if *phase == RuntimeState::Shutdown {
                return Ok(());
            }
            *phase = RuntimeState::Shutdown;
        }

        let runtimes = self.registry.read().snapshot();
        let mut failures = Vec::new();
        for runtime in &runtimes {
            if let Err(err) = runtime.shutdown(ctx).await {
                warn!(runtime = runtime.name(), error = %err, "Runtime failed to shut down");
                failures.push(ComponentFailure {
                    component: runtime.name().to_string(),
                    error: err,
                });
            }
        }

        self.memory.shutdown();

        if failures.is_empty() {
            info!(runtimes = runtimes.len(), "Orchestrator shut down");
            Ok(())
        } else {
            Err(PolyglotError::ShutdownFailed { failures })
        }
    }

    /// Names of the registered runtimes, in registration order.
    pub fn runtimes(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    /// Look up a registered runtime.
    pub fn runtime(&self, name: &str) -> Option<Arc<dyn Runtime>> {
        self.registry.read().by_name.get(name).cloned()
    }

    /// The shared memory coordinator.
    pub fn memory(&self) -> Arc<MemoryCoordinator> {
        self.memory.clone()
    }

    /// The cross-language function bridge.
    pub fn bridge_instance(&self) -> Arc<Bridge> {
        self.bridge.clone()
    }

    pub fn profiler(&self) -> Arc<Profiler> {
        self.profiler.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> RuntimeState {
        *self.phase.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("app", &self.config.app.name)
            .field("state", &*self.phase.read())
            .field("runtimes", &self.registry.read().order)
            .field("memory", &self.memory)
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}
