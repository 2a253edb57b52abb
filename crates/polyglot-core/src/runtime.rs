//! The runtime capability contract.
//!
//! Every language backend registered with the [`Orchestrator`](crate::Orchestrator)
//! implements [`Runtime`]. The core treats implementations opaquely: it only
//! drives their lifecycle and forwards calls.

use std::fmt;

use async_trait::async_trait;

use polyglot_common::{Result, RuntimeConfig, Value};

use crate::Context;

/// A pluggable language backend.
///
/// Implementations must follow the lifecycle
/// `Uninitialized -> Ready -> Shutdown`:
/// - `execute`/`call` are only valid while ready, and fail immediately
///   otherwise without touching any backend resources
/// - `shutdown` is idempotent
///
/// [`PooledRuntime`](crate::PooledRuntime) provides this contract generically
/// on top of a worker pool.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Prepare the runtime for execution.
    async fn initialize(&self, ctx: &Context, config: RuntimeConfig) -> Result<()>;

    /// Run a piece of guest code.
    async fn execute(&self, ctx: &Context, code: &str, args: &[Value]) -> Result<Value>;

    /// Invoke a guest function by name.
    async fn call(&self, ctx: &Context, function: &str, args: &[Value]) -> Result<Value>;

    /// Stop the runtime and release its resources.
    async fn shutdown(&self, ctx: &Context) -> Result<()>;

    /// The unique runtime identifier.
    fn name(&self) -> &str;

    /// The backend version.
    fn version(&self) -> &str;

    /// Current lifecycle state, for diagnostics.
    fn state(&self) -> RuntimeState {
        RuntimeState::Uninitialized
    }
}

/// Lifecycle state of a runtime adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Created, not yet initialized (or disabled by configuration).
    Uninitialized,
    /// Accepting `execute` and `call`.
    Ready,
    /// Shut down; terminal.
    Shutdown,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeState::Uninitialized => write!(f, "uninitialized"),
            RuntimeState::Ready => write!(f, "ready"),
            RuntimeState::Shutdown => write!(f, "shutdown"),
        }
    }
}
