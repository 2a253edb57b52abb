//! Error types for polyglot.
//!
//! This module defines the error taxonomy shared by every layer:
//! - [`PolyglotError`]: All errors surfaced by the orchestrator, memory
//!   coordinator, bridge, pools and runtime adapters
//! - [`ExecutionError`]: Opaque failure produced by a runtime backend
//!
//! Callers can always tell apart "never started" ([`PolyglotError::is_not_started`]),
//! "ran and failed" ([`PolyglotError::is_execution`]), "cut short"
//! ([`PolyglotError::is_context_error`]) and "deliberately closed"
//! ([`PolyglotError::is_shutdown`]).

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = PolyglotError> = std::result::Result<T, E>;

/// Top-level polyglot errors.
#[derive(Error, Debug)]
pub enum PolyglotError {
    /// A runtime with the same name is already registered.
    #[error("Runtime already registered: {name}")]
    DuplicateRuntime {
        /// Name of the runtime.
        name: String,
    },

    /// No runtime is registered under the requested name.
    #[error("Runtime not found: {name}")]
    RuntimeNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// The component has not been (successfully) initialized, or is disabled.
    #[error("{component} is not initialized")]
    NotInitialized {
        /// The orchestrator or the runtime that is not ready.
        component: String,
    },

    /// The runtime adapter has been shut down.
    #[error("Runtime {name} is shut down")]
    RuntimeShutdown {
        /// Name of the runtime.
        name: String,
    },

    /// The worker has been shut down.
    #[error("Worker {worker_id} is shut down")]
    WorkerShutdown {
        /// Index of the worker inside its pool.
        worker_id: usize,
    },

    /// The orchestrator has been shut down.
    #[error("Orchestrator is shut down")]
    OrchestratorShutdown,

    /// A runtime was registered after the orchestrator was initialized.
    #[error("Orchestrator is already initialized")]
    AlreadyInitialized,

    /// A region with the same ID already exists.
    #[error("Region already exists: {id}")]
    DuplicateRegion {
        /// Region identifier.
        id: String,
    },

    /// No region exists under the requested ID.
    #[error("Region not found: {id}")]
    RegionNotFound {
        /// Region identifier.
        id: String,
    },

    /// The region still has active readers or a writer.
    #[error("Region {id} still has active users (readers: {readers}, writers: {writers})")]
    RegionInUse {
        /// Region identifier.
        id: String,
        /// Active readers.
        readers: usize,
        /// Active writers.
        writers: usize,
    },

    /// Write access could not be granted because the region is held.
    #[error("Write conflict on region {id} (readers: {readers}, writers: {writers})")]
    WriteConflict {
        /// Region identifier.
        id: String,
        /// Active readers at the time of the request.
        readers: usize,
        /// Active writers at the time of the request.
        writers: usize,
    },

    /// Allocating would exceed the shared memory budget.
    #[error("Memory limit exceeded: requested {requested} bytes, {usage}/{limit} in use")]
    MemoryLimitExceeded {
        /// Size of the rejected allocation.
        requested: u64,
        /// Bytes in use before the allocation.
        usage: u64,
        /// Configured budget.
        limit: u64,
    },

    /// A bridge function with the same name is already registered.
    #[error("Function already registered: {name}")]
    DuplicateFunction {
        /// Function name.
        name: String,
    },

    /// No bridge function is registered under the requested name.
    #[error("Function not found: {name}")]
    FunctionNotFound {
        /// Function name.
        name: String,
    },

    /// The caller's context was cancelled.
    #[error("Context canceled")]
    Canceled,

    /// The caller's context deadline expired.
    #[error("Context deadline exceeded")]
    DeadlineExceeded,

    /// The backend ran and failed.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A runtime failed to initialize.
    #[error("Failed to initialize {runtime}: {source}")]
    InitializationFailed {
        /// Name of the failing runtime.
        runtime: String,
        /// The underlying error.
        #[source]
        source: Box<PolyglotError>,
    },

    /// One or more components failed to shut down.
    #[error("Shutdown errors: {}", DisplayFailures(.failures))]
    ShutdownFailed {
        /// Every failure, in the order the components were shut down.
        failures: Vec<ComponentFailure>,
    },

    /// An argument failed the type check at the boundary.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// A single failure collected during a best-effort operation.
#[derive(Debug)]
pub struct ComponentFailure {
    /// Name of the component that failed.
    pub component: String,
    /// The error it returned.
    pub error: PolyglotError,
}

struct DisplayFailures<'a>(&'a [ComponentFailure]);

impl fmt::Display for DisplayFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.component, failure.error)?;
        }
        Ok(())
    }
}

/// Opaque error produced by a runtime backend.
///
/// The core wraps and forwards these without inspecting them.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ExecutionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutionError {
    /// Create an execution error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an execution error that wraps a backend error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The backend's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl PolyglotError {
    /// Create a new `DuplicateRuntime` error.
    pub fn duplicate_runtime(name: impl Into<String>) -> Self {
        Self::DuplicateRuntime { name: name.into() }
    }

    /// Create a new `RuntimeNotFound` error.
    pub fn runtime_not_found(name: impl Into<String>) -> Self {
        Self::RuntimeNotFound { name: name.into() }
    }

    /// Create a new `NotInitialized` error.
    pub fn not_initialized(component: impl Into<String>) -> Self {
        Self::NotInitialized {
            component: component.into(),
        }
    }

    /// Create a new `RuntimeShutdown` error.
    pub fn runtime_shutdown(name: impl Into<String>) -> Self {
        Self::RuntimeShutdown { name: name.into() }
    }

    /// Create a new `DuplicateRegion` error.
    pub fn duplicate_region(id: impl Into<String>) -> Self {
        Self::DuplicateRegion { id: id.into() }
    }

    /// Create a new `RegionNotFound` error.
    pub fn region_not_found(id: impl Into<String>) -> Self {
        Self::RegionNotFound { id: id.into() }
    }

    /// Create a new `DuplicateFunction` error.
    pub fn duplicate_function(name: impl Into<String>) -> Self {
        Self::DuplicateFunction { name: name.into() }
    }

    /// Create a new `FunctionNotFound` error.
    pub fn function_not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound { name: name.into() }
    }

    /// Create a new `Execution` error from a message.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::new(message))
    }

    /// Create a new `InitializationFailed` error.
    pub fn initialization_failed(runtime: impl Into<String>, source: PolyglotError) -> Self {
        Self::InitializationFailed {
            runtime: runtime.into(),
            source: Box::new(source),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the request was rejected before anything ran.
    pub fn is_not_started(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized { .. } | Self::RuntimeNotFound { .. } | Self::FunctionNotFound { .. }
        )
    }

    /// Returns `true` if the caller's context cut the request short.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }

    /// Returns `true` if the target was deliberately closed.
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            Self::RuntimeShutdown { .. } | Self::WorkerShutdown { .. } | Self::OrchestratorShutdown
        )
    }

    /// Returns `true` if a backend ran and failed.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns `true` if this error indicates a missing region or function.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RegionNotFound { .. } | Self::FunctionNotFound { .. } | Self::RuntimeNotFound { .. }
        )
    }
}
