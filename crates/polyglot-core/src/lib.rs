//! Core of the polyglot runtime host.
//!
//! This crate hosts several language backends in one process behind a
//! uniform interface:
//! - [`Orchestrator`]: runtime registry and dispatch entry point
//! - [`MemoryCoordinator`]: named shared-memory regions with a
//!   many-readers / single-writer protocol
//! - [`Bridge`]: host functions callable from any runtime
//! - [`PooledRuntime`]: the generic worker-pool adapter every backend reuses
//! - [`Context`]: cancellation and deadlines for every call
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Orchestrator                        │
//! │  - Runtime registry (registration order)                │
//! │  - Lifecycle: Uninitialized → Ready → Shutdown          │
//! │  - Profiler                                             │
//! └─────────────────────────────────────────────────────────┘
//!        │                    │                    │
//!        ▼                    ▼                    ▼
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ dyn Runtime  │   │ MemoryCoordinator│   │    Bridge    │
//! │ PooledRuntime│   │ regions, budget  │   │ name → fn    │
//! └──────────────┘   └──────────────────┘   └──────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Pool<Engine> → Worker → Engine               │
//! │  (bounded concurrency, blocking thread pool)            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod bridge;
pub mod context;
pub mod memory;
pub mod orchestrator;
pub mod pool;
pub mod profiler;
pub mod runtime;
pub mod worker;

pub use adapter::{DEFAULT_POOL_SIZE, EngineFactory, PooledRuntime};
pub use bridge::{Bridge, BridgeFn};
pub use context::Context;
pub use memory::{
    MemoryCoordinator, MemoryRegion, MemoryStats, MemoryType, RegionReadGuard, RegionWriteGuard,
};
pub use orchestrator::Orchestrator;
pub use pool::{Pool, PooledWorker};
pub use profiler::{CallMetrics, Profiler};
pub use runtime::{Runtime, RuntimeState};
pub use worker::{Engine, Worker};
