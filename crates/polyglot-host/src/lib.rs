//! Host side of polyglot.
//!
//! This crate provides the pieces a host process plugs into the core:
//!
//! - [`native`]: a runtime backend serving host Rust functions
//! - [`functions`]: the standard bridge functions (`log`, `memory.*`)
//! - [`logging`]: capture of guest logs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use polyglot_common::{Config, Value};
//! use polyglot_core::{Context, Orchestrator};
//! use polyglot_host::{LogBuffer, NativeLibrary, native_runtime, register_all};
//!
//! # async fn run() -> polyglot_common::Result<()> {
//! let orchestrator = Orchestrator::new(Config::default());
//! register_all(
//!     &orchestrator.bridge_instance(),
//!     orchestrator.memory(),
//!     Arc::new(LogBuffer::new()),
//! )?;
//! orchestrator.register_runtime(Arc::new(native_runtime(NativeLibrary::with_builtins())))?;
//!
//! let ctx = Context::background();
//! orchestrator.initialize(&ctx).await?;
//! let sum = orchestrator
//!     .call(&ctx, "native", "add", &[Value::Int(2), Value::Int(3)])
//!     .await?;
//! assert_eq!(sum, Value::Int(5));
//! orchestrator.shutdown(&ctx).await
//! # }
//! ```

pub mod functions;
pub mod logging;
pub mod native;

pub use functions::register_all;
pub use logging::{LogBuffer, LogEntry, LogLevel};
pub use native::{NATIVE_RUNTIME, NativeFactory, NativeLibrary, NativeRuntime, native_runtime};
