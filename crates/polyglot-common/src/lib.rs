//! Common types, errors, and configuration for polyglot.
//!
//! This crate provides shared functionality used across the polyglot workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtimes and shared memory
//! - The dynamic [`Value`] type that crosses runtime boundaries

pub mod config;
pub mod config_file;
pub mod error;
pub mod value;

pub use config::{AppConfig, Config, LoggingConfig, MemoryConfig, RuntimeConfig};
pub use config_file::ConfigFileError;
pub use error::{ComponentFailure, ExecutionError, PolyglotError, Result};
pub use value::Value;
