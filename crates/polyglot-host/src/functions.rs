//! Standard host functions for the bridge.
//!
//! This module registers the functions every runtime can call:
//! - `log(level, message)`
//! - `memory.read(id, offset?, len?)`
//! - `memory.write(id, offset, data)`
//! - `memory.size(id)`
//!
//! Memory functions follow the coordinator's reader/writer protocol, so a
//! write while another party holds the region fails with `WriteConflict`.

use std::sync::Arc;

use tracing::debug;

use polyglot_common::value::{arg_bytes, arg_i64, arg_str};
use polyglot_common::{PolyglotError, Result, Value};
use polyglot_core::{Bridge, MemoryCoordinator};

use crate::logging::{LogBuffer, level_from_value};

/// Register all standard host functions on a bridge.
///
/// # Errors
///
/// Returns `DuplicateFunction` if any of the names is already taken.
pub fn register_all(
    bridge: &Bridge,
    memory: Arc<MemoryCoordinator>,
    logs: Arc<LogBuffer>,
) -> Result<()> {
    register_logging(bridge, logs)?;
    register_memory(bridge, memory)?;
    Ok(())
}

/// Register `log(level, message)`.
///
/// The level is either numeric (0=debug, 1=info, 2=warn, 3=error) or its
/// name. Returns null.
pub fn register_logging(bridge: &Bridge, logs: Arc<LogBuffer>) -> Result<()> {
    bridge.register_sync("log", move |_ctx, args| {
        let level = args
            .first()
            .ok_or_else(|| PolyglotError::invalid_argument("log: missing argument 0"))
            .and_then(level_from_value)?;
        let message = arg_str(args, 1, "log")?;

        logs.log(level, message);
        Ok(Value::Null)
    })
}

/// Register the `memory.*` functions.
pub fn register_memory(bridge: &Bridge, memory: Arc<MemoryCoordinator>) -> Result<()> {
    let coordinator = memory.clone();
    bridge.register_sync("memory.read", move |_ctx, args| {
        let id = arg_str(args, 0, "memory.read")?;
        let offset = optional_usize(args, 1, "memory.read")?.unwrap_or(0);

        let region = coordinator.read_guard(id)?;
        let len = match optional_usize(args, 2, "memory.read")? {
            Some(len) => len,
            None => region.len().saturating_sub(offset),
        };

        let bytes = region.read_at(offset, len)?;
        debug!(region = id, offset, len, "Guest read shared memory");
        Ok(Value::Bytes(bytes))
    })?;

    let coordinator = memory.clone();
    bridge.register_sync("memory.write", move |_ctx, args| {
        let id = arg_str(args, 0, "memory.write")?;
        let offset = to_usize(arg_i64(args, 1, "memory.write")?, 1, "memory.write")?;
        // Text is written as its UTF-8 encoding.
        let data = match args.get(2) {
            Some(Value::String(text)) => text.as_bytes(),
            _ => arg_bytes(args, 2, "memory.write")?,
        };

        let region = coordinator.write_guard(id)?;
        region.write_at(offset, data)?;
        debug!(region = id, offset, len = data.len(), "Guest wrote shared memory");

        i64::try_from(data.len())
            .map(Value::Int)
            .map_err(|_| PolyglotError::invalid_argument("memory.write: data too large"))
    })?;

    bridge.register_sync("memory.size", move |_ctx, args| {
        let id = arg_str(args, 0, "memory.size")?;
        let region = memory.get(id)?;
        i64::try_from(region.len())
            .map(Value::Int)
            .map_err(|_| PolyglotError::invalid_argument("memory.size: region too large"))
    })?;

    Ok(())
}

fn optional_usize(args: &[Value], index: usize, function: &str) -> Result<Option<usize>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => to_usize(arg_i64(args, index, function)?, index, function).map(Some),
    }
}

fn to_usize(value: i64, index: usize, function: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        PolyglotError::invalid_argument(format!(
            "{function}: argument {index} must not be negative, got {value}"
        ))
    })
}
