//! Cross-language function registry.
//!
//! The [`Bridge`] exposes host-implemented functions to every runtime under
//! a unique name. Identity is the name alone: there are no namespaces and no
//! overloads. Functions validate their own arguments (see the `arg_*`
//! helpers in [`polyglot_common::value`]) and report mismatches as errors.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use polyglot_common::{PolyglotError, Result, Value};

use crate::Context;

/// Boxed future returned by bridge functions.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A registered bridge function.
pub type BridgeFn = Arc<dyn Fn(Context, Vec<Value>) -> BoxFuture<Result<Value>> + Send + Sync>;

/// Name-indexed registry of host callable functions.
#[derive(Default)]
pub struct Bridge {
    functions: DashMap<String, BridgeFn>,
}

impl Bridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async function.
    ///
    /// # Errors
    ///
    /// [`PolyglotError::DuplicateFunction`] if `name` is taken; the existing
    /// function is kept.
    pub fn register<F, Fut>(&self, name: &str, function: F) -> Result<()>
    where
        F: Fn(Context, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let boxed: BridgeFn = Arc::new(move |ctx, args| Box::pin(function(ctx, args)));
        self.insert(name, boxed)
    }

    /// Register a synchronous function.
    pub fn register_sync<F>(&self, name: &str, function: F) -> Result<()>
    where
        F: Fn(&Context, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let boxed: BridgeFn = Arc::new(move |ctx, args| {
            let result = function(&ctx, &args);
            Box::pin(std::future::ready(result))
        });
        self.insert(name, boxed)
    }

    fn insert(&self, name: &str, function: BridgeFn) -> Result<()> {
        match self.functions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(PolyglotError::duplicate_function(name)),
            Entry::Vacant(slot) => {
                slot.insert(function);
                info!(function = name, "Bridge function registered");
                Ok(())
            }
        }
    }

    /// Remove a function. Subsequent calls fail with `FunctionNotFound`.
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.functions
            .remove(name)
            .map(|_| info!(function = name, "Bridge function unregistered"))
            .ok_or_else(|| PolyglotError::function_not_found(name))
    }

    /// Invoke a function and return its result verbatim.
    pub async fn call(&self, ctx: &Context, name: &str, args: &[Value]) -> Result<Value> {
        // Clone out of the map so no shard lock is held across the await.
        let function = self
            .functions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PolyglotError::function_not_found(name))?;

        debug!(function = name, args = args.len(), "Calling bridge function");
        function(ctx.clone(), args.to_vec()).await
    }

    /// Registered function names, sorted.
    pub fn functions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("functions", &self.functions.len())
            .finish()
    }
}
