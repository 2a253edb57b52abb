//! Fixed-capacity worker pools.
//!
//! A [`Pool`] owns N [`Worker`]s and hands out exclusive access to them.
//! Capacity is enforced by a counting semaphore; the idle workers are kept
//! in a freelist. Callers block in [`Pool::acquire`] while every worker is
//! held. Waiters are served in FIFO order, although callers should not rely
//! on it.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use polyglot_common::{PolyglotError, Result};

use crate::worker::{Engine, Worker};

/// A bounded set of workers for one runtime.
///
/// Cloning a pool yields another handle to the same workers.
pub struct Pool<E> {
    inner: Arc<PoolInner<E>>,
}

struct PoolInner<E> {
    /// Runtime name, for errors and logs.
    name: String,
    workers: Vec<Arc<Worker<E>>>,
    /// Indices of idle workers. Always as long as the available permit count.
    idle: Mutex<Vec<usize>>,
    permits: Arc<Semaphore>,
}

impl<E: Engine> Pool<E> {
    /// Build a pool with one worker per engine.
    pub fn new(name: impl Into<String>, engines: Vec<E>) -> Self {
        let workers: Vec<_> = engines
            .into_iter()
            .enumerate()
            .map(|(id, engine)| Arc::new(Worker::new(id, engine)))
            .collect();
        let size = workers.len();

        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                idle: Mutex::new((0..size).rev().collect()),
                permits: Arc::new(Semaphore::new(size)),
                workers,
            }),
        }
    }

    /// Take exclusive ownership of an idle worker, waiting for one if needed.
    ///
    /// The worker goes back to the pool when the returned lease is dropped.
    ///
    /// # Errors
    ///
    /// Fails with [`PolyglotError::RuntimeShutdown`] once the pool is closed,
    /// including for callers already waiting.
    pub async fn acquire(&self) -> Result<PooledWorker<E>> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PolyglotError::runtime_shutdown(&self.inner.name))?;

        // Permits and idle slots move together, so a permit implies an index.
        let index = self
            .inner
            .idle
            .lock()
            .pop()
            .ok_or_else(|| PolyglotError::runtime_shutdown(&self.inner.name))?;

        debug!(runtime = %self.inner.name, worker_id = index, "Worker acquired");

        Ok(PooledWorker {
            worker: self.inner.workers[index].clone(),
            index,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Close the pool and shut down every worker.
    ///
    /// Pending and future `acquire` calls fail. Blocks until in-flight calls
    /// on each worker have returned, so run it off the async executor.
    pub fn close(&self) {
        if self.inner.permits.is_closed() {
            return;
        }
        self.inner.permits.close();

        for worker in &self.inner.workers {
            worker.shutdown();
        }

        info!(
            runtime = %self.inner.name,
            workers = self.inner.workers.len(),
            "Worker pool closed"
        );
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.inner.workers.len()
    }

    /// Number of idle workers.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Returns `true` once [`Pool::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.permits.is_closed()
    }
}

impl<E> Clone for Pool<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E> std::fmt::Debug for Pool<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("size", &self.inner.workers.len())
            .field("available", &self.inner.permits.available_permits())
            .finish()
    }
}

/// Exclusive lease on one worker.
///
/// Dereferences to the [`Worker`]. Dropping the lease (or calling
/// [`PooledWorker::release`]) returns the worker to its pool.
pub struct PooledWorker<E> {
    worker: Arc<Worker<E>>,
    index: usize,
    pool: Arc<PoolInner<E>>,
    _permit: OwnedSemaphorePermit,
}

impl<E> PooledWorker<E> {
    /// Return the worker to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl<E> std::fmt::Debug for PooledWorker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorker")
            .field("pool", &self.pool.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl<E> Deref for PooledWorker<E> {
    type Target = Worker<E>;

    fn deref(&self) -> &Self::Target {
        &self.worker
    }
}

impl<E> Drop for PooledWorker<E> {
    fn drop(&mut self) {
        // The index is pushed before the permit field is dropped.
        self.pool.idle.lock().push(self.index);
    }
}
