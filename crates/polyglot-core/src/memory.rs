//! Shared memory regions with centrally arbitrated access.
//!
//! The [`MemoryCoordinator`] owns every [`MemoryRegion`]. Holders refer to
//! regions by ID and receive the same shared region on every lookup, so a
//! write made under a write grant is visible to every other holder without
//! copying. The coordinator only serializes *access*:
//!
//! - any number of readers may hold a region at once
//! - a writer excludes everything: [`MemoryCoordinator::acquire_write`]
//!   succeeds only when there are no readers and no writer, and fails fast
//!   with [`PolyglotError::WriteConflict`] instead of waiting
//! - a held region cannot be freed

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use polyglot_common::{MemoryConfig, PolyglotError, Result};

/// Declared element type of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Bytes,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Struct,
}

impl MemoryType {
    /// Size of one element in bytes, for fixed-width types.
    pub fn element_size(self) -> Option<usize> {
        match self {
            MemoryType::Bytes => Some(1),
            MemoryType::Int32 | MemoryType::Float32 => Some(4),
            MemoryType::Int64 | MemoryType::Float64 => Some(8),
            MemoryType::String | MemoryType::Struct => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryType::Bytes => "bytes",
            MemoryType::Int32 => "int32",
            MemoryType::Int64 => "int64",
            MemoryType::Float32 => "float32",
            MemoryType::Float64 => "float64",
            MemoryType::String => "string",
            MemoryType::Struct => "struct",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for MemoryType {
    type Err = PolyglotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bytes" => Ok(MemoryType::Bytes),
            "int32" => Ok(MemoryType::Int32),
            "int64" => Ok(MemoryType::Int64),
            "float32" => Ok(MemoryType::Float32),
            "float64" => Ok(MemoryType::Float64),
            "string" => Ok(MemoryType::String),
            "struct" => Ok(MemoryType::Struct),
            other => Err(PolyglotError::invalid_argument(format!(
                "unknown memory type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AccessCounts {
    readers: usize,
    writers: usize,
}

/// A named, fixed-size byte buffer.
///
/// Regions are created by [`MemoryCoordinator::allocate`] and shared as
/// `Arc<MemoryRegion>`. The reader/writer counts are maintained by the
/// coordinator only.
pub struct MemoryRegion {
    id: String,
    memory_type: MemoryType,
    data: RwLock<Box<[u8]>>,
    access: Mutex<AccessCounts>,
}

impl MemoryRegion {
    fn new(id: String, size: usize, memory_type: MemoryType) -> Self {
        Self {
            id,
            memory_type,
            data: RwLock::new(vec![0; size].into_boxed_slice()),
            access: Mutex::new(AccessCounts::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Size in bytes, fixed at allocation.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Current number of readers.
    pub fn readers(&self) -> usize {
        self.access.lock().readers
    }

    /// Current number of writers (0 or 1).
    pub fn writers(&self) -> usize {
        self.access.lock().writers
    }

    /// Inspect the buffer.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.read())
    }

    /// Mutate the buffer in place.
    ///
    /// Callers are expected to hold a write grant from the coordinator.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        f(&mut self.data.write())
    }

    /// Copy of the buffer contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().to_vec()
    }

    /// Copy `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let data = self.data.read();
        let range = checked_range(&self.id, offset, len, data.len())?;
        Ok(data[range].to_vec())
    }

    /// Copy `bytes` into the buffer at `offset`.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let range = checked_range(&self.id, offset, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn grant_read(&self) {
        self.access.lock().readers += 1;
    }

    fn grant_write(&self) -> Result<()> {
        let mut access = self.access.lock();
        if access.readers > 0 || access.writers > 0 {
            return Err(PolyglotError::WriteConflict {
                id: self.id.clone(),
                readers: access.readers,
                writers: access.writers,
            });
        }
        access.writers = 1;
        Ok(())
    }

    fn revoke_read(&self) {
        let mut access = self.access.lock();
        access.readers = access.readers.saturating_sub(1);
    }

    fn revoke_write(&self) {
        self.access.lock().writers = 0;
    }
}

fn checked_range(id: &str, offset: usize, len: usize, size: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(PolyglotError::invalid_argument(format!(
            "range {offset}+{len} out of bounds for region {id} of {size} bytes"
        ))),
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = *self.access.lock();
        f.debug_struct("MemoryRegion")
            .field("id", &self.id)
            .field("type", &self.memory_type)
            .field("len", &self.len())
            .field("readers", &access.readers)
            .field("writers", &access.writers)
            .finish()
    }
}

/// Memory coordinator statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryStats {
    /// Number of live regions.
    pub regions: usize,
    /// Bytes allocated.
    pub usage: u64,
    /// Configured budget.
    pub limit: u64,
    /// `usage / limit`.
    pub utilization: f64,
    /// Whether zero-copy sharing is advertised.
    pub zero_copy: bool,
}

/// The single arbiter of shared memory access.
pub struct MemoryCoordinator {
    config: MemoryConfig,
    regions: RwLock<HashMap<String, Arc<MemoryRegion>>>,
    usage: AtomicU64,
    maintenance: Mutex<Option<Maintenance>>,
}

struct Maintenance {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl MemoryCoordinator {
    /// Create an empty coordinator.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            regions: RwLock::new(HashMap::new()),
            usage: AtomicU64::new(0),
            maintenance: Mutex::new(None),
        }
    }

    /// The coordinator configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Create a zero-filled region of `size` bytes.
    pub fn allocate(&self, id: &str, size: usize, memory_type: MemoryType) -> Result<Arc<MemoryRegion>> {
        let mut regions = self.regions.write();

        if regions.contains_key(id) {
            return Err(PolyglotError::duplicate_region(id));
        }

        let requested = size as u64;
        let usage = self.usage.load(Ordering::SeqCst);
        let limit = self.config.max_shared_memory;
        if usage.checked_add(requested).is_none_or(|total| total > limit) {
            warn!(region = id, requested, usage, limit, "Shared memory budget exhausted");
            return Err(PolyglotError::MemoryLimitExceeded {
                requested,
                usage,
                limit,
            });
        }

        let region = Arc::new(MemoryRegion::new(id.to_string(), size, memory_type));
        regions.insert(id.to_string(), region.clone());
        self.usage.fetch_add(requested, Ordering::SeqCst);

        debug!(region = id, size, memory_type = %memory_type, "Region allocated");
        Ok(region)
    }

    /// Look up a region. Every holder receives the same region.
    pub fn get(&self, id: &str) -> Result<Arc<MemoryRegion>> {
        self.regions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PolyglotError::region_not_found(id))
    }

    /// Remove a region.
    ///
    /// # Errors
    ///
    /// [`PolyglotError::RegionInUse`] while the region has readers or a writer.
    pub fn free(&self, id: &str) -> Result<()> {
        let mut regions = self.regions.write();

        let region = regions
            .get(id)
            .ok_or_else(|| PolyglotError::region_not_found(id))?;

        let access = *region.access.lock();
        if access.readers > 0 || access.writers > 0 {
            return Err(PolyglotError::RegionInUse {
                id: id.to_string(),
                readers: access.readers,
                writers: access.writers,
            });
        }

        if let Some(region) = regions.remove(id) {
            self.usage.fetch_sub(region.len() as u64, Ordering::SeqCst);
        }

        debug!(region = id, "Region freed");
        Ok(())
    }

    /// Register a reader. Never blocks and never conflicts.
    pub fn acquire_read(&self, id: &str) -> Result<()> {
        self.with_region(id, |region| {
            region.grant_read();
            Ok(())
        })
    }

    /// Unregister a reader. Releasing an unheld region is a no-op.
    pub fn release_read(&self, id: &str) -> Result<()> {
        self.with_region(id, |region| {
            region.revoke_read();
            Ok(())
        })
    }

    /// Register the single writer.
    ///
    /// # Errors
    ///
    /// [`PolyglotError::WriteConflict`] if the region has any reader or a writer.
    pub fn acquire_write(&self, id: &str) -> Result<()> {
        self.with_region(id, |region| region.grant_write())
    }

    /// Unregister the writer. Releasing an unheld region is a no-op.
    pub fn release_write(&self, id: &str) -> Result<()> {
        self.with_region(id, |region| {
            region.revoke_write();
            Ok(())
        })
    }

    /// Run `f` on a live region while holding the registry lock, so the
    /// region cannot be freed concurrently.
    fn with_region<T>(&self, id: &str, f: impl FnOnce(&Arc<MemoryRegion>) -> Result<T>) -> Result<T> {
        let regions = self.regions.read();
        let region = regions
            .get(id)
            .ok_or_else(|| PolyglotError::region_not_found(id))?;
        f(region)
    }

    /// Acquire read access that is released when the guard drops.
    ///
    /// The guard releases the region it was granted on, even if that region
    /// has since been freed and its ID reused.
    pub fn read_guard(&self, id: &str) -> Result<RegionReadGuard> {
        self.with_region(id, |region| {
            region.grant_read();
            Ok(RegionReadGuard {
                region: region.clone(),
            })
        })
    }

    /// Acquire write access that is released when the guard drops.
    pub fn write_guard(&self, id: &str) -> Result<RegionWriteGuard> {
        self.with_region(id, |region| {
            region.grant_write()?;
            Ok(RegionWriteGuard {
                region: region.clone(),
            })
        })
    }

    /// Bytes currently allocated.
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::SeqCst)
    }

    /// IDs of all live regions, sorted.
    pub fn regions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.regions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current statistics.
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> MemoryStats {
        let regions = self.regions.read().len();
        let usage = self.usage();
        let limit = self.config.max_shared_memory;
        MemoryStats {
            regions,
            usage,
            limit,
            utilization: if limit == 0 { 0.0 } else { usage as f64 / limit as f64 },
            zero_copy: self.config.enable_zero_copy,
        }
    }

    /// Start the periodic maintenance tick.
    ///
    /// The tick only reports statistics; regions are destroyed solely by
    /// [`free`](Self::free). Returns `false` if the tick is already running
    /// or the interval is zero. Must be called from within a tokio runtime.
    pub fn start_maintenance(self: &Arc<Self>) -> bool {
        let interval = self.config.gc_interval();
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_some() || interval.is_zero() {
            return false;
        }

        let stop = CancellationToken::new();
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(coordinator) = weak.upgrade() else { break };
                        let stats = coordinator.stats();
                        debug!(
                            regions = stats.regions,
                            usage = stats.usage,
                            utilization = stats.utilization,
                            "Memory maintenance tick"
                        );
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Memory maintenance started");
        *maintenance = Some(Maintenance { stop, handle });
        true
    }

    /// Returns `true` while the maintenance tick is running.
    pub fn is_maintenance_running(&self) -> bool {
        self.maintenance
            .lock()
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    /// Stop maintenance and drop every region. Idempotent.
    ///
    /// Regions still referenced by holders stay alive until the last
    /// reference drops, but can no longer be looked up.
    pub fn shutdown(&self) {
        if let Some(maintenance) = self.maintenance.lock().take() {
            maintenance.stop.cancel();
            maintenance.handle.abort();
        }

        let mut regions = self.regions.write();
        if !regions.is_empty() {
            info!(regions = regions.len(), "Releasing shared memory regions");
        }
        regions.clear();
        self.usage.store(0, Ordering::SeqCst);
    }
}

impl fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("regions", &self.regions.read().len())
            .field("usage", &self.usage())
            .field("limit", &self.config.max_shared_memory)
            .finish_non_exhaustive()
    }
}

/// Read grant on a region, released on drop.
pub struct RegionReadGuard {
    region: Arc<MemoryRegion>,
}

impl std::ops::Deref for RegionReadGuard {
    type Target = MemoryRegion;

    fn deref(&self) -> &MemoryRegion {
        &self.region
    }
}

impl Drop for RegionReadGuard {
    fn drop(&mut self) {
        self.region.revoke_read();
    }
}

/// Write grant on a region, released on drop.
pub struct RegionWriteGuard {
    region: Arc<MemoryRegion>,
}

impl std::ops::Deref for RegionWriteGuard {
    type Target = MemoryRegion;

    fn deref(&self) -> &MemoryRegion {
        &self.region
    }
}

impl Drop for RegionWriteGuard {
    fn drop(&mut self) {
        self.region.revoke_write();
    }
}
