//! Per-function call profiling.
//!
//! Metrics are keyed by `"<runtime>.<function>"`. The orchestrator records
//! every dispatched call; `execute` calls are recorded under the function
//! name `execute`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;
use tokio::time::Instant;

use polyglot_common::Result;

/// Aggregated timings for one runtime function.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMetrics {
    pub runtime: String,
    pub function: String,
    pub call_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub last_called: SystemTime,
}

impl CallMetrics {
    fn new(runtime: &str, function: &str, first: Duration) -> Self {
        Self {
            runtime: runtime.to_string(),
            function: function.to_string(),
            call_count: 0,
            error_count: 0,
            total_duration: Duration::ZERO,
            min_duration: first,
            max_duration: first,
            last_called: SystemTime::now(),
        }
    }

    /// Mean call duration.
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.call_count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total_duration / count,
            // Beyond u32 calls, fall back to float division.
            Err(_) => {
                #[allow(clippy::cast_precision_loss)]
                let count = self.call_count as f64;
                Duration::from_secs_f64(self.total_duration.as_secs_f64() / count)
            }
        }
    }

    fn record(&mut self, duration: Duration, failed: bool) {
        self.call_count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.last_called = SystemTime::now();
        if failed {
            self.error_count += 1;
        }
    }
}

/// Collects [`CallMetrics`] for calls routed through [`Profiler::track_call`].
#[derive(Debug)]
pub struct Profiler {
    metrics: RwLock<BTreeMap<String, CallMetrics>>,
    enabled: AtomicBool,
}

impl Default for Profiler {
    fn default() -> Self {
        Self {
            metrics: RwLock::new(BTreeMap::new()),
            enabled: AtomicBool::new(true),
        }
    }
}

fn key(runtime: &str, function: &str) -> String {
    format!("{runtime}.{function}")
}

impl Profiler {
    /// Create an enabled profiler.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Await `call`, recording its duration and outcome.
    ///
    /// The result is returned untouched. Nothing is recorded while the
    /// profiler is disabled.
    pub async fn track_call<T, F>(&self, runtime: &str, function: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.is_enabled() {
            return call.await;
        }

        let start = Instant::now();
        let result = call.await;
        self.record(runtime, function, start.elapsed(), result.is_err());
        result
    }

    /// Record one call directly.
    pub fn record(&self, runtime: &str, function: &str, duration: Duration, failed: bool) {
        let mut metrics = self.metrics.write();
        metrics
            .entry(key(runtime, function))
            .or_insert_with(|| CallMetrics::new(runtime, function, duration))
            .record(duration, failed);
    }

    /// Snapshot of one function's metrics.
    pub fn metrics(&self, runtime: &str, function: &str) -> Option<CallMetrics> {
        self.metrics.read().get(&key(runtime, function)).cloned()
    }

    /// Snapshot of every recorded function, keyed by `runtime.function`.
    pub fn all_metrics(&self) -> BTreeMap<String, CallMetrics> {
        self.metrics.read().clone()
    }

    /// Drop all recorded metrics.
    pub fn reset(&self) {
        self.metrics.write().clear();
    }

    /// Human readable summary, one block per function.
    pub fn report(&self) -> String {
        let metrics = self.metrics.read();
        if metrics.is_empty() {
            return "No profiling data collected".to_string();
        }

        let mut out = String::from("Performance Report\n==================\n");
        for (key, m) in metrics.iter() {
            let _ = write!(
                out,
                "\n{key}:\n  Calls:  {}\n  Errors: {}\n  Total:  {:?}\n  Avg:    {:?}\n  Min:    {:?}\n  Max:    {:?}\n",
                m.call_count,
                m.error_count,
                m.total_duration,
                m.average_duration(),
                m.min_duration,
                m.max_duration,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use polyglot_common::{PolyglotError, Value};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_track_call_records_timings() {
        let profiler = Profiler::new();

        for ms in [10, 30] {
            let out = profiler
                .track_call("lua", "add", async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(Value::Int(1))
                })
                .await
                .unwrap();
            assert_eq!(out, Value::Int(1));
        }

        let m = profiler.metrics("lua", "add").unwrap();
        assert_eq!(m.call_count, 2);
        assert_eq!(m.error_count, 0);
        assert_eq!(m.min_duration, Duration::from_millis(10));
        assert_eq!(m.max_duration, Duration::from_millis(30));
        assert_eq!(m.average_duration(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_errors_are_counted_and_forwarded() {
        let profiler = Profiler::new();

        let err = profiler
            .track_call::<Value, _>("lua", "boom", async {
                Err(PolyglotError::execution("boom"))
            })
            .await
            .unwrap_err();
        assert!(err.is_execution());

        let m = profiler.metrics("lua", "boom").unwrap();
        assert_eq!((m.call_count, m.error_count), (1, 1));
    }

    #[tokio::test]
    async fn test_disabled_records_nothing() {
        let profiler = Profiler::new();
        profiler.disable();

        profiler
            .track_call("lua", "f", async { Ok(()) })
            .await
            .unwrap();
        assert!(profiler.all_metrics().is_empty());

        profiler.enable();
        profiler
            .track_call("lua", "f", async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(profiler.all_metrics().len(), 1);
    }

    #[test]
    fn test_report_and_reset() {
        let profiler = Profiler::new();
        assert_eq!(profiler.report(), "No profiling data collected");

        profiler.record("native", "execute", Duration::from_millis(5), false);
        let report = profiler.report();
        assert!(report.contains("native.execute:"));
        assert!(report.contains("Calls:  1"));

        profiler.reset();
        assert!(profiler.metrics("native", "execute").is_none());
    }
}
