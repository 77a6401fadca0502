//! Telemetry: in-memory counters/gauges/timings with optional JSON
//! persistence.
//!
//! Grounded in `examples/original_source/services/telemetry_service.py`: the
//! same `{name}.success`/`{name}.errors` counter convention and the same
//! `persist()` JSON shape (`{counters, gauges, metrics_count}`), restated as
//! a `Mutex`-guarded struct with an RAII timer in place of the original's
//! context manager.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Default)]
struct TelemetryState {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
    timings: HashMap<String, Vec<f64>>,
}

#[derive(Serialize)]
struct PersistedTelemetry<'a> {
    counters: &'a HashMap<String, i64>,
    gauges: &'a HashMap<String, f64>,
    metrics_count: usize,
}

/// Process-wide telemetry sink. Intended to be constructed once and shared
/// via `Arc`.
#[derive(Default)]
pub struct Telemetry {
    state: Mutex<TelemetryState>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, n: i64) {
        let mut st = self.state.lock().expect("lock poisoned");
        *st.counters.entry(name.to_string()).or_insert(0) += n;
    }

    pub fn gauge(&self, name: &str, value: f64) {
        let mut st = self.state.lock().expect("lock poisoned");
        st.gauges.insert(name.to_string(), value);
    }

    fn record_timing(&self, name: &str, elapsed_secs: f64, success: bool) {
        let mut st = self.state.lock().expect("lock poisoned");
        st.timings.entry(name.to_string()).or_default().push(elapsed_secs);
        let suffix = if success { "success" } else { "errors" };
        *st.counters.entry(format!("{name}.{suffix}")).or_insert(0) += 1;
    }

    /// Starts an RAII operation timer. Dropping (or calling `finish`) records
    /// elapsed seconds and increments `{name}.success` or `{name}.errors`.
    pub fn timer<'a>(&'a self, name: &str) -> OperationTimer<'a> {
        OperationTimer {
            telemetry: self,
            name: name.to_string(),
            start: Instant::now(),
            success: true,
            finished: false,
        }
    }

    pub fn summary(&self, name: &str) -> Option<MetricSummary> {
        let st = self.state.lock().expect("lock poisoned");
        let series = st.timings.get(name)?;
        if series.is_empty() {
            return None;
        }
        let count = series.len() as u64;
        let min = series.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = series.iter().sum::<f64>() / series.len() as f64;
        Some(MetricSummary { count, min, max, avg })
    }

    /// Writes counters and gauges (not raw timing series) as JSON.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let st = self.state.lock().expect("lock poisoned");
        let payload = PersistedTelemetry {
            counters: &st.counters,
            gauges: &st.gauges,
            metrics_count: st.timings.values().map(|v| v.len()).sum(),
        };
        let json = serde_json::to_string_pretty(&payload)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// RAII guard recording the elapsed time of an operation. Mark failure with
/// [`OperationTimer::mark_failed`] before it drops so the `.errors` counter
/// (rather than `.success`) is incremented.
pub struct OperationTimer<'a> {
    telemetry: &'a Telemetry,
    name: String,
    start: Instant,
    success: bool,
    finished: bool,
}

impl<'a> OperationTimer<'a> {
    pub fn mark_failed(&mut self) {
        self.success = false;
    }

    pub fn finish(mut self) {
        self.finish_inner();
    }

    fn finish_inner(&mut self) {
        if !self.finished {
            let elapsed = self.start.elapsed().as_secs_f64();
            self.telemetry.record_timing(&self.name, elapsed, self.success);
            self.finished = true;
        }
    }
}

impl<'a> Drop for OperationTimer<'a> {
    fn drop(&mut self) {
        self.finish_inner();
    }
}
