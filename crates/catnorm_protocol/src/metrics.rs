//! Process-local counters (§2a), lock-free so every stage, worker and
//! gateway call site can record on the hot path without contention.
//!
//! Shaped after the teacher's own sentinel metrics: a single `static`
//! holding plain `AtomicU64` fields, `inc_*`/`record_*` writers, and a
//! `snapshot()` for read-side reporting (logs, a status endpoint, tests).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    rows_processed: AtomicU64,
    stage_runs: AtomicU64,
    stage_duration_us: AtomicU64,
    llm_calls: AtomicU64,
    llm_retries: AtomicU64,
    llm_breaker_trips: AtomicU64,
    stop_checks: AtomicU64,
    stop_check_latency_us: AtomicU64,
}

impl Metrics {
    const fn new() -> Self {
        Self {
            rows_processed: AtomicU64::new(0),
            stage_runs: AtomicU64::new(0),
            stage_duration_us: AtomicU64::new(0),
            llm_calls: AtomicU64::new(0),
            llm_retries: AtomicU64::new(0),
            llm_breaker_trips: AtomicU64::new(0),
            stop_checks: AtomicU64::new(0),
            stop_check_latency_us: AtomicU64::new(0),
        }
    }

    pub fn inc_rows_processed(&self, count: u64) {
        self.rows_processed.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one stage's wall-clock run time. Tallies a run count
    /// alongside the duration so `snapshot()` can report an average.
    pub fn record_stage_duration(&self, elapsed: Duration) {
        self.stage_runs.fetch_add(1, Ordering::Relaxed);
        self.stage_duration_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn inc_llm_calls(&self) {
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_llm_retries(&self) {
        self.llm_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_llm_breaker_trips(&self) {
        self.llm_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the time between a cooperative-cancellation check and the
    /// one before it, so a stalled stop check shows up in the snapshot.
    pub fn record_stop_check_latency(&self, elapsed: Duration) {
        self.stop_checks.fetch_add(1, Ordering::Relaxed);
        self.stop_check_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
            stage_runs: self.stage_runs.load(Ordering::Relaxed),
            stage_duration_us: self.stage_duration_us.load(Ordering::Relaxed),
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            llm_retries: self.llm_retries.load(Ordering::Relaxed),
            llm_breaker_trips: self.llm_breaker_trips.load(Ordering::Relaxed),
            stop_checks: self.stop_checks.load(Ordering::Relaxed),
            stop_check_latency_us: self.stop_check_latency_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rows_processed: u64,
    pub stage_runs: u64,
    pub stage_duration_us: u64,
    pub llm_calls: u64,
    pub llm_retries: u64,
    pub llm_breaker_trips: u64,
    pub stop_checks: u64,
    pub stop_check_latency_us: u64,
}

impl MetricsSnapshot {
    pub fn avg_stage_duration_ms(&self) -> f64 {
        if self.stage_runs == 0 {
            return 0.0;
        }
        (self.stage_duration_us as f64 / self.stage_runs as f64) / 1000.0
    }

    pub fn avg_stop_check_latency_ms(&self) -> f64 {
        if self.stop_checks == 0 {
            return 0.0;
        }
        (self.stop_check_latency_us as f64 / self.stop_checks as f64) / 1000.0
    }

    /// Plain-text Prometheus exposition format for a status/metrics endpoint.
    pub fn prometheus_format(&self) -> String {
        format!(
            "# HELP catnorm_rows_processed_total Rows processed across all stages.\n\
             # TYPE catnorm_rows_processed_total counter\n\
             catnorm_rows_processed_total {}\n\
             # HELP catnorm_stage_runs_total Stage executor invocations.\n\
             # TYPE catnorm_stage_runs_total counter\n\
             catnorm_stage_runs_total {}\n\
             # HELP catnorm_stage_duration_ms_avg Average stage run duration.\n\
             # TYPE catnorm_stage_duration_ms_avg gauge\n\
             catnorm_stage_duration_ms_avg {:.3}\n\
             # HELP catnorm_llm_calls_total LLM gateway completions attempted.\n\
             # TYPE catnorm_llm_calls_total counter\n\
             catnorm_llm_calls_total {}\n\
             # HELP catnorm_llm_retries_total LLM gateway retry attempts.\n\
             # TYPE catnorm_llm_retries_total counter\n\
             catnorm_llm_retries_total {}\n\
             # HELP catnorm_llm_breaker_trips_total Circuit breaker trips.\n\
             # TYPE catnorm_llm_breaker_trips_total counter\n\
             catnorm_llm_breaker_trips_total {}\n\
             # HELP catnorm_stop_check_latency_ms_avg Average cooperative-cancellation check interval.\n\
             # TYPE catnorm_stop_check_latency_ms_avg gauge\n\
             catnorm_stop_check_latency_ms_avg {:.3}\n",
            self.rows_processed,
            self.stage_runs,
            self.avg_stage_duration_ms(),
            self.llm_calls,
            self.llm_retries,
            self.llm_breaker_trips,
            self.avg_stop_check_latency_ms(),
        )
    }
}
