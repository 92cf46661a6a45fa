//! Observability metrics for partition retrieval.
//!
//! Metrics are emitted through the `metrics` crate facade; install any
//! recorder (for example `metrics-exporter-prometheus`) to export them.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `arco_partitions_chunk_fetches_total` | Counter | `result` | Chunk fetches by outcome |
//! | `arco_partitions_chunk_fetch_duration_seconds` | Histogram | - | Source latency per chunk |
//! | `arco_partitions_page_load_seconds` | Histogram | `page_mode` | End-to-end page load time |
//! | `arco_partitions_generations_started_total` | Counter | `reason` | New fetch generations |
//! | `arco_partitions_generations_superseded_total` | Counter | - | Loads dropped as stale |
//! | `arco_partitions_loaded` | Gauge | - | Partitions in the last completed page |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: chunk fetches by outcome.
    pub const CHUNK_FETCHES_TOTAL: &str = "arco_partitions_chunk_fetches_total";
    /// Histogram: source latency per chunk in seconds.
    pub const CHUNK_FETCH_DURATION_SECONDS: &str = "arco_partitions_chunk_fetch_duration_seconds";
    /// Histogram: end-to-end page load time in seconds.
    pub const PAGE_LOAD_SECONDS: &str = "arco_partitions_page_load_seconds";
    /// Counter: fetch generations started, by reason.
    pub const GENERATIONS_STARTED_TOTAL: &str = "arco_partitions_generations_started_total";
    /// Counter: loads dropped because a newer generation started.
    pub const GENERATIONS_SUPERSEDED_TOTAL: &str = "arco_partitions_generations_superseded_total";
    /// Gauge: partitions in the last completed page.
    pub const PARTITIONS_LOADED: &str = "arco_partitions_loaded";
}

/// Label keys used across metrics.
pub mod labels {
    /// Fetch outcome (ok, network, invalid, cancelled).
    pub const RESULT: &str = "result";
    /// Why a generation started (initial, filters, page_size, ...).
    pub const REASON: &str = "reason";
    /// Page mode (count, all).
    pub const PAGE_MODE: &str = "page_mode";
}

/// Recording helpers for partition retrieval metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartitionMetrics;

impl PartitionMetrics {
    /// Creates a metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a chunk fetch outcome.
    pub fn record_chunk_fetch(&self, result: &'static str) {
        counter!(names::CHUNK_FETCHES_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Records source latency for one chunk.
    pub fn observe_chunk_duration(&self, duration: Duration) {
        histogram!(names::CHUNK_FETCH_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records how long a page took to load.
    pub fn observe_page_load(&self, page_mode: &'static str, duration: Duration) {
        histogram!(names::PAGE_LOAD_SECONDS, labels::PAGE_MODE => page_mode)
            .record(duration.as_secs_f64());
    }

    /// Records the start of a fetch generation.
    pub fn record_generation_started(&self, reason: &'static str) {
        counter!(names::GENERATIONS_STARTED_TOTAL, labels::REASON => reason).increment(1);
    }

    /// Records a load that was dropped as stale.
    pub fn record_superseded(&self) {
        counter!(names::GENERATIONS_SUPERSEDED_TOTAL).increment(1);
    }

    /// Sets the number of partitions in the last completed page.
    #[allow(clippy::cast_precision_loss)] // Page sizes are small
    pub fn set_partitions_loaded(&self, count: usize) {
        gauge!(names::PARTITIONS_LOADED).set(count as f64);
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped, so early returns
/// are timed too.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that reports the elapsed time to `on_drop`.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
