//! Chunk scheduling for one page of partitions.
//!
//! The [`ChunkScheduler`] turns one [`PageWindow`] request into a series of
//! bounded chunk fetches and owns the fetch generation counter.
//!
//! ## Generation Protocol
//!
//! ```text
//! begin(reason) ──► generation N, snapshot reset (loading, 0%, empty)
//!                      │
//! load(N, ...)  ──► first chunk ──► fan-out or follow cursors ──► complete (100%)
//!                      │
//! begin(reason) ──► generation N+1: in-flight fetches for N resolve as
//!                   Cancelled, late results for N are dropped
//! ```
//!
//! ## Chunking Policy
//!
//! - **Counted page**: fetch until the page holds `page_size` partitions,
//!   never requesting more than the page still needs
//! - **`all`**: fetch until the source stops returning a next cursor
//! - **Exhaustion**: an empty chunk or a missing next cursor ends the page
//!
//! When the first chunk reports `total_approx` and the source supports
//! positional cursors, the remaining chunks are fetched concurrently (bounded
//! by `max_concurrent_chunks`) and merged by chunk ordinal, so the published
//! list is always in partition-set order regardless of arrival order.
//!
//! Planned chunks are sized like the first chunk when the source returned
//! fewer partitions than asked for. If a planned chunk still comes back
//! short, later chunks are dropped unpublished and the page follows cursors
//! from that chunk onward.
//!
//! ## Failure Policy
//!
//! One failed chunk aborts the page. The partial list is discarded, the error
//! is published on the snapshot and returned to the caller. Nothing is
//! retried automatically.

mod merge;
mod progress;

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{Instrument, debug, info, warn};

use self::merge::ChunkMerger;
use self::progress::Progress;
use crate::config::EngineConfig;
use crate::error::FetchError;
use crate::fetcher::{ChunkQuery, Generation, GenerationGuard, PartitionFetcher};
use crate::metrics::{PartitionMetrics, TimingGuard};
use crate::model::{Cursor, PageSize, PageWindow, Partition, RunTagFilter};
use crate::observability::partitions_span;
use crate::source::PartitionSource;

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Why a new fetch generation was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadReason {
    /// First load of a view.
    Initial,
    /// Run-tag filters changed.
    FiltersChanged,
    /// Page size changed.
    PageSizeChanged,
    /// A different partition set was selected.
    PartitionSetChanged,
    /// The user moved to another page.
    Navigation,
    /// Pagination was reset to the first page.
    Reset,
    /// Explicit refresh of the current page.
    Refresh,
}

impl LoadReason {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::FiltersChanged => "filters",
            Self::PageSizeChanged => "page_size",
            Self::PartitionSetChanged => "partition_set",
            Self::Navigation => "navigation",
            Self::Reset => "reset",
            Self::Refresh => "refresh",
        }
    }
}

/// Published retrieval state for the latest generation.
#[derive(Debug, Clone, Default)]
pub struct LoadSnapshot {
    /// Generation this state belongs to.
    pub generation: Generation,
    /// True while the generation is still fetching.
    pub loading: bool,
    /// Best-effort progress, 0..=100.
    pub loading_percent: u8,
    /// Partitions merged so far, in partition-set order.
    pub partitions: Vec<Partition>,
    /// Error that aborted the generation, if any.
    pub error: Option<FetchError>,
}

/// Progress notification emitted on every published change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Generation the event belongs to.
    pub generation: Generation,
    /// Partitions visible after the change.
    pub loaded: usize,
    /// Progress after the change.
    pub loading_percent: u8,
    /// Whether the generation is still loading.
    pub loading: bool,
}

/// A fully loaded page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    /// Generation that produced the page.
    pub generation: Generation,
    /// Partitions in partition-set order.
    pub partitions: Vec<Partition>,
    /// Cursor of the following page, if any.
    pub next_cursor: Option<Cursor>,
    /// Number of chunk fetches issued.
    pub chunks_fetched: usize,
}

/// Result of driving one generation.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The page loaded and was published.
    Completed(PageOutcome),
    /// A newer generation started; nothing was published.
    Superseded {
        /// The generation that was dropped.
        generation: Generation,
    },
}

impl LoadOutcome {
    /// Returns the page if the load completed.
    #[must_use]
    pub fn completed(self) -> Option<PageOutcome> {
        match self {
            Self::Completed(page) => Some(page),
            Self::Superseded { .. } => None,
        }
    }

    /// Returns true if the load was dropped as stale.
    #[must_use]
    pub const fn is_superseded(&self) -> bool {
        matches!(self, Self::Superseded { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct FanOutStart {
    offset: usize,
    chunk_size: usize,
    has_more: bool,
}

#[derive(Debug)]
struct PlannedChunk {
    ordinal: usize,
    cursor: Cursor,
    limit: usize,
}

/// Drives chunked fetches for one view and owns its published state.
///
/// The scheduler is used through `&self`: one task may await
/// [`ChunkScheduler::load`] while another calls [`ChunkScheduler::begin`] to
/// supersede it. Only results tagged with the latest generation are ever
/// written to the snapshot.
#[derive(Debug)]
pub struct ChunkScheduler<S> {
    fetcher: PartitionFetcher<S>,
    max_concurrent_chunks: usize,
    default_page_size: PageSize,
    latest: watch::Sender<Generation>,
    state: RwLock<LoadSnapshot>,
    progress: broadcast::Sender<ProgressEvent>,
    metrics: PartitionMetrics,
}

impl<S: PartitionSource> ChunkScheduler<S> {
    /// Creates a scheduler over `source`.
    #[must_use]
    pub fn new(source: S, config: &EngineConfig) -> Self {
        let (latest, _) = watch::channel(Generation::INITIAL);
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self {
            fetcher: PartitionFetcher::new(source, config.max_chunk_size.get()),
            max_concurrent_chunks: config.max_concurrent_chunks.get(),
            default_page_size: config.default_page(),
            latest,
            state: RwLock::new(LoadSnapshot::default()),
            progress,
            metrics: PartitionMetrics::new(),
        }
    }

    /// Returns the chunk fetcher.
    #[must_use]
    pub const fn fetcher(&self) -> &PartitionFetcher<S> {
        &self.fetcher
    }

    /// Page size for views that do not choose one.
    #[must_use]
    pub const fn default_page_size(&self) -> PageSize {
        self.default_page_size
    }

    /// Returns the latest generation.
    #[must_use]
    pub fn current_generation(&self) -> Generation {
        *self.latest.borrow()
    }

    /// Returns a copy of the published state.
    #[must_use]
    pub fn snapshot(&self) -> LoadSnapshot {
        self.read_state().clone()
    }

    /// Subscribes to progress events for all future generations.
    #[must_use]
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Starts a new generation and invalidates every older one.
    ///
    /// The published state is reset immediately to an empty, loading page at
    /// 0%. In-flight fetches of older generations resolve as cancelled.
    pub fn begin(&self, reason: LoadReason) -> Generation {
        let mut started = Generation::INITIAL;
        self.latest.send_modify(|current| {
            *current = current.next();
            started = *current;
        });

        let reset = {
            let mut state = self.write_state();
            let newer = state.generation < started;
            if newer {
                *state = LoadSnapshot {
                    generation: started,
                    loading: true,
                    ..LoadSnapshot::default()
                };
            }
            newer
        };
        if reset {
            self.emit(started, 0, 0, true);
        }

        self.metrics.record_generation_started(reason.as_str());
        info!(
            generation = started.get(),
            reason = reason.as_str(),
            "started partition fetch generation"
        );
        started
    }

    /// Loads the page described by `window` for `generation`.
    ///
    /// Returns [`LoadOutcome::Superseded`] if a newer generation started
    /// before or during the load; stale results are never published.
    ///
    /// # Errors
    ///
    /// Returns the first chunk error for the generation. Cancellation is not
    /// an error.
    pub async fn load(
        &self,
        generation: Generation,
        partition_set: &str,
        filters: &[RunTagFilter],
        window: &PageWindow,
    ) -> Result<LoadOutcome, FetchError> {
        let span = partitions_span("load_page", partition_set, generation);
        self.drive(generation, partition_set, filters, window)
            .instrument(span)
            .await
    }

    #[allow(clippy::too_many_lines)]
    async fn drive(
        &self,
        generation: Generation,
        partition_set: &str,
        filters: &[RunTagFilter],
        window: &PageWindow,
    ) -> Result<LoadOutcome, FetchError> {
        let guard = GenerationGuard::new(generation, self.latest.subscribe());
        if !guard.is_current() {
            return Ok(self.superseded(generation));
        }

        let metrics = self.metrics;
        let page_mode = window.page_size.mode();
        let _timer = TimingGuard::new(|elapsed| metrics.observe_page_load(page_mode, elapsed));

        let target = window.page_size.limit();
        let max_chunk = self.fetcher.max_chunk_size();
        let mut merger = ChunkMerger::new();
        let mut progress = Progress::new(target);
        let mut chunks_fetched = 0usize;

        // The first chunk reports the total and decides whether to fan out.
        let first_limit = chunk_limit(target, 0, max_chunk).unwrap_or(max_chunk);
        let first_query = ChunkQuery {
            partition_set,
            filters,
            cursor: window.cursor.as_ref(),
            limit: first_limit,
        };
        let first = match self.fetcher.fetch(&first_query, &guard).await {
            Ok(page) => page,
            Err(err) => return self.fail(generation, err),
        };
        chunks_fetched += 1;
        progress.observe_total(first.total_approx);

        let first_len = first.partitions.len();
        let mut next_cursor = if first_len == 0 {
            None
        } else {
            first.next_cursor
        };
        // A short first chunk that still has a next cursor means the source
        // caps its page size below ours.
        let chunk_size = if first_len < first_limit {
            first_len
        } else {
            max_chunk
        };
        let plan = self.plan_fan_out(
            partition_set,
            window,
            target,
            first.total_approx,
            FanOutStart {
                offset: first_len,
                chunk_size,
                has_more: next_cursor.is_some(),
            },
        );

        let more = !plan.is_empty() || needs_more(target, first_len, next_cursor.as_ref());
        let visible = merger.insert(0, first.partitions);
        let percent = more.then(|| progress.update(first_len, first_len));
        if !self.publish(generation, visible, percent) {
            return Ok(self.superseded(generation));
        }

        if let Some(last_ordinal) = plan.last().map(|chunk| chunk.ordinal) {
            debug!(
                generation = generation.get(),
                chunks = plan.len(),
                chunk_size,
                concurrency = self.max_concurrent_chunks,
                "fanning out partition chunk fetches"
            );

            // Ordinal of the last chunk that may still be merged. A chunk that
            // comes back short leaves a gap before the next planned offset, so
            // everything after it is dropped and the page continues from its
            // cursor instead.
            let cutoff = AtomicUsize::new(last_ordinal);
            let cutoff = &cutoff;
            let guard = &guard;
            let mut fetches = pin!(
                futures::stream::iter(plan)
                    .map(|chunk| async move {
                        if chunk.ordinal > cutoff.load(Ordering::Relaxed) {
                            return (chunk.ordinal, chunk.limit, None);
                        }
                        let result = {
                            let query = ChunkQuery {
                                partition_set,
                                filters,
                                cursor: Some(&chunk.cursor),
                                limit: chunk.limit,
                            };
                            self.fetcher.fetch(&query, guard).await
                        };
                        (chunk.ordinal, chunk.limit, Some(result))
                    })
                    .buffer_unordered(self.max_concurrent_chunks)
            );

            next_cursor = None;
            while let Some((ordinal, limit, result)) = fetches.next().await {
                let Some(result) = result else {
                    continue;
                };
                chunks_fetched += 1;
                if ordinal > cutoff.load(Ordering::Relaxed) {
                    continue;
                }
                let page = match result {
                    Ok(page) => page,
                    Err(err) => return self.fail(generation, err),
                };

                let returned = page.partitions.len();
                if returned < limit {
                    cutoff.store(ordinal, Ordering::Relaxed);
                    merger.discard_after(ordinal);
                    next_cursor = if returned == 0 { None } else { page.next_cursor };
                    debug!(
                        generation = generation.get(),
                        ordinal,
                        returned,
                        limit,
                        "short partition chunk, continuing sequentially"
                    );
                } else if ordinal == cutoff.load(Ordering::Relaxed) {
                    next_cursor = page.next_cursor;
                }
                let before = merger.len();
                let visible = merger.insert(ordinal, page.partitions).to_vec();
                let loaded = before + visible.len();
                let more = merger.next_ordinal() <= cutoff.load(Ordering::Relaxed)
                    || needs_more(target, loaded, next_cursor.as_ref());
                let percent = more.then(|| progress.update(loaded, returned));
                if !self.publish(generation, &visible, percent) {
                    return Ok(self.superseded(generation));
                }
            }
            debug_assert!(!merger.has_pending(), "every planned chunk was merged");
        }

        while let Some(cursor) = next_cursor.take() {
            let loaded = merger.len();
            let Some(limit) = chunk_limit(target, loaded, max_chunk) else {
                next_cursor = Some(cursor);
                break;
            };
            let query = ChunkQuery {
                partition_set,
                filters,
                cursor: Some(&cursor),
                limit,
            };
            let page = match self.fetcher.fetch(&query, &guard).await {
                Ok(page) => page,
                Err(err) => return self.fail(generation, err),
            };
            chunks_fetched += 1;
            progress.observe_total(page.total_approx.map(|rest| loaded + rest));

            let returned = page.partitions.len();
            next_cursor = if returned == 0 { None } else { page.next_cursor };
            let ordinal = merger.next_ordinal();
            let visible = merger.insert(ordinal, page.partitions);
            let loaded = loaded + visible.len();
            let percent = needs_more(target, loaded, next_cursor.as_ref())
                .then(|| progress.update(loaded, returned));
            if !self.publish(generation, visible, percent) {
                return Ok(self.superseded(generation));
            }
        }

        let partitions = merger.into_partitions();
        if !self.complete(generation, partitions.len()) {
            return Ok(self.superseded(generation));
        }
        self.metrics.set_partitions_loaded(partitions.len());
        info!(
            generation = generation.get(),
            partitions = partitions.len(),
            chunks = chunks_fetched,
            has_next_page = next_cursor.is_some(),
            "partition page loaded"
        );

        Ok(LoadOutcome::Completed(PageOutcome {
            generation,
            partitions,
            next_cursor,
            chunks_fetched,
        }))
    }

    /// Plans the remaining chunks of a page for concurrent fetching.
    ///
    /// Empty when concurrency is disabled, the total is unknown, or the
    /// source cannot seek.
    fn plan_fan_out(
        &self,
        partition_set: &str,
        window: &PageWindow,
        target: Option<usize>,
        total: Option<usize>,
        start: FanOutStart,
    ) -> Vec<PlannedChunk> {
        let Some(total) = total else {
            return Vec::new();
        };
        if self.max_concurrent_chunks < 2 || !start.has_more || start.chunk_size == 0 {
            return Vec::new();
        }

        let goal = target.map_or(total, |target| target.min(total));
        let mut plan = Vec::new();
        let mut offset = start.offset;
        while offset < goal {
            let Some(cursor) =
                self.fetcher
                    .source()
                    .seek(partition_set, window.cursor.as_ref(), offset)
            else {
                return Vec::new();
            };
            let limit = (goal - offset).min(start.chunk_size);
            plan.push(PlannedChunk {
                ordinal: plan.len() + 1,
                cursor,
                limit,
            });
            offset += limit;
        }
        plan
    }

    /// Appends newly merged partitions to the snapshot.
    ///
    /// `percent` is `None` for the final chunk, whose progress is reported by
    /// completion. Returns false if `generation` is no longer current.
    fn publish(&self, generation: Generation, visible: &[Partition], percent: Option<u8>) -> bool {
        let update = {
            let mut state = self.write_state();
            if state.generation != generation {
                None
            } else {
                state.partitions.extend_from_slice(visible);
                if let Some(percent) = percent {
                    state.loading_percent = state.loading_percent.max(percent);
                }
                Some((state.partitions.len(), state.loading_percent))
            }
        };
        let Some((loaded, percent)) = update else {
            return false;
        };
        if !visible.is_empty() || percent > 0 {
            self.emit(generation, loaded, percent, true);
        }
        true
    }

    fn complete(&self, generation: Generation, loaded: usize) -> bool {
        let completed = {
            let mut state = self.write_state();
            let current = state.generation == generation;
            if current {
                state.loading = false;
                state.loading_percent = 100;
                state.error = None;
            }
            current
        };
        if completed {
            self.emit(generation, loaded, 100, false);
        }
        completed
    }

    fn fail(&self, generation: Generation, err: FetchError) -> Result<LoadOutcome, FetchError> {
        if err.is_cancelled() {
            return Ok(self.superseded(generation));
        }

        let recorded = {
            let mut state = self.write_state();
            let current = state.generation == generation;
            if current {
                state.loading = false;
                state.partitions.clear();
                state.error = Some(err.clone());
            }
            current.then_some(state.loading_percent)
        };
        let Some(percent) = recorded else {
            return Ok(self.superseded(generation));
        };

        self.emit(generation, 0, percent, false);
        warn!(
            generation = generation.get(),
            kind = err.kind(),
            error = %err,
            "partition page fetch failed"
        );
        Err(err)
    }

    fn superseded(&self, generation: Generation) -> LoadOutcome {
        self.metrics.record_superseded();
        debug!(
            generation = generation.get(),
            latest = self.current_generation().get(),
            "dropping superseded partition fetch"
        );
        LoadOutcome::Superseded { generation }
    }

    fn emit(&self, generation: Generation, loaded: usize, loading_percent: u8, loading: bool) {
        // No subscribers is fine.
        let _ = self.progress.send(ProgressEvent {
            generation,
            loaded,
            loading_percent,
            loading,
        });
    }

    // The snapshot is only ever replaced or appended under the lock, so a
    // poisoned lock still guards a consistent value.
    fn read_state(&self) -> RwLockReadGuard<'_, LoadSnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LoadSnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Limit for the next chunk, `None` once a counted page is full.
fn chunk_limit(target: Option<usize>, loaded: usize, max_chunk: usize) -> Option<usize> {
    match target {
        Some(target) if loaded >= target => None,
        Some(target) => Some((target - loaded).min(max_chunk)),
        None => Some(max_chunk),
    }
}

fn needs_more(target: Option<usize>, loaded: usize, next_cursor: Option<&Cursor>) -> bool {
    next_cursor.is_some() && target.is_none_or(|target| loaded < target)
}
