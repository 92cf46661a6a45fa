//! Bounded, generation-aware chunk fetches.
//!
//! [`PartitionFetcher`] validates a request, clamps its limit, runs it against
//! the [`PartitionSource`] and enforces the page contract on the response.
//! Every fetch is tied to a [`GenerationGuard`]. If a newer generation starts
//! while the source call is in flight, the call is abandoned and the fetch
//! resolves to [`FetchError::Cancelled`].

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::error::FetchError;
use crate::metrics::PartitionMetrics;
use crate::model::{Cursor, RunTagFilter};
use crate::source::{ChunkRequest, PartitionSource, PartitionsPage};

/// Monotonic counter distinguishing the current retrieval from superseded ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    /// Generation before any request was made.
    pub const INITIAL: Self = Self(0);

    /// Wraps a raw generation number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw generation number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the following generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ties a fetch to the generation that issued it.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    generation: Generation,
    latest: watch::Receiver<Generation>,
}

impl GenerationGuard {
    /// Creates a guard for `generation`, watching `latest` for newer ones.
    #[must_use]
    pub const fn new(generation: Generation, latest: watch::Receiver<Generation>) -> Self {
        Self { generation, latest }
    }

    /// Creates a guard that can never be superseded.
    ///
    /// Useful for one-off fetches outside a scheduler.
    #[must_use]
    pub fn detached() -> Self {
        let (_tx, rx) = watch::channel(Generation::INITIAL);
        Self::new(Generation::INITIAL, rx)
    }

    /// Returns the generation this guard belongs to.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns true while no newer generation has started.
    #[must_use]
    pub fn is_current(&self) -> bool {
        *self.latest.borrow() == self.generation
    }

    /// Resolves once a newer generation starts.
    ///
    /// Never resolves if the generation owner is dropped.
    pub async fn superseded(&self) {
        let mut latest = self.latest.clone();
        loop {
            if *latest.borrow_and_update() != self.generation {
                return;
            }
            if latest.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    fn cancelled(&self) -> FetchError {
        FetchError::Cancelled {
            generation: self.generation,
        }
    }
}

/// Parameters of one chunk fetch.
#[derive(Debug, Clone, Copy)]
pub struct ChunkQuery<'a> {
    /// Partition set to read from.
    pub partition_set: &'a str,
    /// Conjunctive run filters.
    pub filters: &'a [RunTagFilter],
    /// Where the chunk starts; `None` is the beginning of the set.
    pub cursor: Option<&'a Cursor>,
    /// Requested number of partitions, clamped to the chunk maximum.
    pub limit: usize,
}

/// Issues bounded-size fetches against a [`PartitionSource`].
#[derive(Debug)]
pub struct PartitionFetcher<S> {
    source: S,
    max_chunk_size: usize,
    metrics: PartitionMetrics,
}

impl<S: PartitionSource> PartitionFetcher<S> {
    /// Creates a fetcher that never requests more than `max_chunk_size`
    /// partitions at once.
    #[must_use]
    pub fn new(source: S, max_chunk_size: usize) -> Self {
        Self {
            source,
            max_chunk_size: max_chunk_size.max(1),
            metrics: PartitionMetrics::new(),
        }
    }

    /// Returns the wrapped source.
    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// Returns the per-chunk partition limit.
    #[must_use]
    pub const fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Checks a query without contacting the source.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Invalid`] for a blank partition-set name, a zero
    /// limit, or a malformed filter.
    pub fn validate(query: &ChunkQuery<'_>) -> Result<(), FetchError> {
        if query.partition_set.trim().is_empty() {
            return Err(FetchError::invalid("partition set name must not be empty"));
        }
        if query.limit == 0 {
            return Err(FetchError::invalid("chunk limit must be greater than zero"));
        }
        query.filters.iter().try_for_each(RunTagFilter::validate)
    }

    /// Fetches one chunk of partitions.
    ///
    /// The returned page holds at most `min(query.limit, max_chunk_size)`
    /// partitions, and each partition only carries runs that satisfy every
    /// filter, whether or not the source applied them.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Invalid`] for a malformed query or a source that broke
    ///   the page contract
    /// - [`FetchError::Network`] for transport failures
    /// - [`FetchError::Cancelled`] when `guard`'s generation was superseded
    pub async fn fetch(
        &self,
        query: &ChunkQuery<'_>,
        guard: &GenerationGuard,
    ) -> Result<PartitionsPage, FetchError> {
        let result = self.fetch_inner(query, guard).await;
        self.metrics
            .record_chunk_fetch(result.as_ref().map_or_else(FetchError::kind, |_| "ok"));
        result
    }

    async fn fetch_inner(
        &self,
        query: &ChunkQuery<'_>,
        guard: &GenerationGuard,
    ) -> Result<PartitionsPage, FetchError> {
        Self::validate(query)?;
        if !guard.is_current() {
            return Err(guard.cancelled());
        }

        let limit = query.limit.min(self.max_chunk_size);
        let request = ChunkRequest {
            partition_set: query.partition_set.to_string(),
            cursor: query.cursor.cloned(),
            limit,
            filters: query.filters.to_vec(),
        };

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = guard.superseded() => Err(guard.cancelled()),
            page = self.source.fetch_partitions(&request) => page,
        };
        self.metrics.observe_chunk_duration(started.elapsed());

        let mut page = result?;
        // A response that lands after a newer generation started is stale even
        // if the source finished first.
        if !guard.is_current() {
            return Err(guard.cancelled());
        }

        if page.partitions.len() > limit {
            let returned = page.partitions.len();
            page.partitions.truncate(limit);
            page.next_cursor = Some(
                self.source
                    .seek(query.partition_set, query.cursor, limit)
                    .ok_or_else(|| {
                        FetchError::invalid(format!(
                            "source returned {returned} partitions for a limit of {limit}"
                        ))
                    })?,
            );
        }
        for partition in &mut page.partitions {
            partition.retain_matching(query.filters);
        }

        debug!(
            generation = guard.generation().get(),
            cursor = query.cursor.map(Cursor::as_str),
            limit,
            returned = page.partitions.len(),
            has_more = page.next_cursor.is_some(),
            "fetched partition chunk"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::model::{Partition, PartitionSet, Run, RunStatus};
    use crate::source::memory::InMemoryPartitionSource;

    fn source(count: usize) -> Arc<InMemoryPartitionSource> {
        let partitions = (0..count)
            .map(|i| {
                Partition::new(format!("p{i}"))
                    .with_run(Run::new(format!("r{i}"), RunStatus::Success).with_tag("n", "1"))
            })
            .collect();
        Arc::new(InMemoryPartitionSource::with_set(PartitionSet::new(
            "daily", partitions,
        )))
    }

    fn query<'a>(filters: &'a [RunTagFilter], limit: usize) -> ChunkQuery<'a> {
        ChunkQuery {
            partition_set: "daily",
            filters,
            cursor: None,
            limit,
        }
    }

    #[tokio::test]
    async fn limit_is_clamped_to_max_chunk_size() {
        let fetcher = PartitionFetcher::new(source(100), 10);
        let page = fetcher
            .fetch(&query(&[], 75), &GenerationGuard::detached())
            .await
            .unwrap();
        assert_eq!(page.partitions.len(), 10);
        assert!(page.next_cursor.is_some());
    }

    #[tokio::test]
    async fn invalid_queries_never_reach_the_source() {
        let src = source(3);
        let fetcher = PartitionFetcher::new(Arc::clone(&src), 10);
        let guard = GenerationGuard::detached();

        let bad_filter = [RunTagFilter::new("status", "FAILURE")];
        let err = fetcher.fetch(&query(&bad_filter, 5), &guard).await.unwrap_err();
        assert_eq!(err.kind(), "invalid");

        let err = fetcher.fetch(&query(&[], 0), &guard).await.unwrap_err();
        assert_eq!(err.kind(), "invalid");

        let blank = ChunkQuery {
            partition_set: "  ",
            ..query(&[], 5)
        };
        assert!(fetcher.fetch(&blank, &guard).await.is_err());
        assert_eq!(src.fetch_count(), 0);
    }

    #[tokio::test]
    async fn identical_inputs_yield_identical_pages() {
        let fetcher = PartitionFetcher::new(source(20), 8);
        let guard = GenerationGuard::detached();
        let filters = [RunTagFilter::tag("n", "1")];
        let a = fetcher.fetch(&query(&filters, 8), &guard).await.unwrap();
        let b = fetcher.fetch(&query(&filters, 8), &guard).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn superseded_guard_cancels_before_fetching() {
        let (tx, rx) = watch::channel(Generation::new(1));
        let guard = GenerationGuard::new(Generation::new(1), rx);
        tx.send_replace(Generation::new(2));

        let src = source(5);
        let fetcher = PartitionFetcher::new(Arc::clone(&src), 5);
        let err = fetcher.fetch(&query(&[], 5), &guard).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(src.fetch_count(), 0);
    }

    /// Source that ignores the limit and never applies filters.
    struct Sloppy;

    #[async_trait]
    impl PartitionSource for Sloppy {
        async fn fetch_partitions(
            &self,
            _request: &ChunkRequest,
        ) -> Result<PartitionsPage, FetchError> {
            let partitions = (0..4)
                .map(|i| {
                    Partition::new(format!("s{i}"))
                        .with_run(Run::new("keep", RunStatus::Success).with_tag("env", "prod"))
                        .with_run(Run::new("drop", RunStatus::Success).with_tag("env", "dev"))
                })
                .collect();
            Ok(PartitionsPage {
                partitions,
                next_cursor: None,
                total_approx: None,
            })
        }
    }

    #[tokio::test]
    async fn source_contract_is_enforced() {
        let fetcher = PartitionFetcher::new(Sloppy, 10);
        let guard = GenerationGuard::detached();
        let filters = [RunTagFilter::tag("env", "prod")];

        let page = fetcher.fetch(&query(&filters, 10), &guard).await.unwrap();
        assert!(
            page.partitions
                .iter()
                .all(|p| p.runs.len() == 1 && p.runs[0].id.as_str() == "keep")
        );

        // Over-long pages cannot be truncated without a positional cursor.
        let err = fetcher.fetch(&query(&filters, 2), &guard).await.unwrap_err();
        assert_eq!(err.kind(), "invalid");
    }
}
