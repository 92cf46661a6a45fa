//! In-memory partition source for testing and local inspection.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: data lives only in this process
//! - **No latency**: every fetch resolves immediately; wrap it with the
//!   simulation harness in `arco-test-utils` to model a slow network

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{ChunkRequest, PartitionSource, PartitionsPage};
use crate::error::FetchError;
use crate::model::{Cursor, PartitionSet};

const OFFSET_PREFIX: &str = "offset:";

/// Converts a lock poison error to a fetch error.
fn poison_err<T>(_: PoisonError<T>) -> FetchError {
    FetchError::network("partition source lock poisoned")
}

/// In-memory source holding named partition sets.
///
/// Cursors are positional (`offset:N`), so the source supports
/// [`PartitionSource::seek`]. Filters are applied server-side and every page
/// reports `total_approx`.
///
/// ## Example
///
/// ```rust
/// use arco_partitions::model::{Partition, PartitionSet};
/// use arco_partitions::source::memory::InMemoryPartitionSource;
///
/// let source = InMemoryPartitionSource::new();
/// source.insert_set(PartitionSet::new("daily", vec![Partition::new("2024-01-01")]));
/// assert_eq!(source.set_len("daily"), Some(1));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryPartitionSource {
    sets: RwLock<HashMap<String, PartitionSet>>,
    fetch_count: AtomicUsize,
}

impl InMemoryPartitionSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding a single partition set.
    #[must_use]
    pub fn with_set(set: PartitionSet) -> Self {
        let source = Self::new();
        source.insert_set(set);
        source
    }

    /// Inserts or replaces a partition set.
    pub fn insert_set(&self, set: PartitionSet) {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        sets.insert(set.name.clone(), set);
    }

    /// Returns the number of partitions in a set.
    #[must_use]
    pub fn set_len(&self, name: &str) -> Option<usize> {
        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        sets.get(name).map(|set| set.partitions.len())
    }

    /// Returns how many fetches this source has served.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Encodes an offset as a cursor.
    #[must_use]
    pub fn cursor_at(offset: usize) -> Cursor {
        Cursor::new(format!("{OFFSET_PREFIX}{offset}"))
    }

    fn decode_cursor(cursor: Option<&Cursor>) -> Result<usize, FetchError> {
        let Some(cursor) = cursor else {
            return Ok(0);
        };
        cursor
            .as_str()
            .strip_prefix(OFFSET_PREFIX)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| FetchError::invalid(format!("malformed cursor '{cursor}'")))
    }
}

#[async_trait]
impl PartitionSource for InMemoryPartitionSource {
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let offset = Self::decode_cursor(request.cursor.as_ref())?;

        let sets = self.sets.read().map_err(poison_err)?;
        let Some(set) = sets.get(&request.partition_set) else {
            return Err(FetchError::invalid(format!(
                "partition set '{}' not found",
                request.partition_set
            )));
        };

        let len = set.partitions.len();
        let start = offset.min(len);
        let end = start.saturating_add(request.limit).min(len);
        let partitions = set.partitions[start..end]
            .iter()
            .cloned()
            .map(|mut partition| {
                partition.retain_matching(&request.filters);
                partition
            })
            .collect();
        drop(sets);

        Ok(PartitionsPage {
            partitions,
            next_cursor: (end < len).then(|| Self::cursor_at(end)),
            total_approx: Some(len - start),
        })
    }

    fn seek(&self, partition_set: &str, from: Option<&Cursor>, skip: usize) -> Option<Cursor> {
        let offset = Self::decode_cursor(from).ok()?.checked_add(skip)?;
        let len = self.set_len(partition_set)?;
        (offset < len).then(|| Self::cursor_at(offset))
    }
}
