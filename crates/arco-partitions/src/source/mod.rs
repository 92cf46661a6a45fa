//! Upstream partition data sources.
//!
//! The [`PartitionSource`] trait is the only contract the engine needs from the
//! transport. Implementations may target the dashboard GraphQL API, a
//! catalog service, or in-memory fixtures ([`memory::InMemoryPartitionSource`]).
//!
//! ## Contract
//!
//! - **Bounded**: never return more than `limit` partitions
//! - **Ordered**: partitions come back in partition-set definition order
//! - **Idempotent**: identical requests return identical pages
//! - **Read-only**: fetching never mutates upstream state

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::{Cursor, Partition, RunTagFilter};

/// One bounded request against a partition set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Partition set to read from.
    pub partition_set: String,
    /// Where to start; `None` is the beginning of the set.
    pub cursor: Option<Cursor>,
    /// Maximum number of partitions to return.
    pub limit: usize,
    /// Conjunctive run filters.
    pub filters: Vec<RunTagFilter>,
}

/// A page of partitions returned by a source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionsPage {
    /// Partitions in definition order.
    pub partitions: Vec<Partition>,
    /// Cursor for the next chunk; `None` once the set is exhausted.
    pub next_cursor: Option<Cursor>,
    /// Approximate number of partitions remaining from the request cursor,
    /// including the ones in this page.
    pub total_approx: Option<usize>,
}

/// Source of partition records for a named partition set.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` so that one source can serve concurrent
/// chunk fetches.
#[async_trait]
pub trait PartitionSource: Send + Sync {
    /// Fetches up to `request.limit` partitions starting at `request.cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Invalid`] for unknown partition sets or malformed
    /// cursors, and [`FetchError::Network`] for transport failures.
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError>;

    /// Returns the cursor `skip` partitions past `from`, if the source
    /// supports positional cursors.
    ///
    /// Sources that return `Some` here let the scheduler fetch several chunks
    /// of one page concurrently.
    fn seek(&self, partition_set: &str, from: Option<&Cursor>, skip: usize) -> Option<Cursor> {
        let _ = (partition_set, from, skip);
        None
    }
}

#[async_trait]
impl<S> PartitionSource for Arc<S>
where
    S: PartitionSource + ?Sized,
{
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError> {
        (**self).fetch_partitions(request).await
    }

    fn seek(&self, partition_set: &str, from: Option<&Cursor>, skip: usize) -> Option<Cursor> {
        (**self).seek(partition_set, from, skip)
    }
}
