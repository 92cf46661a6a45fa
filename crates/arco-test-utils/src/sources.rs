//! Partition sources that bend the source contract the way real transports do.
//!
//! - [`CappedPartitionSource`] enforces a server-side maximum page size, so
//!   chunks come back shorter than requested while cursors stay positional.
//! - [`OpaqueCursorSource`] hides positional cursors and the remaining-count
//!   estimate, so every page must be followed cursor by cursor.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use arco_partitions::error::FetchError;
use arco_partitions::model::{Cursor, PartitionSet};
use arco_partitions::source::{ChunkRequest, PartitionSource, PartitionsPage};

use crate::fixtures::PartitionSetFactory;

const OPAQUE_PREFIX: &str = "opaque:";

/// How a test source paginates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceShape {
    /// Full pages, positional cursors and a remaining count.
    Positional,
    /// Positional, but no page holds more than the given number.
    Capped(usize),
    /// Opaque cursors and no remaining count.
    Opaque,
}

impl SourceShape {
    /// Builds an in-memory source over `set` with this shape.
    #[must_use]
    pub fn source(self, set: PartitionSet) -> Arc<dyn PartitionSource> {
        let inner = PartitionSetFactory::source(set);
        match self {
            Self::Positional => inner,
            Self::Capped(cap) => Arc::new(CappedPartitionSource::new(inner, cap)),
            Self::Opaque => Arc::new(OpaqueCursorSource::new(inner)),
        }
    }
}

/// Returns at most `cap` partitions per call, whatever the request asks for.
#[derive(Debug)]
pub struct CappedPartitionSource<S> {
    inner: S,
    cap: usize,
    first_capped_call: usize,
    calls: AtomicUsize,
}

impl<S> CappedPartitionSource<S> {
    /// Caps every call at `cap` partitions.
    #[must_use]
    pub fn new(inner: S, cap: usize) -> Self {
        Self {
            inner,
            cap,
            first_capped_call: 1,
            calls: AtomicUsize::new(0),
        }
    }

    /// Leaves calls before the 1-based `call` uncapped.
    ///
    /// Useful to make the first chunk look like a full page so that later
    /// chunks are the short ones.
    #[must_use]
    pub const fn with_cap_from_call(mut self, call: usize) -> Self {
        self.first_capped_call = call;
        self
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: PartitionSource> PartitionSource for CappedPartitionSource<S> {
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.first_capped_call || request.limit <= self.cap {
            return self.inner.fetch_partitions(request).await;
        }
        let capped = ChunkRequest {
            limit: self.cap,
            ..request.clone()
        };
        self.inner.fetch_partitions(&capped).await
    }

    fn seek(&self, partition_set: &str, from: Option<&Cursor>, skip: usize) -> Option<Cursor> {
        self.inner.seek(partition_set, from, skip)
    }
}

/// Wraps cursors in tokens the engine cannot seek with and drops
/// `total_approx`.
#[derive(Debug)]
pub struct OpaqueCursorSource<S> {
    inner: S,
}

impl<S> OpaqueCursorSource<S> {
    /// Wraps `inner`.
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }

    fn wrap(cursor: &Cursor) -> Cursor {
        let hex: String = cursor.as_str().bytes().map(|b| format!("{b:02x}")).collect();
        Cursor::new(format!("{OPAQUE_PREFIX}{hex}"))
    }

    fn unwrap_cursor(cursor: &Cursor) -> Result<Cursor, FetchError> {
        let malformed = || FetchError::invalid(format!("malformed cursor '{cursor}'"));
        let hex = cursor
            .as_str()
            .strip_prefix(OPAQUE_PREFIX)
            .ok_or_else(malformed)?;
        if hex.len() % 2 != 0 {
            return Err(malformed());
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| malformed())?;
        String::from_utf8(bytes)
            .map(Cursor::new)
            .map_err(|_| malformed())
    }
}

#[async_trait]
impl<S: PartitionSource> PartitionSource for OpaqueCursorSource<S> {
    async fn fetch_partitions(&self, request: &ChunkRequest) -> Result<PartitionsPage, FetchError> {
        let cursor = request.cursor.as_ref().map(Self::unwrap_cursor).transpose()?;
        let inner_request = ChunkRequest {
            cursor,
            ..request.clone()
        };
        let page = self.inner.fetch_partitions(&inner_request).await?;
        Ok(PartitionsPage {
            partitions: page.partitions,
            next_cursor: page.next_cursor.as_ref().map(Self::wrap),
            total_approx: None,
        })
    }
}
