//! # arco-partitions
//!
//! Chunked, filtered, paginated retrieval of partitions and their runs for
//! the Arco partition run matrix.
//!
//! This crate provides:
//!
//! - **Bounded fetches**: every request to a [`source::PartitionSource`] is
//!   clamped to a maximum chunk size
//! - **Fetch generations**: a newer request immediately invalidates older
//!   ones, and stale results are never published
//! - **Ordered fan-out**: chunks fetched concurrently are merged in sequence
//!   order, not arrival order
//! - **Pagination**: a cursor history for page-back / page-forward navigation
//! - **Step-key aggregation**: the distinct step keys across loaded partitions
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use arco_partitions::config::EngineConfig;
//! use arco_partitions::error::Result;
//! use arco_partitions::model::{Partition, PartitionSet, PageSize};
//! use arco_partitions::source::memory::InMemoryPartitionSource;
//! use arco_partitions::view::{PartitionView, ViewParams};
//!
//! # async fn example() -> Result<()> {
//! let partitions = (0..45).map(|i| Partition::new(format!("2024-01-{i:02}"))).collect();
//! let set = PartitionSet::new("daily", partitions);
//! let source = Arc::new(InMemoryPartitionSource::with_set(set));
//!
//! let params = ViewParams::new("daily").with_page_size(PageSize::default());
//! let mut view = PartitionView::new(params, source, &EngineConfig::from_env()?);
//! view.load().await?;
//! assert_eq!(view.snapshot().partitions.len(), 30);
//!
//! view.advance()?;
//! view.load().await?;
//! assert_eq!(view.snapshot().partitions.len(), 15);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod backfill;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod matrix;
pub mod metrics;
pub mod model;
pub mod observability;
pub mod pagination;
pub mod scheduler;
pub mod source;
pub mod view;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregate::{StepKeyAggregator, StepKeySet, aggregate_step_keys};
    pub use crate::backfill::{BackfillId, BackfillLauncher, InMemoryBackfillLauncher};
    pub use crate::config::EngineConfig;
    pub use crate::error::{Error, FetchError, Result};
    pub use crate::fetcher::{Generation, PartitionFetcher};
    pub use crate::matrix::PartitionRunMatrix;
    pub use crate::model::{
        Cursor, PageSize, PageWindow, Partition, PartitionSet, Run, RunStatus, RunTagFilter,
        StepStat, StepStatus,
    };
    pub use crate::pagination::PaginationController;
    pub use crate::scheduler::{ChunkScheduler, LoadOutcome, LoadReason, LoadSnapshot};
    pub use crate::source::PartitionSource;
    pub use crate::view::{PartitionView, ViewParams, ViewSnapshot};
}
