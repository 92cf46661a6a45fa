//! Shared test utilities for arco-partitions tests.
//!
//! This crate provides:
//! - [`SimulatedPartitionSource`]: seeded latency and fault injection around
//!   any partition source
//! - [`PartitionSetFactory`]: factory functions for partition sets
//! - [`CappedPartitionSource`] and [`OpaqueCursorSource`]: sources with short
//!   pages or non-positional cursors
//! - Custom assertion helpers for ordering and progress
//!
//! # Example
//!
//! ```rust,ignore
//! use arco_test_utils::{PartitionSetFactory, engine_config};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let source = PartitionSetFactory::source(PartitionSetFactory::daily("daily", 45));
//!     let config = engine_config(50, 4);
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod simulation;
pub mod sources;

pub use assertions::*;
pub use fixtures::*;
pub use simulation::*;
pub use sources::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("arco_partitions=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
