//! Logging setup and span helpers.
//!
//! All retrieval work runs inside a `partitions` span carrying the operation,
//! partition set and fetch generation, so interleaved generations can be told
//! apart in the logs.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::fetcher::Generation;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Pretty-printed logs.
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call more than once; later calls are no-ops. `RUST_LOG` controls
/// the levels (for example `arco_partitions=debug`) and defaults to `info`.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        // A subscriber may already be installed by an embedding application.
        let _ = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
    });
}

/// Creates a span for partition retrieval operations.
///
/// # Example
///
/// ```rust
/// use arco_partitions::fetcher::Generation;
/// use arco_partitions::observability::partitions_span;
///
/// let span = partitions_span("load_page", "daily_partitions", Generation::new(1));
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn partitions_span(operation: &str, partition_set: &str, generation: Generation) -> Span {
    tracing::info_span!(
        "partitions",
        op = operation,
        partition_set = partition_set,
        generation = generation.get(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn span_helper_creates_span() {
        let span = partitions_span("load_page", "daily", Generation::new(7));
        let _guard = span.enter();
        tracing::info!("message in partitions span");
    }
}
