//! Error types for partition retrieval.
//!
//! [`FetchError`] is the chunk-level taxonomy every [`PartitionSource`] speaks.
//! [`Error`] wraps it together with the configuration, backfill and pagination
//! failures surfaced by the view layer.
//!
//! [`PartitionSource`]: crate::source::PartitionSource

use std::sync::Arc;

use crate::fetcher::Generation;

/// The result type used throughout arco-partitions.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while fetching a chunk of partitions.
///
/// `Clone` so a failed page can stay attached to published snapshots.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Transient transport failure. Retried by re-invoking the load.
    #[error("network error: {message}")]
    Network {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// Malformed partition-set name, filter, cursor or limit.
    #[error("invalid partition request: {message}")]
    Invalid {
        /// Description of what was rejected.
        message: String,
    },

    /// A newer fetch generation superseded this request.
    #[error("fetch for generation {generation} was superseded")]
    Cancelled {
        /// The generation the request belonged to.
        generation: Generation,
    },
}

impl FetchError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network error with a source.
    #[must_use]
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates an invalid-request error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Returns true if re-invoking the same request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns true if the request was superseded rather than failed.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Invalid { .. } => "invalid",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Errors surfaced by the retrieval engine and the partition view.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value was missing or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A page fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The backfill collaborator rejected a launch.
    #[error("backfill launch failed: {message}")]
    Backfill {
        /// Description of the failure.
        message: String,
    },

    /// A navigation operation was not valid in the current state.
    #[error("pagination error: {message}")]
    Pagination {
        /// Why the navigation was rejected.
        message: String,
    },
}

impl Error {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a backfill error.
    #[must_use]
    pub fn backfill(message: impl Into<String>) -> Self {
        Self::Backfill {
            message: message.into(),
        }
    }

    /// Creates a pagination error.
    #[must_use]
    pub fn pagination(message: impl Into<String>) -> Self {
        Self::Pagination {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn network_error_is_retriable() {
        let err = FetchError::network("connection reset");
        assert!(err.is_retriable());
        assert_eq!(err.kind(), "network");
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn invalid_and_cancelled_are_not_retriable() {
        assert!(!FetchError::invalid("bad tag").is_retriable());
        let cancelled = FetchError::Cancelled {
            generation: Generation::new(3),
        };
        assert!(!cancelled.is_retriable());
        assert!(cancelled.is_cancelled());
        assert!(cancelled.to_string().contains('3'));
    }

    #[test]
    fn network_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = FetchError::network_with_source("upstream timed out", source);
        assert!(StdError::source(&err).is_some());
        let cloned = err.clone();
        assert!(StdError::source(&cloned).is_some());
    }

    #[test]
    fn fetch_error_converts_transparently() {
        let err: Error = FetchError::invalid("unknown token 'status'").into();
        assert_eq!(
            err.to_string(),
            "invalid partition request: unknown token 'status'"
        );
    }
}
