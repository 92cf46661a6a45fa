//! Engine configuration.
//!
//! Limits are explicit and loaded from the environment with strict
//! validation, so a misconfigured deployment fails at startup rather than
//! silently falling back.

use std::num::NonZeroUsize;

use crate::error::{Error, Result};
use crate::model::{DEFAULT_PAGE_SIZE, PageSize};

const ENV_MAX_CHUNK_SIZE: &str = "ARCO_PARTITIONS_MAX_CHUNK_SIZE";
const ENV_MAX_CONCURRENT_CHUNKS: &str = "ARCO_PARTITIONS_MAX_CONCURRENT_CHUNKS";
const ENV_DEFAULT_PAGE_SIZE: &str = "ARCO_PARTITIONS_DEFAULT_PAGE_SIZE";

const DEFAULT_MAX_CHUNK_SIZE: usize = 50;
const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 4;

/// Limits for chunked partition retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on partitions requested per chunk.
    pub max_chunk_size: NonZeroUsize,
    /// Upper bound on chunk fetches in flight for one page.
    pub max_concurrent_chunks: NonZeroUsize,
    /// Page size used when a view does not request one.
    pub default_page_size: NonZeroUsize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: NonZeroUsize::new(DEFAULT_MAX_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            max_concurrent_chunks: NonZeroUsize::new(DEFAULT_MAX_CONCURRENT_CHUNKS)
                .unwrap_or(NonZeroUsize::MIN),
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is present but is not a
    /// positive integer.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_chunk_size: parse_positive_env(&get_env, ENV_MAX_CHUNK_SIZE)?
                .unwrap_or(defaults.max_chunk_size),
            max_concurrent_chunks: parse_positive_env(&get_env, ENV_MAX_CONCURRENT_CHUNKS)?
                .unwrap_or(defaults.max_concurrent_chunks),
            default_page_size: parse_positive_env(&get_env, ENV_DEFAULT_PAGE_SIZE)?
                .unwrap_or(defaults.default_page_size),
        })
    }

    /// Sets the maximum chunk size.
    #[must_use]
    pub const fn with_max_chunk_size(mut self, size: NonZeroUsize) -> Self {
        self.max_chunk_size = size;
        self
    }

    /// Sets the maximum number of concurrent chunk fetches.
    #[must_use]
    pub const fn with_max_concurrent_chunks(mut self, count: NonZeroUsize) -> Self {
        self.max_concurrent_chunks = count;
        self
    }

    /// Returns the configured default page size.
    #[must_use]
    pub const fn default_page(&self) -> PageSize {
        PageSize::Count(self.default_page_size)
    }
}

fn parse_positive_env<F>(get_env: &F, key: &str) -> Result<Option<NonZeroUsize>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(None);
    };

    let parsed = raw.trim().parse::<usize>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    NonZeroUsize::new(parsed)
        .map(Some)
        .ok_or_else(|| Error::configuration(format!("{key} must be greater than zero")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_env_with(env_from(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_chunk_size.get(), 50);
        assert_eq!(config.max_concurrent_chunks.get(), 4);
        assert_eq!(config.default_page().limit(), Some(30));
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = EngineConfig::from_env_with(env_from(&[
            (ENV_MAX_CHUNK_SIZE, "25"),
            (ENV_MAX_CONCURRENT_CHUNKS, "1"),
            (ENV_DEFAULT_PAGE_SIZE, "100"),
        ]))
        .unwrap();
        assert_eq!(config.max_chunk_size.get(), 25);
        assert_eq!(config.max_concurrent_chunks.get(), 1);
        assert_eq!(config.default_page_size.get(), 100);
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = EngineConfig::from_env_with(env_from(&[(ENV_MAX_CHUNK_SIZE, "0")])).unwrap_err();
        assert!(err.to_string().contains("greater than zero"));

        let err = EngineConfig::from_env_with(env_from(&[(ENV_MAX_CONCURRENT_CHUNKS, "many")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_CONCURRENT_CHUNKS));
    }
}
