//! Backfill launching.
//!
//! Launching a backfill is delegated to a [`BackfillLauncher`]. The view then
//! narrows itself to the runs of that backfill through a tag filter built by
//! [`RunTagFilter::backfill`].

use std::fmt;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::model::RunTagFilter;

/// Tag key carried by every run a backfill launches.
pub const BACKFILL_TAG_KEY: &str = "dagster/backfill";

/// Identifier of a launched backfill.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackfillId(String);

impl BackfillId {
    /// Wraps an existing backfill id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackfillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl RunTagFilter {
    /// Creates the filter selecting runs launched by backfill `id`.
    #[must_use]
    pub fn backfill(id: &BackfillId) -> Self {
        Self::tag(BACKFILL_TAG_KEY, id.as_str())
    }
}

/// Starts backfills over a partition set.
#[async_trait]
pub trait BackfillLauncher: Send + Sync {
    /// Launches a backfill of `partition_set` restricted to `step_query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Backfill`] if the launch was rejected.
    async fn launch_backfill(&self, partition_set: &str, step_query: &str) -> Result<BackfillId>;
}

/// A recorded backfill launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillLaunch {
    /// Id assigned to the backfill.
    pub id: BackfillId,
    /// Partition set the backfill covers.
    pub partition_set: String,
    /// Step selection, passed through as given.
    pub step_query: String,
    /// When the launch was accepted.
    pub launched_at: DateTime<Utc>,
}

/// In-memory launcher that records launches.
#[derive(Debug, Default)]
pub struct InMemoryBackfillLauncher {
    launches: Mutex<Vec<BackfillLaunch>>,
}

impl InMemoryBackfillLauncher {
    /// Creates a launcher with no recorded launches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every launch so far, oldest first.
    #[must_use]
    pub fn launches(&self) -> Vec<BackfillLaunch> {
        self.launches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BackfillLauncher for InMemoryBackfillLauncher {
    async fn launch_backfill(&self, partition_set: &str, step_query: &str) -> Result<BackfillId> {
        if partition_set.trim().is_empty() {
            return Err(Error::backfill("partition set name must not be empty"));
        }

        let launch = BackfillLaunch {
            id: BackfillId::generate(),
            partition_set: partition_set.to_string(),
            step_query: step_query.to_string(),
            launched_at: Utc::now(),
        };
        let id = launch.id.clone();
        self.launches
            .lock()
            .map_err(|_| Error::backfill("launch log poisoned"))?
            .push(launch);

        info!(backfill_id = %id, partition_set, step_query, "launched backfill");
        Ok(id)
    }
}
