//! Consumer-facing partition view.
//!
//! A [`PartitionView`] combines the view parameters, the cursor history and a
//! [`ChunkScheduler`] into the state a partition run matrix renders from.
//!
//! Every state change is synchronous and only starts a new fetch generation;
//! the page itself is fetched by [`PartitionView::load`]. Starting a
//! generation immediately supersedes any load still in flight, so a view never
//! shows partitions fetched for parameters it no longer has.
//!
//! ```text
//! set_run_tags / set_page_size / set_partition_set ──► reset history ──┐
//! advance / retreat / reset / refresh ─────────────────────────────────┤
//!                                                                      ▼
//!                                        begin(reason) ──► load() ──► snapshot()
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregate::{StepKeyAggregator, StepKeySet};
use crate::backfill::{BackfillId, BackfillLauncher};
use crate::config::EngineConfig;
use crate::error::{Error, FetchError, Result};
use crate::fetcher::Generation;
use crate::matrix::PartitionRunMatrix;
use crate::model::{Cursor, PageSize, PageWindow, Partition, RunTagFilter};
use crate::pagination::PaginationController;
use crate::scheduler::{ChunkScheduler, LoadOutcome, LoadReason, PageOutcome};
use crate::source::PartitionSource;

const PARAM_PAGE_SIZE: &str = "pageSize";
const PARAM_STEP_QUERY: &str = "stepQuery";
const PARAM_TAGS: &str = "tags";

/// Parameters selecting what a view shows.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewParams {
    /// Partition set to show.
    pub partition_set: String,
    /// Partitions per page; `None` uses the engine's default page size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<PageSize>,
    /// Conjunctive run filters.
    #[serde(default)]
    pub run_tags: Vec<RunTagFilter>,
    /// Step selection for the run matrix. Never triggers a fetch.
    #[serde(default)]
    pub step_query: String,
}

impl ViewParams {
    /// Creates parameters for `partition_set` with the engine's default page
    /// size.
    #[must_use]
    pub fn new(partition_set: impl Into<String>) -> Self {
        Self {
            partition_set: partition_set.into(),
            ..Self::default()
        }
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the run filters.
    #[must_use]
    pub fn with_run_tags(mut self, run_tags: Vec<RunTagFilter>) -> Self {
        self.run_tags = run_tags;
        self
    }

    /// Sets the step query.
    #[must_use]
    pub fn with_step_query(mut self, step_query: impl Into<String>) -> Self {
        self.step_query = step_query.into();
        self
    }

    /// Decodes query-string state.
    ///
    /// `pageSize` is `all` or a positive integer; when absent the engine's
    /// default page size applies. `stepQuery` is passed through, and each
    /// `tags` entry of the form `key=value` becomes a tag filter. Other keys
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Invalid`] (wrapped in [`Error::Fetch`]) for a
    /// malformed page size or tag.
    pub fn from_query_pairs<I, K, V>(partition_set: impl Into<String>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = Self::new(partition_set);
        for (key, value) in pairs {
            let value = value.as_ref();
            match key.as_ref() {
                PARAM_PAGE_SIZE => params.page_size = Some(value.parse()?),
                PARAM_STEP_QUERY => params.step_query = value.to_string(),
                PARAM_TAGS => {
                    let filter = RunTagFilter::new(RunTagFilter::TAG_TOKEN, value);
                    filter.validate()?;
                    params.run_tags.push(filter);
                }
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Navigation affordances for the current page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationProps {
    /// A previous page exists.
    pub has_prev_cursor: bool,
    /// The current page is loaded and a following page exists.
    pub has_next_cursor: bool,
}

/// Everything a renderer needs, captured at one instant.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    /// Generation the published state belongs to.
    pub generation: Generation,
    /// True while the page is still fetching.
    pub loading: bool,
    /// Best-effort progress, 0..=100.
    pub loading_percent: u8,
    /// Partitions loaded so far, in partition-set order.
    pub partitions: Vec<Partition>,
    /// Error that aborted the page, if any.
    pub error: Option<FetchError>,
    /// Navigation affordances.
    pub pagination: PaginationProps,
    /// Step keys across `partitions`, in order of first sighting.
    pub step_keys: StepKeySet,
    /// Current step query.
    pub step_query: String,
    /// Current run filters.
    pub run_tags: Vec<RunTagFilter>,
}

impl ViewSnapshot {
    /// Builds the step-by-partition matrix for this snapshot.
    #[must_use]
    pub fn matrix(&self) -> PartitionRunMatrix {
        PartitionRunMatrix::build(&self.partitions, &self.step_keys)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageStatus {
    Pending,
    Loaded { next_cursor: Option<Cursor> },
    Failed,
}

/// A page load detached from the view, so it can run on another task.
///
/// Produced by [`PartitionView::start_load`]. The result must be handed back
/// through [`PartitionView::apply`].
#[derive(Debug)]
pub struct PendingLoad<S> {
    scheduler: Arc<ChunkScheduler<S>>,
    generation: Generation,
    partition_set: String,
    filters: Vec<RunTagFilter>,
    window: PageWindow,
}

impl<S: PartitionSource> PendingLoad<S> {
    /// Returns the generation this load belongs to.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Drives the load to completion, cancellation or failure.
    ///
    /// # Errors
    ///
    /// Returns the chunk error that aborted the page.
    pub async fn run(self) -> std::result::Result<LoadOutcome, FetchError> {
        self.scheduler
            .load(
                self.generation,
                &self.partition_set,
                &self.filters,
                &self.window,
            )
            .await
    }
}

/// One user's view over a paginated, filtered partition set.
#[derive(Debug)]
pub struct PartitionView<S> {
    scheduler: Arc<ChunkScheduler<S>>,
    params: ViewParams,
    pagination: PaginationController,
    generation: Generation,
    issued: bool,
    page: PageStatus,
    step_keys: Mutex<StepKeyAggregator>,
}

impl<S: PartitionSource> PartitionView<S> {
    /// Creates a view over `source` and starts its first generation.
    #[must_use]
    pub fn new(params: ViewParams, source: S, config: &EngineConfig) -> Self {
        Self::with_scheduler(params, Arc::new(ChunkScheduler::new(source, config)))
    }

    /// Creates a view driving an existing scheduler.
    #[must_use]
    pub fn with_scheduler(params: ViewParams, scheduler: Arc<ChunkScheduler<S>>) -> Self {
        let generation = scheduler.begin(LoadReason::Initial);
        Self {
            scheduler,
            params,
            pagination: PaginationController::new(),
            generation,
            issued: false,
            page: PageStatus::Pending,
            step_keys: Mutex::new(StepKeyAggregator::new()),
        }
    }

    /// Returns the scheduler backing this view.
    #[must_use]
    pub const fn scheduler(&self) -> &Arc<ChunkScheduler<S>> {
        &self.scheduler
    }

    /// Returns the current parameters.
    #[must_use]
    pub const fn params(&self) -> &ViewParams {
        &self.params
    }

    /// Returns the generation the view currently expects results for.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns the cursor history.
    #[must_use]
    pub const fn pagination(&self) -> &PaginationController {
        &self.pagination
    }

    /// Returns the effective page size.
    #[must_use]
    pub fn page_size(&self) -> PageSize {
        self.params
            .page_size
            .unwrap_or_else(|| self.scheduler.default_page_size())
    }

    /// Returns the window of the current page.
    #[must_use]
    pub fn window(&self) -> PageWindow {
        PageWindow {
            page_size: self.page_size(),
            cursor: self.pagination.current_cursor().cloned(),
        }
    }

    /// Replaces the run filters. Returns false if they were unchanged.
    pub fn set_run_tags(&mut self, run_tags: Vec<RunTagFilter>) -> bool {
        if self.params.run_tags == run_tags {
            debug!("run filters unchanged");
            return false;
        }
        self.params.run_tags = run_tags;
        self.restart(LoadReason::FiltersChanged);
        true
    }

    /// Replaces the page size. Returns false if it was unchanged.
    pub fn set_page_size(&mut self, page_size: PageSize) -> bool {
        if self.page_size() == page_size {
            return false;
        }
        self.params.page_size = Some(page_size);
        self.restart(LoadReason::PageSizeChanged);
        true
    }

    /// Switches to another partition set. Returns false if it was unchanged.
    pub fn set_partition_set(&mut self, partition_set: impl Into<String>) -> bool {
        let partition_set = partition_set.into();
        if self.params.partition_set == partition_set {
            return false;
        }
        self.params.partition_set = partition_set;
        self.restart(LoadReason::PartitionSetChanged);
        true
    }

    /// Replaces the step query without fetching.
    pub fn set_step_query(&mut self, step_query: impl Into<String>) {
        self.params.step_query = step_query.into();
    }

    /// Detaches the load of the current page.
    ///
    /// Each generation is loaded at most once. If the current generation was
    /// already handed out, a refresh generation is started first.
    pub fn start_load(&mut self) -> PendingLoad<S> {
        if self.issued {
            self.start(LoadReason::Refresh);
        }
        self.issued = true;
        PendingLoad {
            scheduler: Arc::clone(&self.scheduler),
            generation: self.generation,
            partition_set: self.params.partition_set.clone(),
            filters: self.params.run_tags.clone(),
            window: self.window(),
        }
    }

    /// Records the result of a detached load.
    ///
    /// Results for any generation other than the current one are ignored and
    /// yield `Ok(None)`, as does a superseded load.
    ///
    /// # Errors
    ///
    /// Returns the page error if the current generation failed.
    pub fn apply(
        &mut self,
        generation: Generation,
        result: std::result::Result<LoadOutcome, FetchError>,
    ) -> Result<Option<PageOutcome>> {
        if generation != self.generation {
            return Ok(None);
        }
        match result {
            Ok(LoadOutcome::Completed(page)) => {
                self.page = PageStatus::Loaded {
                    next_cursor: page.next_cursor.clone(),
                };
                Ok(Some(page))
            }
            Ok(LoadOutcome::Superseded { .. }) => Ok(None),
            Err(err) => {
                self.page = PageStatus::Failed;
                Err(err.into())
            }
        }
    }

    /// Loads the current page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] if a chunk fetch failed.
    pub async fn load(&mut self) -> Result<Option<PageOutcome>> {
        let pending = self.start_load();
        let generation = pending.generation();
        let result = pending.run().await;
        self.apply(generation, result)
    }

    /// Starts a new generation for the current page, keeping the history.
    pub fn refresh(&mut self) {
        self.start(LoadReason::Refresh);
    }

    /// Moves to the next page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pagination`] if the current page has not finished
    /// loading or has no next page.
    pub fn advance(&mut self) -> Result<()> {
        let next_cursor = match &self.page {
            PageStatus::Loaded {
                next_cursor: Some(cursor),
            } => cursor.clone(),
            PageStatus::Loaded { next_cursor: None } => {
                return Err(Error::pagination("already on the last page"));
            }
            PageStatus::Pending | PageStatus::Failed => {
                return Err(Error::pagination("current page is not loaded"));
            }
        };
        self.pagination.advance(next_cursor);
        self.start(LoadReason::Navigation);
        Ok(())
    }

    /// Moves back one page. Returns false on the first page.
    pub fn retreat(&mut self) -> bool {
        if !self.pagination.retreat() {
            return false;
        }
        self.start(LoadReason::Navigation);
        true
    }

    /// Returns to the first page and clears the history.
    pub fn reset(&mut self) {
        self.restart(LoadReason::Reset);
    }

    /// Captures the current state.
    #[must_use]
    pub fn snapshot(&self) -> ViewSnapshot {
        let published = self.scheduler.snapshot();
        let has_next_cursor = published.generation == self.generation
            && matches!(
                self.page,
                PageStatus::Loaded {
                    next_cursor: Some(_)
                }
            );
        let step_keys = self
            .step_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .step_keys(published.generation, &published.partitions)
            .clone();

        ViewSnapshot {
            generation: published.generation,
            loading: published.loading,
            loading_percent: published.loading_percent,
            partitions: published.partitions,
            error: published.error,
            pagination: PaginationProps {
                has_prev_cursor: self.pagination.has_prev_cursor(),
                has_next_cursor,
            },
            step_keys,
            step_query: self.params.step_query.clone(),
            run_tags: self.params.run_tags.clone(),
        }
    }

    /// Launches a backfill and narrows the view to its runs.
    ///
    /// On success the step query is stored and the run filters are replaced
    /// by the backfill's tag, which resets the view.
    ///
    /// # Errors
    ///
    /// Returns the launcher's error; the view is left unchanged.
    pub async fn launch_backfill<L>(&mut self, launcher: &L, step_query: &str) -> Result<BackfillId>
    where
        L: BackfillLauncher + ?Sized,
    {
        let id = launcher
            .launch_backfill(&self.params.partition_set, step_query)
            .await?;
        self.set_step_query(step_query);
        self.set_run_tags(vec![RunTagFilter::backfill(&id)]);
        info!(
            backfill_id = %id,
            partition_set = %self.params.partition_set,
            "view narrowed to backfill runs"
        );
        Ok(id)
    }

    fn restart(&mut self, reason: LoadReason) {
        self.pagination.reset();
        self.start(reason);
    }

    fn start(&mut self, reason: LoadReason) {
        self.generation = self.scheduler.begin(reason);
        self.issued = false;
        self.page = PageStatus::Pending;
    }
}
