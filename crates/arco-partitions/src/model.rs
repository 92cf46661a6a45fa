//! Read-only projections of partition sets, partitions, runs and step stats.
//!
//! These records are fetched on demand and never mutated locally; a change
//! upstream requires a new fetch. Field names serialize in camelCase to match
//! the upstream partition-set schema.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Page size used when none is requested.
pub const DEFAULT_PAGE_SIZE: NonZeroUsize = match NonZeroUsize::new(30) {
    Some(size) => size,
    None => unreachable!(),
};

/// Identifier of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Waiting in the run queue.
    Queued,
    /// Created but not yet launched.
    NotStarted,
    /// Launched, waiting for the first step.
    Starting,
    /// Executing steps.
    Started,
    /// All steps completed successfully.
    Success,
    /// At least one step failed.
    Failure,
    /// Cancellation requested.
    Canceling,
    /// Cancelled before completion.
    Canceled,
}

impl RunStatus {
    /// Returns true for statuses that will not change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Canceled)
    }
}

/// Outcome of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Step succeeded.
    Success,
    /// Step failed.
    Failure,
    /// Step was skipped.
    Skipped,
    /// Step is still executing.
    InProgress,
}

/// A key/value tag attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunTag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl RunTag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Per-step statistics reported by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStat {
    /// Step identifier.
    pub step_key: String,
    /// Step outcome, absent if the step never started.
    #[serde(default)]
    pub status: Option<StepStatus>,
    /// When the step started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the step finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl StepStat {
    /// Creates a step stat with a status and no timing.
    #[must_use]
    pub fn new(step_key: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_key: step_key.into(),
            status: Some(status),
            start_time: None,
            end_time: None,
        }
    }

    /// Sets the start and end times.
    #[must_use]
    pub const fn with_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }

    /// Returns the step duration in seconds when both timestamps are known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> Option<f64> {
        let (start, end) = (self.start_time?, self.end_time?);
        let millis = (end - start).num_milliseconds().max(0);
        Some(millis as f64 / 1_000.0)
    }
}

/// One execution attached to a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Current run status.
    pub status: RunStatus,
    /// Tags attached to the run.
    #[serde(default)]
    pub tags: Vec<RunTag>,
    /// Step statistics, in step execution order.
    #[serde(default)]
    pub step_stats: Vec<StepStat>,
}

impl Run {
    /// Creates a run without tags or step stats.
    #[must_use]
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: RunId::new(id),
            status,
            tags: Vec::new(),
            step_stats: Vec::new(),
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(RunTag::new(key, value));
        self
    }

    /// Adds a step stat.
    #[must_use]
    pub fn with_step(mut self, stat: StepStat) -> Self {
        self.step_stats.push(stat);
        self
    }

    /// Returns true if the run carries `key=value`.
    #[must_use]
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags.iter().any(|t| t.key == key && t.value == value)
    }

    /// Returns true if the run satisfies every filter.
    ///
    /// Filters are assumed to be valid; a malformed filter matches nothing.
    #[must_use]
    pub fn matches_all(&self, filters: &[RunTagFilter]) -> bool {
        filters.iter().all(|filter| filter.matches(self))
    }
}

/// A named partition and the runs launched for it, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    /// Partition name, unique within its set.
    pub name: String,
    /// Runs for this partition.
    #[serde(default)]
    pub runs: Vec<Run>,
}

impl Partition {
    /// Creates a partition with no runs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runs: Vec::new(),
        }
    }

    /// Adds a run.
    #[must_use]
    pub fn with_run(mut self, run: Run) -> Self {
        self.runs.push(run);
        self
    }

    /// Keeps only the runs that satisfy every filter.
    pub fn retain_matching(&mut self, filters: &[RunTagFilter]) {
        if !filters.is_empty() {
            self.runs.retain(|run| run.matches_all(filters));
        }
    }
}

/// A named, ordered collection of partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionSet {
    /// Partition set name.
    pub name: String,
    /// Partitions in definition order.
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl PartitionSet {
    /// Creates a partition set.
    #[must_use]
    pub fn new(name: impl Into<String>, partitions: Vec<Partition>) -> Self {
        Self {
            name: name.into(),
            partitions,
        }
    }
}

/// A conjunctive run filter, `{token, value}`.
///
/// The only supported token is `tag`, whose value has the form `key=value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunTagFilter {
    /// Filter token.
    pub token: String,
    /// Filter value.
    pub value: String,
}

impl RunTagFilter {
    /// Token for tag filters.
    pub const TAG_TOKEN: &'static str = "tag";

    /// Creates a filter from a raw token and value.
    #[must_use]
    pub fn new(token: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            value: value.into(),
        }
    }

    /// Creates a `tag` filter matching runs tagged `key=value`.
    #[must_use]
    pub fn tag(key: &str, value: &str) -> Self {
        Self::new(Self::TAG_TOKEN, format!("{key}={value}"))
    }

    /// Splits a tag filter into its key and value.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Invalid`] for unsupported tokens, values without
    /// `=`, or an empty key.
    pub fn tag_pair(&self) -> Result<(&str, &str), FetchError> {
        if self.token != Self::TAG_TOKEN {
            return Err(FetchError::invalid(format!(
                "unsupported run filter token '{}'",
                self.token
            )));
        }
        let Some((key, value)) = self.value.split_once('=') else {
            return Err(FetchError::invalid(format!(
                "tag filter '{}' must have the form key=value",
                self.value
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(FetchError::invalid(format!(
                "tag filter '{}' has an empty key",
                self.value
            )));
        }
        Ok((key, value.trim()))
    }

    /// Validates the filter.
    ///
    /// # Errors
    ///
    /// See [`RunTagFilter::tag_pair`].
    pub fn validate(&self) -> Result<(), FetchError> {
        self.tag_pair().map(|_| ())
    }

    /// Returns true if the run satisfies this filter.
    #[must_use]
    pub fn matches(&self, run: &Run) -> bool {
        self.tag_pair()
            .is_ok_and(|(key, value)| run.has_tag(key, value))
    }
}

/// Opaque continuation token marking a position in a partition sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a source-provided token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of partitions shown per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PageSize {
    /// A fixed number of partitions.
    Count(NonZeroUsize),
    /// Every partition, fetched until the source is exhausted.
    All,
}

impl PageSize {
    /// Creates a counted page size, `None` for zero.
    #[must_use]
    pub const fn count(n: usize) -> Option<Self> {
        match NonZeroUsize::new(n) {
            Some(n) => Some(Self::Count(n)),
            None => None,
        }
    }

    /// Returns the partition limit, `None` for [`PageSize::All`].
    #[must_use]
    pub const fn limit(self) -> Option<usize> {
        match self {
            Self::Count(n) => Some(n.get()),
            Self::All => None,
        }
    }

    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn mode(self) -> &'static str {
        match self {
            Self::Count(_) => "count",
            Self::All => "all",
        }
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self::Count(DEFAULT_PAGE_SIZE)
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(n) => write!(f, "{n}"),
            Self::All => f.write_str("all"),
        }
    }
}

impl FromStr for PageSize {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .ok()
            .and_then(Self::count)
            .ok_or_else(|| {
                FetchError::invalid(format!(
                    "page size must be 'all' or a positive integer, got '{s}'"
                ))
            })
    }
}

impl TryFrom<String> for PageSize {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageSize> for String {
    fn from(value: PageSize) -> Self {
        value.to_string()
    }
}

/// The currently visible slice of a partition set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageWindow {
    /// How many partitions the page holds.
    pub page_size: PageSize,
    /// Where the page starts; `None` is the first page.
    pub cursor: Option<Cursor>,
}

impl PageWindow {
    /// Creates a window starting at the first page.
    #[must_use]
    pub const fn first(page_size: PageSize) -> Self {
        Self {
            page_size,
            cursor: None,
        }
    }
}
