//! Pre-built test fixtures for common test scenarios.
//!
//! Provides factory functions to create partition sets with sensible defaults.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};

use arco_partitions::config::EngineConfig;
use arco_partitions::model::{Partition, PartitionSet, Run, RunStatus, StepStat, StepStatus};
use arco_partitions::source::memory::InMemoryPartitionSource;

/// Factory for creating test partition sets.
pub struct PartitionSetFactory;

impl PartitionSetFactory {
    /// Creates `count` daily partitions starting 2024-01-01, with no runs.
    #[must_use]
    pub fn daily(name: &str, count: usize) -> PartitionSet {
        PartitionSet::new(name, (0..count).map(|i| Partition::new(day(i))).collect())
    }

    /// Creates `count` daily partitions, each with one successful run that
    /// executed `steps`.
    ///
    /// Runs alternate between `team=data` (even partitions) and `team=ml`
    /// (odd partitions).
    #[must_use]
    pub fn with_runs(name: &str, count: usize, steps: &[&str]) -> PartitionSet {
        let partitions = (0..count)
            .map(|i| {
                let team = if i % 2 == 0 { "data" } else { "ml" };
                let run = run_with_steps(
                    &format!("run-{i:04}"),
                    RunStatus::Success,
                    &steps
                        .iter()
                        .map(|step| (*step, StepStatus::Success))
                        .collect::<Vec<_>>(),
                )
                .with_tag("team", team);
                Partition::new(day(i)).with_run(run)
            })
            .collect();
        PartitionSet::new(name, partitions)
    }

    /// Wraps one set in a shared in-memory source.
    #[must_use]
    pub fn source(set: PartitionSet) -> Arc<InMemoryPartitionSource> {
        Arc::new(InMemoryPartitionSource::with_set(set))
    }
}

/// Creates a run whose step stats carry one-second timings.
#[must_use]
pub fn run_with_steps(id: &str, status: RunStatus, steps: &[(&str, StepStatus)]) -> Run {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    steps.iter().fold(Run::new(id, status), |run, (key, status)| {
        run.with_step(StepStat::new(*key, *status).with_times(start, start + Duration::seconds(1)))
    })
}

/// Returns the partition names in order.
#[must_use]
pub fn partition_names(partitions: &[Partition]) -> Vec<String> {
    partitions.iter().map(|p| p.name.clone()).collect()
}

/// Creates an engine config with the given chunk size and concurrency.
#[must_use]
pub fn engine_config(max_chunk_size: usize, max_concurrent_chunks: usize) -> EngineConfig {
    EngineConfig::default()
        .with_max_chunk_size(NonZeroUsize::new(max_chunk_size).expect("chunk size > 0"))
        .with_max_concurrent_chunks(
            NonZeroUsize::new(max_concurrent_chunks).expect("concurrency > 0"),
        )
}

fn day(offset: usize) -> String {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let offset = i64::try_from(offset).expect("offset fits in i64");
    (start + Duration::days(offset)).format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_names_are_sequential() {
        let set = PartitionSetFactory::daily("daily", 3);
        assert_eq!(
            partition_names(&set.partitions),
            vec!["2024-01-01", "2024-01-02", "2024-01-03"]
        );
    }

    #[test]
    fn runs_alternate_teams() {
        let set = PartitionSetFactory::with_runs("daily", 2, &["extract"]);
        assert!(set.partitions[0].runs[0].has_tag("team", "data"));
        assert!(set.partitions[1].runs[0].has_tag("team", "ml"));
        assert_eq!(set.partitions[1].runs[0].step_stats[0].step_key, "extract");
    }
}
