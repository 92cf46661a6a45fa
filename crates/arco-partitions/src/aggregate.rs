//! Step-key aggregation across loaded partitions.
//!
//! Step keys drive the axes of the run matrix and the graph set. They are
//! always derived from the partitions currently loaded, in order of first
//! sighting, so the axis order is stable while a page fills in.

use std::collections::HashSet;

use serde::{Serialize, Serializer};

use crate::fetcher::Generation;
use crate::model::Partition;

/// Ordered set of distinct step keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepKeySet {
    keys: Vec<String>,
    seen: HashSet<String>,
}

impl StepKeySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a key, returning false if it was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        self.seen.insert(key.to_string());
        self.keys.push(key.to_string());
        true
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys in order of first sighting.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }

    /// Iterates over keys in order of first sighting.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.keys.iter()
    }

    /// Adds every step key reported by `partitions`.
    pub fn extend_from_partitions(&mut self, partitions: &[Partition]) {
        let stats = partitions
            .iter()
            .flat_map(|partition| &partition.runs)
            .flat_map(|run| &run.step_stats);
        for stat in stats {
            self.insert(&stat.step_key);
        }
    }
}

impl<'a> IntoIterator for &'a StepKeySet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for StepKeySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(key.as_ref());
        }
        set
    }
}

impl Serialize for StepKeySet {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.collect_seq(&self.keys)
    }
}

/// Returns the distinct step keys across all runs of `partitions`.
///
/// Partitions without runs and runs without step stats contribute nothing.
#[must_use]
pub fn aggregate_step_keys(partitions: &[Partition]) -> StepKeySet {
    let mut keys = StepKeySet::new();
    keys.extend_from_partitions(partitions);
    keys
}

/// Incremental step-key aggregation for a growing partitions list.
///
/// Within one generation the published list only grows by appending, so
/// only the new tail needs scanning. A new generation or a shorter list
/// triggers a full recompute.
#[derive(Debug, Default)]
pub struct StepKeyAggregator {
    generation: Generation,
    scanned: usize,
    keys: StepKeySet,
}

impl StepKeyAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the step keys for `partitions` published under `generation`.
    pub fn step_keys(&mut self, generation: Generation, partitions: &[Partition]) -> &StepKeySet {
        if generation != self.generation || partitions.len() < self.scanned {
            self.generation = generation;
            self.scanned = 0;
            self.keys = StepKeySet::new();
        }
        self.keys.extend_from_partitions(&partitions[self.scanned..]);
        self.scanned = partitions.len();
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Run, RunStatus, StepStat, StepStatus};

    fn partition(name: &str, runs: &[&[&str]]) -> Partition {
        runs.iter()
            .enumerate()
            .fold(Partition::new(name), |partition, (i, steps)| {
                let run = steps.iter().fold(
                    Run::new(format!("{name}-{i}"), RunStatus::Success),
                    |run, key| run.with_step(StepStat::new(*key, StepStatus::Success)),
                );
                partition.with_run(run)
            })
    }

    #[test]
    fn aggregates_distinct_keys_skipping_empty_partitions() {
        let partitions = vec![partition("p1", &[&["a", "b"]]), partition("p2", &[])];
        let keys = aggregate_step_keys(&partitions);
        assert_eq!(keys.as_slice(), ["a", "b"]);
    }

    #[test]
    fn keeps_first_sighting_order() {
        let partitions = vec![
            partition("p1", &[&["extract", "load"], &["extract", "transform"]]),
            partition("p2", &[&[], &["report", "load"]]),
        ];
        let keys = aggregate_step_keys(&partitions);
        assert_eq!(keys.as_slice(), ["extract", "load", "transform", "report"]);
        assert!(keys.contains("report"));
        assert_eq!(
            serde_json::to_string(&keys).unwrap(),
            r#"["extract","load","transform","report"]"#
        );
    }

    #[test]
    fn aggregator_scans_only_the_new_tail() {
        let mut aggregator = StepKeyAggregator::new();
        let generation = Generation::new(1);
        let mut partitions = vec![partition("p1", &[&["a"]])];
        assert_eq!(aggregator.step_keys(generation, &partitions).len(), 1);

        partitions.push(partition("p2", &[&["b"]]));
        assert_eq!(aggregator.step_keys(generation, &partitions).as_slice(), ["a", "b"]);
    }

    #[test]
    fn aggregator_drops_keys_from_older_generations() {
        let mut aggregator = StepKeyAggregator::new();
        let old = vec![partition("p1", &[&["stale"]])];
        aggregator.step_keys(Generation::new(1), &old);

        let fresh = vec![partition("p1", &[&["fresh"]])];
        let keys = aggregator.step_keys(Generation::new(2), &fresh);
        assert_eq!(keys.as_slice(), ["fresh"]);
        assert!(!keys.contains("stale"));

        assert!(aggregator.step_keys(Generation::new(2), &[]).is_empty());
    }
}
