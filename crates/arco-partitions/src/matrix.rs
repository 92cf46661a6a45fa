//! Step-by-partition status matrix and per-step statistics.
//!
//! The matrix has one row per step key and one column per partition. A cell
//! holds the status reported by the latest run of that partition that
//! executed the step. Runs are listed oldest first, so later runs overwrite
//! earlier ones while the runs are scanned once.

use std::collections::HashMap;

use serde::Serialize;

use crate::aggregate::StepKeySet;
use crate::model::{Partition, RunId, StepStatus};

/// One cell of the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixCell {
    /// Latest run that reported the step.
    pub run_id: Option<RunId>,
    /// Status reported by that run.
    pub status: Option<StepStatus>,
}

/// A step key and its cells, one per partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixRow {
    /// Step identifier.
    pub step_key: String,
    /// Cells in partition order.
    pub cells: Vec<MatrixCell>,
}

/// Status counts for one step across the loaded partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    /// Step identifier.
    pub step_key: String,
    /// Partitions whose latest attempt succeeded.
    pub succeeded: usize,
    /// Partitions whose latest attempt failed.
    pub failed: usize,
    /// Partitions whose latest attempt skipped the step.
    pub skipped: usize,
    /// Partitions with the step still running.
    pub in_progress: usize,
    /// Partitions with no status for the step.
    pub missing: usize,
}

/// Step-by-partition status grid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionRunMatrix {
    /// Column headers, in partition order.
    pub partition_names: Vec<String>,
    /// Rows, in step-key order.
    pub rows: Vec<MatrixRow>,
}

impl PartitionRunMatrix {
    /// Builds the matrix for `partitions` over `step_keys`.
    ///
    /// Stats for steps outside `step_keys` are ignored.
    #[must_use]
    pub fn build(partitions: &[Partition], step_keys: &StepKeySet) -> Self {
        let row_index: HashMap<&str, usize> = step_keys
            .iter()
            .enumerate()
            .map(|(row, key)| (key.as_str(), row))
            .collect();
        let mut rows: Vec<MatrixRow> = step_keys
            .iter()
            .map(|key| MatrixRow {
                step_key: key.clone(),
                cells: vec![MatrixCell::default(); partitions.len()],
            })
            .collect();

        for (column, partition) in partitions.iter().enumerate() {
            for run in &partition.runs {
                for stat in &run.step_stats {
                    let Some(&row) = row_index.get(stat.step_key.as_str()) else {
                        continue;
                    };
                    rows[row].cells[column] = MatrixCell {
                        run_id: Some(run.id.clone()),
                        status: stat.status,
                    };
                }
            }
        }

        Self {
            partition_names: partitions.iter().map(|p| p.name.clone()).collect(),
            rows,
        }
    }

    /// Returns the row for a step key.
    #[must_use]
    pub fn row(&self, step_key: &str) -> Option<&MatrixRow> {
        self.rows.iter().find(|row| row.step_key == step_key)
    }

    /// Returns the cell for a step key and partition name.
    #[must_use]
    pub fn cell(&self, step_key: &str, partition: &str) -> Option<&MatrixCell> {
        let column = self.partition_names.iter().position(|name| name == partition)?;
        self.row(step_key)?.cells.get(column)
    }

    /// Returns per-step status counts, in row order.
    #[must_use]
    pub fn summaries(&self) -> Vec<StepSummary> {
        self.rows
            .iter()
            .map(|row| {
                let mut summary = StepSummary {
                    step_key: row.step_key.clone(),
                    ..StepSummary::default()
                };
                for cell in &row.cells {
                    match cell.status {
                        Some(StepStatus::Success) => summary.succeeded += 1,
                        Some(StepStatus::Failure) => summary.failed += 1,
                        Some(StepStatus::Skipped) => summary.skipped += 1,
                        Some(StepStatus::InProgress) => summary.in_progress += 1,
                        None => summary.missing += 1,
                    }
                }
                summary
            })
            .collect()
    }
}

/// Duration of one step in one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationPoint {
    /// Partition name.
    pub partition: String,
    /// Seconds taken by the latest finished run of the step.
    pub seconds: Option<f64>,
}

/// Returns the duration series of `step_key` across `partitions`, in order.
///
/// Each point uses the latest run that recorded both a start and an end time
/// for the step.
#[must_use]
pub fn step_duration_series(partitions: &[Partition], step_key: &str) -> Vec<DurationPoint> {
    partitions
        .iter()
        .map(|partition| DurationPoint {
            partition: partition.name.clone(),
            seconds: partition
                .runs
                .iter()
                .rev()
                .flat_map(|run| &run.step_stats)
                .filter(|stat| stat.step_key == step_key)
                .find_map(crate::model::StepStat::duration_secs),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    use crate::aggregate::aggregate_step_keys;
    use crate::model::{Run, RunStatus, StepStat};

    fn fixture() -> Vec<Partition> {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        vec![
            Partition::new("2024-03-01")
                .with_run(
                    Run::new("r1", RunStatus::Failure)
                        .with_step(
                            StepStat::new("extract", StepStatus::Success)
                                .with_times(t0, t0 + Duration::seconds(10)),
                        )
                        .with_step(StepStat::new("load", StepStatus::Failure)),
                )
                .with_run(
                    Run::new("r2", RunStatus::Success)
                        .with_step(
                            StepStat::new("extract", StepStatus::Success)
                                .with_times(t0, t0 + Duration::seconds(4)),
                        )
                        .with_step(StepStat::new("load", StepStatus::Success)),
                ),
            Partition::new("2024-03-02"),
            Partition::new("2024-03-03").with_run(
                Run::new("r3", RunStatus::Started)
                    .with_step(StepStat::new("extract", StepStatus::InProgress)),
            ),
        ]
    }

    #[test]
    fn latest_run_wins_each_cell() {
        let partitions = fixture();
        let matrix = PartitionRunMatrix::build(&partitions, &aggregate_step_keys(&partitions));

        let cell = matrix.cell("load", "2024-03-01").unwrap();
        assert_eq!(cell.status, Some(StepStatus::Success));
        assert_eq!(cell.run_id.as_ref().map(RunId::as_str), Some("r2"));
        assert_eq!(matrix.cell("load", "2024-03-02").unwrap().status, None);
        assert!(matrix.cell("load", "2024-12-31").is_none());
    }

    #[test]
    fn summaries_count_each_partition_once() {
        let partitions = fixture();
        let matrix = PartitionRunMatrix::build(&partitions, &aggregate_step_keys(&partitions));
        let summaries = matrix.summaries();

        assert_eq!(summaries[0].step_key, "extract");
        assert_eq!(summaries[0].succeeded, 1);
        assert_eq!(summaries[0].in_progress, 1);
        assert_eq!(summaries[0].missing, 1);
        assert_eq!(summaries[1].step_key, "load");
        assert_eq!(summaries[1].failed, 0);
        assert_eq!(summaries[1].missing, 2);
    }

    #[test]
    fn duration_series_uses_latest_finished_run() {
        let series = step_duration_series(&fixture(), "extract");
        let seconds: Vec<_> = series.iter().map(|p| p.seconds).collect();
        assert_eq!(seconds, vec![Some(4.0), None, None]);
    }

    #[test]
    fn empty_inputs_build_an_empty_matrix() {
        let matrix = PartitionRunMatrix::build(&[], &StepKeySet::new());
        assert!(matrix.rows.is_empty());
        assert!(matrix.summaries().is_empty());
    }
}
