//! Custom assertion helpers for integration tests.

use std::collections::HashMap;

use tokio::sync::broadcast;

use arco_partitions::fetcher::Generation;
use arco_partitions::model::{Partition, PartitionSet};
use arco_partitions::scheduler::ProgressEvent;
use arco_partitions::view::ViewSnapshot;

/// Asserts that `partitions` is the contiguous run of `set` starting at
/// `offset`, in definition order.
///
/// # Panics
///
/// Panics if any partition is out of place.
pub fn assert_in_set_order(partitions: &[Partition], set: &PartitionSet, offset: usize) {
    for (i, partition) in partitions.iter().enumerate() {
        let expected = set
            .partitions
            .get(offset + i)
            .unwrap_or_else(|| panic!("partition {} is past the end of the set", partition.name));
        assert_eq!(
            partition.name,
            expected.name,
            "Expected partition {} at position {}, found {}",
            expected.name,
            offset + i,
            partition.name
        );
    }
}

/// Asserts that progress never decreased within any generation.
///
/// # Panics
///
/// Panics on the first decrease.
pub fn assert_monotonic_progress(events: &[ProgressEvent]) {
    let mut last: HashMap<Generation, u8> = HashMap::new();
    for event in events {
        let previous = last.entry(event.generation).or_insert(0);
        assert!(
            event.loading_percent >= *previous,
            "Progress for generation {} went from {} to {}",
            event.generation,
            previous,
            event.loading_percent
        );
        *previous = event.loading_percent;
    }
}

/// Asserts that `generation` emitted 100% exactly when it stopped loading,
/// and never before.
///
/// # Panics
///
/// Panics if the generation did not complete or reported 100 early.
pub fn assert_completed(events: &[ProgressEvent], generation: Generation) {
    let events: Vec<_> = events.iter().filter(|e| e.generation == generation).collect();
    let last = events
        .last()
        .unwrap_or_else(|| panic!("No progress events for generation {generation}"));
    assert!(!last.loading, "Generation {generation} is still loading");
    assert_eq!(last.loading_percent, 100);
    for event in &events[..events.len() - 1] {
        assert!(event.loading, "Generation {generation} stopped loading early");
        assert!(event.loading_percent < 100, "Generation {generation} reported 100 early");
    }
}

/// Asserts that the view shows an empty page still loading at 0%.
///
/// # Panics
///
/// Panics if the snapshot shows any partitions or progress.
pub fn assert_empty_loading(snapshot: &ViewSnapshot) {
    assert!(snapshot.loading, "Expected the view to be loading");
    assert_eq!(snapshot.loading_percent, 0);
    assert!(
        snapshot.partitions.is_empty(),
        "Expected no partitions, found {}",
        snapshot.partitions.len()
    );
    assert!(snapshot.step_keys.is_empty());
}

/// Drains every progress event currently buffered on `rx`.
///
/// # Panics
///
/// Panics if the receiver lagged and lost events.
pub fn drain_progress(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => {
                return events;
            }
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                panic!("Progress receiver lagged by {missed} events");
            }
        }
    }
}

/// Returns the distinct progress values of `generation`, in emission order.
#[must_use]
pub fn progress_values(events: &[ProgressEvent], generation: Generation) -> Vec<u8> {
    let mut values: Vec<u8> = Vec::new();
    for event in events.iter().filter(|e| e.generation == generation) {
        if values.last() != Some(&event.loading_percent) {
            values.push(event.loading_percent);
        }
    }
    values
}
