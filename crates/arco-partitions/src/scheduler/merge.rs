//! Ordered merge of chunk results.
//!
//! Chunks are numbered by their position in the page (ordinal 0 is the chunk
//! at the page cursor). Chunks may complete in any order; only the contiguous
//! prefix starting at ordinal 0 is ever exposed.

use std::collections::BTreeMap;

use crate::model::Partition;

#[derive(Debug, Default)]
pub(crate) struct ChunkMerger {
    merged: Vec<Partition>,
    pending: BTreeMap<usize, Vec<Partition>>,
    next_ordinal: usize,
}

impl ChunkMerger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Accepts the chunk at `ordinal` and returns the partitions that became
    /// visible as a result, in sequence order.
    ///
    /// Duplicate ordinals are ignored.
    pub(crate) fn insert(&mut self, ordinal: usize, chunk: Vec<Partition>) -> &[Partition] {
        let before = self.merged.len();
        if ordinal >= self.next_ordinal {
            self.pending.entry(ordinal).or_insert(chunk);
        }
        while let Some(chunk) = self.pending.remove(&self.next_ordinal) {
            self.merged.extend(chunk);
            self.next_ordinal += 1;
        }
        &self.merged[before..]
    }

    /// Drops waiting chunks past `ordinal`.
    pub(crate) fn discard_after(&mut self, ordinal: usize) {
        drop(self.pending.split_off(&(ordinal + 1)));
    }

    /// Ordinal the next sequential chunk should use.
    pub(crate) const fn next_ordinal(&self) -> usize {
        self.next_ordinal
    }

    /// Number of merged partitions.
    pub(crate) fn len(&self) -> usize {
        self.merged.len()
    }

    /// Returns true while chunks are waiting on an earlier ordinal.
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn into_partitions(self) -> Vec<Partition> {
        self.merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn chunk(names: &[&str]) -> Vec<Partition> {
        names.iter().map(|n| Partition::new(*n)).collect()
    }

    fn names(partitions: &[Partition]) -> Vec<&str> {
        partitions.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn out_of_order_chunks_wait_for_the_prefix() {
        let mut merger = ChunkMerger::new();
        assert!(merger.insert(2, chunk(&["e", "f"])).is_empty());
        assert!(merger.insert(1, chunk(&["c", "d"])).is_empty());
        assert!(merger.has_pending());

        let visible = names(merger.insert(0, chunk(&["a", "b"])));
        assert_eq!(visible, vec!["a", "b", "c", "d", "e", "f"]);
        assert!(!merger.has_pending());
        assert_eq!(merger.next_ordinal(), 3);
    }

    #[test]
    fn duplicate_and_stale_ordinals_are_ignored() {
        let mut merger = ChunkMerger::new();
        merger.insert(0, chunk(&["a"]));
        assert!(merger.insert(0, chunk(&["x"])).is_empty());
        merger.insert(2, chunk(&["c"]));
        merger.insert(2, chunk(&["y"]));
        merger.insert(1, chunk(&["b"]));
        assert_eq!(names(&merger.into_partitions()), vec!["a", "b", "c"]);
    }

    #[test]
    fn discarded_chunks_never_become_visible() {
        let mut merger = ChunkMerger::new();
        merger.insert(0, chunk(&["a", "b"]));
        merger.insert(3, chunk(&["g", "h"]));
        merger.insert(2, chunk(&["e", "f"]));

        merger.discard_after(1);
        assert!(!merger.has_pending());
        let visible = names(merger.insert(1, chunk(&["c"])));
        assert_eq!(visible, vec!["c"]);
        assert_eq!(merger.next_ordinal(), 2);
    }

    proptest! {
        #[test]
        fn any_arrival_order_merges_in_sequence(
            order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut merger = ChunkMerger::new();
            let mut visible = Vec::new();
            for ordinal in order {
                let chunk = vec![Partition::new(format!("p{ordinal:02}"))];
                visible.extend(merger.insert(ordinal, chunk).iter().map(|p| p.name.clone()));
            }
            let expected: Vec<String> = (0..12).map(|i| format!("p{i:02}")).collect();
            prop_assert_eq!(visible, expected);
        }
    }
}
