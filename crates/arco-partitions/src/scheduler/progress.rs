//! Best-effort loading progress.
//!
//! The denominator is the best known size of the page:
//!
//! - a counted page is bounded by its page size, capped by the source's
//!   `total_approx` once reported
//! - an `all` page uses `total_approx` when known, otherwise it assumes one
//!   more chunk of the last seen size while a next cursor exists
//!
//! While loading the value stays below 100 and never decreases; only
//! completion reports 100.

#[derive(Debug, Clone)]
pub(crate) struct Progress {
    target: Option<usize>,
    total: Option<usize>,
    percent: u8,
}

impl Progress {
    pub(crate) const fn new(target: Option<usize>) -> Self {
        Self {
            target,
            total: None,
            percent: 0,
        }
    }

    /// Records the number of partitions the source says remain from the page
    /// cursor. The first report wins.
    pub(crate) fn observe_total(&mut self, total: Option<usize>) {
        if self.total.is_none() {
            self.total = total;
        }
    }

    /// Updates progress after `loaded` partitions are merged and returns the
    /// percentage to publish.
    pub(crate) fn update(&mut self, loaded: usize, last_chunk: usize) -> u8 {
        let denominator = match (self.target, self.total) {
            (Some(target), Some(total)) => target.min(total),
            (Some(target), None) => target,
            (None, Some(total)) => total,
            (None, None) => loaded + last_chunk.max(1),
        };
        // Sources may under-report; never let the estimate run past 99.
        let denominator = denominator.max(loaded.saturating_add(1)).max(1);
        let ratio = loaded.saturating_mul(100) / denominator;
        let percent = u8::try_from(ratio.min(99)).unwrap_or(99);
        self.percent = self.percent.max(percent);
        self.percent
    }

    pub(crate) const fn percent(&self) -> u8 {
        self.percent
    }
}
