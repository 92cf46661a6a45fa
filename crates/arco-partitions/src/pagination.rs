//! Cursor history for page-back / page-forward navigation.
//!
//! Index 0 is the first page, whose cursor is `None`. Every page after it is
//! reached through a cursor recorded in the history. Advancing reuses the
//! recorded next entry or appends a new one. When a page now leads somewhere
//! other than its recorded next entry, the history is replaced with a new one
//! holding the visited pages and the new cursor. Recorded entries are never
//! edited in place.

use crate::model::Cursor;

/// Cursor-history stack for one view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationController {
    history: Vec<Cursor>,
    index: usize,
}

impl PaginationController {
    /// Creates a controller positioned at the first page.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cursor of the current page, `None` on the first page.
    #[must_use]
    pub fn current_cursor(&self) -> Option<&Cursor> {
        self.index
            .checked_sub(1)
            .and_then(|slot| self.history.get(slot))
    }

    /// Returns the zero-based index of the current page.
    #[must_use]
    pub const fn page_index(&self) -> usize {
        self.index
    }

    /// Returns true iff there is a previous page to go back to.
    #[must_use]
    pub const fn has_prev_cursor(&self) -> bool {
        self.index > 0
    }

    /// Moves to the page starting at `next_cursor`.
    ///
    /// Callers must only advance once the current page is fully loaded. If
    /// the history already records `next_cursor` as the following page, that
    /// entry is reused. Otherwise the history is replaced by the visited
    /// pages followed by `next_cursor`.
    pub fn advance(&mut self, next_cursor: Cursor) {
        if self.history.get(self.index) == Some(&next_cursor) {
            self.index += 1;
            return;
        }
        if self.index == self.history.len() {
            self.history.push(next_cursor);
            self.index += 1;
            return;
        }
        // A reloaded page can end at a different cursor than it did before a
        // retreat, for example after partitions were added upstream. The
        // pages recorded past it no longer follow from it.
        let visited = std::mem::take(&mut self.history);
        self.history = visited
            .into_iter()
            .take(self.index)
            .chain(std::iter::once(next_cursor))
            .collect();
        self.index += 1;
    }

    /// Moves back one page.
    ///
    /// Returns false, leaving the state unchanged, on the first page.
    pub fn retreat(&mut self) -> bool {
        if self.index == 0 {
            return false;
        }
        self.index -= 1;
        true
    }

    /// Clears the history and returns to the first page.
    pub fn reset(&mut self) {
        self.history = Vec::new();
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(n: usize) -> Cursor {
        Cursor::new(format!("c{n}"))
    }

    #[test]
    fn starts_on_first_page() {
        let pagination = PaginationController::new();
        assert!(!pagination.has_prev_cursor());
        assert!(pagination.current_cursor().is_none());
        assert_eq!(pagination.page_index(), 0);
    }

    #[test]
    fn retreat_on_first_page_is_a_no_op() {
        let mut pagination = PaginationController::new();
        let before = pagination.clone();
        assert!(!pagination.retreat());
        assert_eq!(pagination, before);
    }

    #[test]
    fn advance_and_retreat_walk_the_history() {
        let mut pagination = PaginationController::new();
        pagination.advance(cursor(1));
        pagination.advance(cursor(2));
        assert_eq!(pagination.current_cursor(), Some(&cursor(2)));
        assert!(pagination.has_prev_cursor());

        assert!(pagination.retreat());
        assert_eq!(pagination.current_cursor(), Some(&cursor(1)));
        assert!(pagination.retreat());
        assert!(pagination.current_cursor().is_none());
        assert!(!pagination.has_prev_cursor());
    }

    #[test]
    fn advancing_over_recorded_history_reuses_it() {
        let mut pagination = PaginationController::new();
        pagination.advance(cursor(1));
        pagination.advance(cursor(2));
        pagination.retreat();
        pagination.retreat();

        pagination.advance(cursor(1));
        assert_eq!(pagination.current_cursor(), Some(&cursor(1)));
        pagination.advance(cursor(2));
        assert_eq!(pagination.page_index(), 2);
    }

    #[test]
    fn diverging_advance_replaces_the_history() {
        let mut pagination = PaginationController::new();
        pagination.advance(cursor(1));
        pagination.advance(cursor(2));
        pagination.advance(cursor(3));
        pagination.retreat();
        pagination.retreat();

        pagination.advance(cursor(9));
        assert_eq!(pagination.current_cursor(), Some(&cursor(9)));
        assert_eq!(pagination.page_index(), 2);
        assert!(pagination.retreat());
        assert_eq!(pagination.current_cursor(), Some(&cursor(1)));

        // Page 3 is gone; advancing again reuses the c9 entry.
        pagination.advance(cursor(9));
        let mut expected = PaginationController::new();
        expected.advance(cursor(1));
        expected.advance(cursor(9));
        assert_eq!(pagination, expected);
    }

    #[test]
    fn reset_returns_to_first_page() {
        let mut pagination = PaginationController::new();
        pagination.advance(cursor(1));
        pagination.reset();
        assert_eq!(pagination, PaginationController::new());
    }
}
