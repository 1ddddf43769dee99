//! Cursor over the header list: the open row plus a precomputed successor.

use crate::model::{HeaderList, RowReference};

use super::visibility::Visibility;

/// Scan forward from `from` for the first visible header.
///
/// With `cycle`, the scan wraps to the top and stops just before `from`, so a
/// list whose only visible header is `from` has no successor.
pub fn select_next_valid(
    list: &HeaderList,
    from: &RowReference,
    cycle: bool,
    visibility: &Visibility,
) -> Option<RowReference> {
    let from_idx = from.path(list).ok()?;
    let wrapped = if cycle { 0..from_idx } else { 0..0 };

    ((from_idx + 1)..list.len())
        .chain(wrapped)
        .find(|&idx| list.get(idx).is_some_and(|h| visibility.accepts(h)))
        .and_then(|idx| RowReference::create(list, idx))
}

/// Scan backward from `from` for the first visible header. Never wraps.
pub fn select_previous_valid(
    list: &HeaderList,
    from: &RowReference,
    visibility: &Visibility,
) -> Option<RowReference> {
    let from_idx = from.path(list).ok()?;

    (0..from_idx)
        .rev()
        .find(|&idx| list.get(idx).is_some_and(|h| visibility.accepts(h)))
        .and_then(|idx| RowReference::create(list, idx))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    pub current: Option<RowReference>,
    pub next: Option<RowReference>,
    pub is_outbox_context: bool,
}

#[derive(Debug)]
pub struct CursorTracker {
    state: CursorState,
    visibility: Visibility,
    cycle_next: bool,
}

impl CursorTracker {
    pub fn new(visibility: Visibility, cycle_next: bool) -> Self {
        Self {
            state: CursorState {
                current: None,
                next: None,
                is_outbox_context: visibility.is_outbox_context(),
            },
            visibility,
            cycle_next,
        }
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn current(&self) -> Option<RowReference> {
        self.state.current
    }

    pub fn next(&self) -> Option<RowReference> {
        self.state.next
    }

    pub fn is_bound(&self) -> bool {
        self.state.current.is_some()
    }

    /// Point the cursor at `row` and eagerly compute its successor
    pub fn bind(&mut self, list: &HeaderList, row: RowReference) {
        self.state.current = Some(row);
        self.recompute_next(list);
    }

    pub fn recompute_next(&mut self, list: &HeaderList) {
        self.state.next = self
            .state
            .current
            .and_then(|cur| self.successor_of(list, &cur));
    }

    pub fn set_next(&mut self, next: Option<RowReference>) {
        self.state.next = next;
    }

    pub fn successor_of(&self, list: &HeaderList, row: &RowReference) -> Option<RowReference> {
        select_next_valid(list, row, self.cycle_next, &self.visibility)
    }

    pub fn predecessor_of(&self, list: &HeaderList, row: &RowReference) -> Option<RowReference> {
        select_previous_valid(list, row, &self.visibility)
    }

    pub fn clear(&mut self) {
        self.state.current = None;
        self.state.next = None;
    }

    /// No visible header before the cursor (or no cursor at all)
    pub fn is_first(&self, list: &HeaderList) -> bool {
        self.state
            .current
            .is_none_or(|cur| select_previous_valid(list, &cur, &self.visibility).is_none())
    }

    /// No visible header after the cursor, without wrapping
    pub fn is_last(&self, list: &HeaderList) -> bool {
        self.state
            .current
            .is_none_or(|cur| select_next_valid(list, &cur, false, &self.visibility).is_none())
    }
}
