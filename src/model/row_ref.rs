use crate::error::CursorError;
use crate::mail::types::HeaderRef;

use super::{HeaderList, ModelId, RowId};

/// Resilient position marker into one `HeaderList` instance.
///
/// Holds the model identity and the row's stable id, never the header. The
/// index is derived on demand, so it follows the row across inserts, removes
/// and reorders, and stops resolving once the row is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowReference {
    model: ModelId,
    row: RowId,
}

impl RowReference {
    /// Reference the row currently at `index`. `None` if out of range.
    pub fn create(list: &HeaderList, index: usize) -> Option<Self> {
        list.row_at(index).map(|row| Self {
            model: list.id(),
            row,
        })
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// True iff `list` is the model this reference was made for and the row
    /// still exists in it
    pub fn valid(&self, list: &HeaderList) -> bool {
        self.model == list.id() && list.position_of(self.row).is_some()
    }

    pub fn path(&self, list: &HeaderList) -> Result<usize, CursorError> {
        if self.model != list.id() {
            return Err(CursorError::StaleReference);
        }
        list.position_of(self.row).ok_or(CursorError::StaleReference)
    }

    pub fn header<'a>(&self, list: &'a HeaderList) -> Result<&'a HeaderRef, CursorError> {
        let index = self.path(list)?;
        list.get(index).ok_or(CursorError::StaleReference)
    }
}
