//! Generic undo/redo history with an explicit save marker.

use tracing::debug;

use crate::error::{MacrotapeError, Result};

/// Linear undo/redo log.
///
/// `cursor` counts applied entries, so `entries[..cursor]` is the applied
/// prefix and `entries[cursor..]` the redoable tail. `last_save` remembers the
/// cursor position at the last successful save; the document is dirty whenever
/// the two differ, including after undoing below a save point.
#[derive(Debug)]
pub struct ChangeLog<T> {
    entries: Vec<T>,
    cursor: usize,
    last_save: usize,
}

impl<T> Default for ChangeLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChangeLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            last_save: 0,
        }
    }

    /// Records a new change, discarding any redoable tail. If the save marker
    /// sat inside the discarded tail it can never be reached again, so it is
    /// pushed out of range to keep the log permanently dirty.
    pub fn add_change(&mut self, change: T) {
        self.entries.truncate(self.cursor);
        if self.last_save > self.cursor {
            self.last_save = usize::MAX;
        }
        self.entries.push(change);
        self.cursor += 1;
        debug!(applied = self.cursor, "change recorded");
    }

    /// Steps the cursor back one entry and returns the change that was undone.
    pub fn undo_change(&mut self) -> Result<&T> {
        if self.cursor == 0 {
            return Err(MacrotapeError::NothingToUndo);
        }
        self.cursor -= 1;
        Ok(&self.entries[self.cursor])
    }

    /// Re-applies the next redoable entry and returns it.
    pub fn redo_change(&mut self) -> Result<&T> {
        if self.cursor == self.entries.len() {
            return Err(MacrotapeError::NothingToRedo);
        }
        let change = &self.entries[self.cursor];
        self.cursor += 1;
        Ok(change)
    }

    pub fn has_undo_change(&self) -> bool {
        self.cursor > 0
    }

    pub fn has_redo_change(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Whether the applied state differs from the last saved state.
    pub fn has_save_changes(&self) -> bool {
        self.cursor != self.last_save
    }

    /// The changes between the save marker and the cursor, oldest first.
    /// Empty when the state was saved at or past the cursor; a save routine
    /// replaying these must instead rebuild from scratch if the marker sits
    /// beyond the cursor (after undo past a save, or a discarded tail).
    pub fn pending_saves(&self) -> &[T] {
        if self.last_save <= self.cursor {
            &self.entries[self.last_save..self.cursor]
        } else {
            &[]
        }
    }

    /// Whether `pending_saves` describes the full delta from the saved state.
    /// False once the save marker is unreachable (undone past, or truncated).
    pub fn saves_are_incremental(&self) -> bool {
        self.last_save <= self.cursor
    }

    /// Moves the save marker to the cursor. Call only after the commit
    /// actually succeeded; a failed save leaves the marker (and thus the
    /// pending delta) intact for retry.
    pub fn mark_saved(&mut self) {
        self.last_save = self.cursor;
    }

    /// The applied prefix, oldest first. Used to re-render working state by
    /// replaying over a base snapshot.
    pub fn applied(&self) -> &[T] {
        &self.entries[..self.cursor]
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
        self.last_save = 0;
    }
}
