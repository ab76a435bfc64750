//! Edit records stored in the undo/redo log of an edit session.

use crate::events::MacroEvent;

/// One user-level edit to the working event list. Each record carries enough
/// state to apply, invert (undo) and replay (redo/save) itself.
#[derive(Debug, Clone)]
pub enum MacroEventEdit {
    /// Insert or copy: the events carry their final indexes.
    Add { events: Vec<MacroEvent> },
    /// Removal: the events are kept whole so undo can restore them.
    Delete { events: Vec<MacroEvent> },
    UpdateDelay { index: i32, old: i64, new: i64 },
    UpdateDuration { index: i32, old: i64, new: i64 },
    UpdateKeyString { index: i32, old: String, new: String },
    UpdateAutoCorrect { index: i32, old: bool, new: bool },
    UpdateImage {
        index: i32,
        old_screenshot_id: i64,
        new_screenshot_id: i64,
    },
}

impl MacroEventEdit {
    /// The single event index a field update targets, if this is one.
    pub fn update_index(&self) -> Option<i32> {
        match self {
            MacroEventEdit::UpdateDelay { index, .. }
            | MacroEventEdit::UpdateDuration { index, .. }
            | MacroEventEdit::UpdateKeyString { index, .. }
            | MacroEventEdit::UpdateAutoCorrect { index, .. }
            | MacroEventEdit::UpdateImage { index, .. } => Some(*index),
            _ => None,
        }
    }
}
