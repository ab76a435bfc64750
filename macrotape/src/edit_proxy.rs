//! The multi-macro edit session.
//!
//! [`MacroEventEditProxy`] holds a working copy of the events shared by the
//! active macros, applies user edits to it, keeps an undo/redo log, and
//! commits the accumulated changes to the [`EventStore`] in one transaction.

use std::sync::Arc;

use tracing::{debug, info};

use crate::change_log::ChangeLog;
use crate::edit::MacroEventEdit;
use crate::error::{MacrotapeError, Result};
use crate::events::{event_indexes, MacroEvent};
use crate::store::EventStore;

/// A store mutation resolved at apply time, replayed verbatim on save.
///
/// Updates snapshot the whole event so later index shifts in the edit history
/// cannot skew what gets written.
#[derive(Debug, Clone)]
enum SaveOp {
    Add(Vec<MacroEvent>),
    Remove(Vec<i32>),
    Set(MacroEvent),
}

/// Working copy + change log over the active macros.
///
/// The working list is the store's uniform view with [`MacroEvent::dummy`]
/// placeholders filling the positions where the macros differ, so indexes in
/// the session line up with indexes in every macro.
pub struct MacroEventEditProxy {
    store: Arc<dyn EventStore>,
    /// Current working list, always contiguously indexed from 0.
    events: Vec<MacroEvent>,
    /// Snapshot taken at session start; undo/redo re-renders by replaying
    /// the applied edits over it.
    base: Vec<MacroEvent>,
    change_log: ChangeLog<MacroEventEdit>,
    save_ops: Vec<SaveOp>,
}

fn renumber(events: &mut [MacroEvent]) {
    for (position, event) in events.iter_mut().enumerate() {
        event.index = position as i32;
    }
}

impl MacroEventEditProxy {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            events: Vec::new(),
            base: Vec::new(),
            change_log: ChangeLog::new(),
            save_ops: Vec::new(),
        }
    }

    /// Opens an edit session over `ids`, replacing any previous session.
    pub fn set_edit_macros(&mut self, ids: &[i64]) -> Result<()> {
        self.store.set_active_macros(ids)?;
        self.reload()?;
        info!(?ids, events = self.events.len(), "edit session opened");
        Ok(())
    }

    /// Re-reads the working list from the store and discards all session
    /// state (undo history and unsaved changes).
    pub fn refresh(&mut self) -> Result<()> {
        self.reload()
    }

    fn reload(&mut self) -> Result<()> {
        let uniform = self.store.uniform_events()?;
        let mut length = 0usize;
        for id in self.store.active_macro_ids() {
            length = length.max(self.store.num_events_for_macro(id)?);
        }

        let mut events: Vec<MacroEvent> = (0..length)
            .map(|position| MacroEvent::dummy(position as i32))
            .collect();
        for event in uniform {
            let position = event.index as usize;
            if position < events.len() {
                events[position] = event;
            }
        }

        self.base = events.clone();
        self.events = events;
        self.change_log.clear();
        self.save_ops.clear();
        Ok(())
    }

    pub fn active_macro_ids(&self) -> Vec<i64> {
        self.store.active_macro_ids()
    }

    /// The working list as the user currently sees it.
    pub fn latest_macro_events(&self) -> &[MacroEvent] {
        &self.events
    }

    pub fn has_undo_change(&self) -> bool {
        self.change_log.has_undo_change()
    }

    pub fn has_redo_change(&self) -> bool {
        self.change_log.has_redo_change()
    }

    /// Whether the working list differs from what the store last saw.
    /// True again after undoing below a save point.
    pub fn has_unsaved_changes(&self) -> bool {
        self.change_log.has_save_changes()
    }

    /// Inserts `events` at position `at`, shifting later events up.
    pub fn insert_macro_events(&mut self, at: usize, mut events: Vec<MacroEvent>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if at > self.events.len() {
            return Err(MacrotapeError::InvalidEvent(format!(
                "insert position {at} past end of list ({})",
                self.events.len()
            )));
        }
        for (offset, event) in events.iter_mut().enumerate() {
            event.index = (at + offset) as i32;
        }
        self.apply_and_log(MacroEventEdit::Add { events })
    }

    /// Duplicates the events at `indexes`, each copy landing immediately
    /// before its source. Dummy positions cannot be copied since the macros
    /// hold different events there.
    pub fn copy_macro_events(&mut self, indexes: &[i32]) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut copies = Vec::with_capacity(sorted.len());
        // High to low, the way the edits were specified by the user; each
        // copy's final index accounts for the copies inserted below it.
        for (rank, &index) in sorted.iter().enumerate().rev() {
            let source = self.event_at(index)?;
            if source.is_dummy() {
                return Err(MacrotapeError::InvalidEvent(format!(
                    "cannot copy position {index}: macros differ there"
                )));
            }
            let mut copy = source.clone();
            copy.index = index + rank as i32;
            copies.push(copy);
        }
        copies.reverse();
        self.apply_and_log(MacroEventEdit::Add { events: copies })
    }

    /// Removes the events at `indexes` and closes the gaps.
    pub fn delete_macro_events(&mut self, indexes: &[i32]) -> Result<()> {
        if indexes.is_empty() {
            return Ok(());
        }
        let mut sorted = indexes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut removed = Vec::with_capacity(sorted.len());
        for &index in &sorted {
            removed.push(self.event_at(index)?.clone());
        }
        self.apply_and_log(MacroEventEdit::Delete { events: removed })
    }

    pub fn update_delay(&mut self, index: i32, delay_ms: i64) -> Result<()> {
        let old = self.event_at(index)?.delay_ms;
        if old == delay_ms {
            return Ok(());
        }
        self.apply_and_log(MacroEventEdit::UpdateDelay {
            index,
            old,
            new: delay_ms,
        })
    }

    pub fn update_duration(&mut self, index: i32, duration_ms: i64) -> Result<()> {
        let old = self.event_at(index)?.duration_ms;
        if old == duration_ms {
            return Ok(());
        }
        self.apply_and_log(MacroEventEdit::UpdateDuration {
            index,
            old,
            new: duration_ms,
        })
    }

    pub fn update_key_string(&mut self, index: i32, key_string: String) -> Result<()> {
        let old = self
            .event_at(index)?
            .as_keyboard()
            .ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a keyboard event"))
            })?
            .key_string
            .clone();
        if old == key_string {
            return Ok(());
        }
        self.apply_and_log(MacroEventEdit::UpdateKeyString {
            index,
            old,
            new: key_string,
        })
    }

    pub fn update_auto_correct(&mut self, index: i32, auto_correct: bool) -> Result<()> {
        let old = self
            .event_at(index)?
            .as_mouse()
            .ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a mouse event"))
            })?
            .auto_correct;
        if old == auto_correct {
            return Ok(());
        }
        self.apply_and_log(MacroEventEdit::UpdateAutoCorrect {
            index,
            old,
            new: auto_correct,
        })
    }

    pub fn update_image(&mut self, index: i32, screenshot_id: i64) -> Result<()> {
        let old = self
            .event_at(index)?
            .as_mouse()
            .ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a mouse event"))
            })?
            .screenshot_id;
        if old == screenshot_id {
            return Ok(());
        }
        self.apply_and_log(MacroEventEdit::UpdateImage {
            index,
            old_screenshot_id: old,
            new_screenshot_id: screenshot_id,
        })
    }

    /// Reverts the most recent edit.
    pub fn undo_change(&mut self) -> Result<()> {
        let edit = self.change_log.undo_change()?.clone();
        self.render();
        let op = match &edit {
            MacroEventEdit::Add { events } => SaveOp::Remove(event_indexes(events)),
            MacroEventEdit::Delete { events } => SaveOp::Add(events.clone()),
            update => {
                let index = update.update_index().unwrap();
                SaveOp::Set(self.events[index as usize].clone())
            }
        };
        self.save_ops.push(op);
        debug!("edit undone");
        Ok(())
    }

    /// Re-applies the most recently undone edit.
    pub fn redo_change(&mut self) -> Result<()> {
        let edit = self.change_log.redo_change()?.clone();
        self.render();
        self.push_forward_op(&edit);
        debug!("edit redone");
        Ok(())
    }

    /// Commits every unsaved change to the store in one transaction. On
    /// failure the store is rolled back and the session state is untouched,
    /// so the save can be retried.
    pub fn save_events(&mut self) -> Result<()> {
        if !self.change_log.has_save_changes() {
            return Ok(());
        }
        self.store.begin()?;
        match self.replay_save_ops() {
            Ok(()) => {
                self.store.commit()?;
                self.change_log.mark_saved();
                self.save_ops.clear();
                info!("edit session saved");
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback() {
                    tracing::error!(?rollback_err, "rollback after failed save also failed");
                }
                Err(e)
            }
        }
    }

    fn replay_save_ops(&self) -> Result<()> {
        for op in &self.save_ops {
            match op {
                SaveOp::Add(events) => {
                    let real: Vec<MacroEvent> = events
                        .iter()
                        .filter(|event| !event.is_dummy())
                        .cloned()
                        .collect();
                    if !real.is_empty() {
                        self.store.add_events(&real)?;
                    }
                }
                SaveOp::Remove(indexes) => self.store.remove_events(indexes)?,
                SaveOp::Set(event) => self.store.set_event(event)?,
            }
        }
        Ok(())
    }

    fn event_at(&self, index: i32) -> Result<&MacroEvent> {
        if index < 0 {
            return Err(MacrotapeError::InvalidEvent(format!(
                "negative event index {index}"
            )));
        }
        self.events.get(index as usize).ok_or_else(|| {
            MacrotapeError::InvalidEvent(format!(
                "event index {index} out of range ({} events)",
                self.events.len()
            ))
        })
    }

    fn apply_and_log(&mut self, edit: MacroEventEdit) -> Result<()> {
        apply_edit(&mut self.events, &edit)?;
        self.push_forward_op(&edit);
        self.change_log.add_change(edit);
        Ok(())
    }

    fn push_forward_op(&mut self, edit: &MacroEventEdit) {
        let op = match edit {
            MacroEventEdit::Add { events } => SaveOp::Add(events.clone()),
            MacroEventEdit::Delete { events } => SaveOp::Remove(event_indexes(events)),
            update => {
                let index = update.update_index().unwrap();
                SaveOp::Set(self.events[index as usize].clone())
            }
        };
        self.save_ops.push(op);
    }

    /// Rebuilds the working list by replaying the applied edits over the
    /// session base snapshot.
    fn render(&mut self) {
        let mut events = self.base.clone();
        for edit in self.change_log.applied() {
            // Applied edits were valid when recorded, so replaying them over
            // the same base cannot fail.
            apply_edit(&mut events, edit).expect("edit replay diverged from history");
        }
        self.events = events;
    }
}

/// Applies one edit to a working list, keeping indexes contiguous.
fn apply_edit(events: &mut Vec<MacroEvent>, edit: &MacroEventEdit) -> Result<()> {
    match edit {
        MacroEventEdit::Add { events: added } => {
            // Ascending by index so each insert lands at its final position.
            for event in added {
                let at = (event.index.max(0) as usize).min(events.len());
                events.insert(at, event.clone());
            }
            renumber(events);
        }
        MacroEventEdit::Delete { events: removed } => {
            let mut indexes = event_indexes(removed);
            indexes.sort_unstable();
            for index in indexes.iter().rev() {
                let at = *index as usize;
                if *index < 0 || at >= events.len() {
                    return Err(MacrotapeError::InvalidEvent(format!(
                        "delete index {index} out of range"
                    )));
                }
                events.remove(at);
            }
            renumber(events);
        }
        MacroEventEdit::UpdateDelay { index, new, .. } => {
            target(events, *index)?.delay_ms = *new;
        }
        MacroEventEdit::UpdateDuration { index, new, .. } => {
            target(events, *index)?.duration_ms = *new;
        }
        MacroEventEdit::UpdateKeyString { index, new, .. } => {
            let event = target(events, *index)?;
            let data = event.as_keyboard_mut().ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a keyboard event"))
            })?;
            data.key_string = new.clone();
        }
        MacroEventEdit::UpdateAutoCorrect { index, new, .. } => {
            let event = target(events, *index)?;
            let data = event.as_mouse_mut().ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a mouse event"))
            })?;
            data.auto_correct = *new;
        }
        MacroEventEdit::UpdateImage {
            index,
            new_screenshot_id,
            ..
        } => {
            let event = target(events, *index)?;
            let data = event.as_mouse_mut().ok_or_else(|| {
                MacrotapeError::InvalidEvent(format!("event {index} is not a mouse event"))
            })?;
            data.screenshot_id = *new_screenshot_id;
        }
    }
    Ok(())
}

fn target(events: &mut [MacroEvent], index: i32) -> Result<&mut MacroEvent> {
    if index < 0 {
        return Err(MacrotapeError::InvalidEvent(format!(
            "negative event index {index}"
        )));
    }
    events.get_mut(index as usize).ok_or_else(|| {
        MacrotapeError::InvalidEvent(format!("event index {index} out of range"))
    })
}
