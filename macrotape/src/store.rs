//! Macro persistence.
//!
//! [`EventStore`] is the seam between the edit/replay machinery and whatever
//! actually holds macros. [`MemoryStore`] is the in-tree implementation: an
//! in-memory macro table with clone-based transactions and JSON save/load.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbaImage;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MacrotapeError, Result};
use crate::events::{EventPayload, MacroEvent};

/// Storage backend for macros and their target screenshots.
///
/// A group of macros can be "active" at once; edits through
/// [`crate::edit_proxy::MacroEventEditProxy`] apply to every active macro.
pub trait EventStore: Send + Sync {
    /// Selects the macros subsequent calls operate on. Unknown ids are
    /// created empty.
    fn set_active_macros(&self, ids: &[i64]) -> Result<()>;

    fn active_macro_ids(&self) -> Vec<i64>;

    /// The events shared by every active macro, ordered by index.
    ///
    /// A position is uniform when all active macros perform the same action
    /// there; delay and duration come back as `-1` when the macros disagree
    /// on them. Positions where the macros differ in the action itself (or
    /// where a shorter macro has no event) are omitted.
    fn uniform_events(&self) -> Result<Vec<MacroEvent>>;

    fn num_events_for_macro(&self, id: i64) -> Result<usize>;

    /// Begins a transaction over the active macros. Transactions do not nest.
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// Inserts events into every active macro at their `index` (append when
    /// `-1`), shifting later events up.
    fn add_events(&self, events: &[MacroEvent]) -> Result<()>;

    /// Removes the events at `indexes` from every active macro and closes the
    /// index gaps.
    fn remove_events(&self, indexes: &[i32]) -> Result<()>;

    /// Replaces the event at `event.index` in every active macro.
    fn set_event(&self, event: &MacroEvent) -> Result<()>;

    /// Allocates a screenshot id not yet in use.
    fn new_screenshot_id(&self) -> Result<i64>;

    /// Stores a screenshot under a previously allocated id.
    fn save_screenshot(&self, id: i64, image: &RgbaImage) -> Result<()>;

    fn load_screenshot(&self, id: i64) -> Result<Option<RgbaImage>>;

    /// Drops a stored screenshot. Unknown ids are ignored.
    fn discard_screenshot(&self, id: i64) -> Result<()>;
}

#[derive(Default, Serialize, Deserialize)]
struct MacroTable {
    macros: HashMap<i64, Vec<MacroEvent>>,
}

struct StoreState {
    table: MacroTable,
    active: Vec<i64>,
    backup: Option<MacroTable>,
    screenshots: HashMap<i64, RgbaImage>,
}

/// In-memory [`EventStore`] with JSON persistence.
///
/// Screenshots live in memory and, when a screenshot directory is set, as PNG
/// files named by id.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    screenshot_dir: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                table: MacroTable::default(),
                active: Vec::new(),
                backup: None,
                screenshots: HashMap::new(),
            }),
            screenshot_dir: None,
        }
    }

    /// Stores screenshots as PNG files under `dir` in addition to memory.
    pub fn with_screenshot_dir(dir: impl Into<PathBuf>) -> Self {
        let mut store = Self::new();
        store.screenshot_dir = Some(dir.into());
        store
    }

    /// Loads a macro table previously written by [`MemoryStore::save_to_file`].
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path.as_ref())?;
        let table: MacroTable = serde_json::from_str(&json)?;
        info!(
            macros = table.macros.len(),
            path = %path.as_ref().display(),
            "loaded macro table"
        );
        let store = Self::new();
        store.state.lock().unwrap().table = table;
        Ok(store)
    }

    /// Writes the whole macro table as JSON. Screenshot pixels are not part
    /// of the JSON; only their ids and rects persist.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = self.state.lock().unwrap();
        let json = serde_json::to_string_pretty(&state.table)?;
        fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "saved macro table");
        Ok(())
    }

    /// Direct read access to one macro's events, for replay and display.
    pub fn events_for_macro(&self, id: i64) -> Result<Vec<MacroEvent>> {
        let state = self.state.lock().unwrap();
        state
            .table
            .macros
            .get(&id)
            .cloned()
            .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))
    }

    /// Replaces one macro's events wholesale, assigning contiguous indexes.
    pub fn put_macro(&self, id: i64, mut events: Vec<MacroEvent>) {
        for (position, event) in events.iter_mut().enumerate() {
            event.index = position as i32;
        }
        let mut state = self.state.lock().unwrap();
        state.table.macros.insert(id, events);
    }

    pub fn macro_ids(&self) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state.table.macros.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn screenshot_file(&self, id: i64) -> Option<PathBuf> {
        self.screenshot_dir
            .as_ref()
            .map(|dir| dir.join(format!("{id}.png")))
    }
}

/// Whether two events perform the same action, ignoring the per-macro timing
/// fields that the uniform view blanks out.
fn same_action(a: &MacroEvent, b: &MacroEvent) -> bool {
    if a.n_repeats != b.n_repeats {
        return false;
    }
    match (&a.payload, &b.payload) {
        (EventPayload::Mouse(ma), EventPayload::Mouse(mb)) => {
            ma.event_type == mb.event_type
                && ma.location == mb.location
                && ma.wheel_delta == mb.wheel_delta
                && ma.auto_correct == mb.auto_correct
        }
        (EventPayload::Keyboard(ka), EventPayload::Keyboard(kb)) => ka == kb,
        (EventPayload::Dummy, EventPayload::Dummy) => true,
        _ => false,
    }
}

impl EventStore for MemoryStore {
    fn set_active_macros(&self, ids: &[i64]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in ids {
            state.table.macros.entry(*id).or_default();
        }
        state.active = ids.to_vec();
        debug!(?ids, "active macros set");
        Ok(())
    }

    fn active_macro_ids(&self) -> Vec<i64> {
        self.state.lock().unwrap().active.clone()
    }

    fn uniform_events(&self) -> Result<Vec<MacroEvent>> {
        let state = self.state.lock().unwrap();
        let Some((first_id, rest)) = state.active.split_first() else {
            return Ok(Vec::new());
        };
        let first = state
            .table
            .macros
            .get(first_id)
            .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {first_id}")))?;

        let mut uniform = Vec::with_capacity(first.len());
        'events: for (position, event) in first.iter().enumerate() {
            let mut merged = event.clone();
            for id in rest {
                let other = state
                    .table
                    .macros
                    .get(id)
                    .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))?;
                let Some(candidate) = other.get(position) else {
                    continue 'events;
                };
                if !same_action(event, candidate) {
                    continue 'events;
                }
                if candidate.delay_ms != merged.delay_ms {
                    merged.delay_ms = -1;
                }
                if candidate.duration_ms != merged.duration_ms {
                    merged.duration_ms = -1;
                }
            }
            merged.index = position as i32;
            uniform.push(merged);
        }
        Ok(uniform)
    }

    fn num_events_for_macro(&self, id: i64) -> Result<usize> {
        let state = self.state.lock().unwrap();
        state
            .table
            .macros
            .get(&id)
            .map(Vec::len)
            .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))
    }

    fn begin(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.backup.is_some() {
            return Err(MacrotapeError::Storage(
                "transaction already in progress".into(),
            ));
        }
        let snapshot = MacroTable {
            macros: state.table.macros.clone(),
        };
        state.backup = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.backup.take().is_none() {
            return Err(MacrotapeError::Storage("no transaction to commit".into()));
        }
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(backup) = state.backup.take() else {
            return Err(MacrotapeError::Storage("no transaction to roll back".into()));
        };
        state.table = backup;
        warn!("transaction rolled back");
        Ok(())
    }

    fn add_events(&self, events: &[MacroEvent]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let active = state.active.clone();
        for id in active {
            let list = state
                .table
                .macros
                .get_mut(&id)
                .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))?;
            for event in events {
                let at = if event.index < 0 || event.index as usize > list.len() {
                    list.len()
                } else {
                    event.index as usize
                };
                list.insert(at, event.clone());
            }
            for (position, event) in list.iter_mut().enumerate() {
                event.index = position as i32;
            }
        }
        Ok(())
    }

    fn remove_events(&self, indexes: &[i32]) -> Result<()> {
        let mut sorted: Vec<i32> = indexes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut state = self.state.lock().unwrap();
        let active = state.active.clone();
        for id in active {
            let list = state
                .table
                .macros
                .get_mut(&id)
                .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))?;
            // High to low so earlier removals don't shift later targets.
            for index in sorted.iter().rev() {
                let at = *index as usize;
                if *index < 0 || at >= list.len() {
                    return Err(MacrotapeError::Storage(format!(
                        "event index {index} out of range for macro {id}"
                    )));
                }
                list.remove(at);
            }
            for (position, event) in list.iter_mut().enumerate() {
                event.index = position as i32;
            }
        }
        Ok(())
    }

    fn set_event(&self, event: &MacroEvent) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let active = state.active.clone();
        for id in active {
            let list = state
                .table
                .macros
                .get_mut(&id)
                .ok_or_else(|| MacrotapeError::Storage(format!("unknown macro {id}")))?;
            let at = event.index as usize;
            if event.index < 0 || at >= list.len() {
                return Err(MacrotapeError::Storage(format!(
                    "event index {} out of range for macro {id}",
                    event.index
                )));
            }
            list[at] = event.clone();
        }
        Ok(())
    }

    fn new_screenshot_id(&self) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let mut rng = rand::thread_rng();
        // Collision-checked: redraw until the id is unused.
        loop {
            let id: i64 = rng.gen_range(1..i64::MAX);
            if !state.screenshots.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    fn save_screenshot(&self, id: i64, image: &RgbaImage) -> Result<()> {
        if let Some(path) = self.screenshot_file(id) {
            image
                .save(&path)
                .map_err(|e| MacrotapeError::Storage(format!("screenshot write failed: {e}")))?;
        }
        let mut state = self.state.lock().unwrap();
        state.screenshots.insert(id, image.clone());
        Ok(())
    }

    fn load_screenshot(&self, id: i64) -> Result<Option<RgbaImage>> {
        let state = self.state.lock().unwrap();
        Ok(state.screenshots.get(&id).cloned())
    }

    fn discard_screenshot(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.screenshots.remove(&id).is_none() {
            return Ok(());
        }
        drop(state);
        if let Some(path) = self.screenshot_file(id) {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        debug!(id, "screenshot discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyboardEventData, KeyboardEventType, MouseEventData, MouseEventType, Position};

    fn click(x: i32, y: i32, delay_ms: i64) -> MacroEvent {
        let mut event = MacroEvent::mouse(MouseEventData::new(
            MouseEventType::LeftClick,
            Position::new(x, y),
        ));
        event.delay_ms = delay_ms;
        event
    }

    fn key(code: i32) -> MacroEvent {
        MacroEvent::keyboard(KeyboardEventData::new(KeyboardEventType::KeyType, code))
    }

    #[test]
    fn uniform_events_blank_differing_timing() {
        let store = MemoryStore::new();
        store.put_macro(1, vec![click(10, 10, 100), key(b'A' as i32)]);
        store.put_macro(2, vec![click(10, 10, 900), key(b'A' as i32)]);
        store.set_active_macros(&[1, 2]).unwrap();

        let uniform = store.uniform_events().unwrap();
        assert_eq!(uniform.len(), 2);
        assert_eq!(uniform[0].delay_ms, -1);
        assert_eq!(uniform[1].delay_ms, 0);
    }

    #[test]
    fn uniform_events_skip_mismatched_positions() {
        let store = MemoryStore::new();
        store.put_macro(1, vec![click(10, 10, 0), key(b'A' as i32), key(b'B' as i32)]);
        store.put_macro(2, vec![click(10, 10, 0), key(b'Z' as i32)]);
        store.set_active_macros(&[1, 2]).unwrap();

        let uniform = store.uniform_events().unwrap();
        assert_eq!(uniform.len(), 1);
        assert_eq!(uniform[0].index, 0);
    }

    #[test]
    fn add_and_remove_keep_indexes_contiguous() {
        let store = MemoryStore::new();
        store.put_macro(1, vec![key(b'A' as i32), key(b'B' as i32)]);
        store.set_active_macros(&[1]).unwrap();

        let mut inserted = key(b'X' as i32);
        inserted.index = 1;
        store.add_events(&[inserted]).unwrap();
        let events = store.events_for_macro(1).unwrap();
        assert_eq!(crate::events::event_indexes(&events), vec![0, 1, 2]);
        assert_eq!(events[1].as_keyboard().unwrap().key_code, b'X' as i32);

        store.remove_events(&[0, 2]).unwrap();
        let events = store.events_for_macro(1).unwrap();
        assert_eq!(crate::events::event_indexes(&events), vec![0]);
        assert_eq!(events[0].as_keyboard().unwrap().key_code, b'X' as i32);
    }

    #[test]
    fn rollback_restores_pre_transaction_state() {
        let store = MemoryStore::new();
        store.put_macro(1, vec![key(b'A' as i32)]);
        store.set_active_macros(&[1]).unwrap();

        store.begin().unwrap();
        store.remove_events(&[0]).unwrap();
        assert_eq!(store.num_events_for_macro(1).unwrap(), 0);
        store.rollback().unwrap();
        assert_eq!(store.num_events_for_macro(1).unwrap(), 1);
    }

    #[test]
    fn commit_keeps_changes() {
        let store = MemoryStore::new();
        store.put_macro(1, vec![key(b'A' as i32)]);
        store.set_active_macros(&[1]).unwrap();

        store.begin().unwrap();
        store.add_events(&[key(b'B' as i32)]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.num_events_for_macro(1).unwrap(), 2);
        assert!(store.commit().is_err());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("macros.json");

        let store = MemoryStore::new();
        store.put_macro(7, vec![click(3, 4, 50), key(b'Q' as i32)]);
        store.save_to_file(&path).unwrap();

        let loaded = MemoryStore::load_from_file(&path).unwrap();
        let events = loaded.events_for_macro(7).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delay_ms, 50);
    }

    #[test]
    fn screenshot_ids_never_collide() {
        let store = MemoryStore::new();
        let first = store.new_screenshot_id().unwrap();
        store.save_screenshot(first, &RgbaImage::new(2, 2)).unwrap();
        let second = store.new_screenshot_id().unwrap();
        assert_ne!(first, second);
        assert!(store.load_screenshot(first).unwrap().is_some());
        store.discard_screenshot(first).unwrap();
        assert!(store.load_screenshot(first).unwrap().is_none());
        // Discarding twice is fine.
        store.discard_screenshot(first).unwrap();
    }
}
