//! The recording log buffer.
//!
//! Raw hook events are pushed from the hook thread into a blocking queue
//! ([`EventLogBuffer::handle_event`]); a dedicated consumer thread pops them
//! and folds them into the in-progress event list ([`Coalescer`]), fusing
//! press/release pairs into clicks, pairs of clicks into double clicks,
//! scroll bursts and key auto-repeats into single repeated events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use crate::capture::ScreenCapture;
use crate::error::Result;
use crate::events::{
    EventPayload, KeyboardEventType, MacroEvent, MouseEventType, Position, Rect,
};
use crate::hook::EventSink;
use crate::keys;
use crate::queue::BlockingQueue;
use crate::store::EventStore;

/// Tunables for event coalescing and target capture.
#[derive(Debug, Clone)]
pub struct LogBufferConfig {
    /// Maximum press-to-release gap, in milliseconds, fused into a click or
    /// key type. Twice this value bounds double-click detection.
    pub click_fuse_threshold_ms: i64,

    /// How far apart, per axis, a press and release (or two clicks) may land
    /// and still fuse.
    pub spatial_tolerance_px: i32,

    /// Width of the screen region captured around a mouse press.
    pub capture_width: i32,

    /// Height of the screen region captured around a mouse press.
    pub capture_height: i32,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            click_fuse_threshold_ms: 200,
            spatial_tolerance_px: 10,
            capture_width: 200,
            capture_height: 200,
        }
    }
}

/// What [`Coalescer::observe`] did with an event.
#[derive(Debug, Default)]
pub(crate) struct Observation {
    /// The event was appended as a new entry (it may still be fused away by
    /// a later event).
    pub appended: bool,
    /// Screenshot id orphaned by a double-click fusion, to be discarded.
    pub removed_screenshot: Option<i64>,
}

/// Pure coalescing state machine over the in-progress event list. Driven
/// entirely by event timestamps so it can be exercised without a clock.
pub(crate) struct Coalescer {
    config: LogBufferConfig,
    events: Vec<MacroEvent>,
    insert_base: i32,
}

fn in_range(a: Position, b: Position, tolerance: i32) -> bool {
    (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
}

impl Coalescer {
    pub fn new(config: LogBufferConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
            insert_base: -1,
        }
    }

    /// Configures index assignment for the next [`Coalescer::finish`]: events
    /// are numbered from `base`. Negative keeps every index at `-1` (append
    /// mode downstream).
    pub fn set_insert_index(&mut self, base: i32) {
        self.insert_base = base;
    }

    pub fn last_mut(&mut self) -> Option<&mut MacroEvent> {
        self.events.last_mut()
    }

    /// Folds one captured event into the list.
    pub fn observe(&mut self, event: MacroEvent) -> Observation {
        // Cursor movement and bare modifiers never enter the log.
        match &event.payload {
            EventPayload::Mouse(data) if data.event_type == MouseEventType::Move => {
                return Observation::default();
            }
            EventPayload::Keyboard(data) if keys::is_modifier(data.key_code) => {
                return Observation::default();
            }
            _ => {}
        }

        let Some(last) = self.events.last_mut() else {
            let mut event = event;
            event.delay_ms = 0;
            self.events.push(event);
            return Observation {
                appended: true,
                removed_screenshot: None,
            };
        };

        let time_since_last = event.timestamp_ms - last.timestamp_ms;
        let threshold = self.config.click_fuse_threshold_ms;
        let tolerance = self.config.spatial_tolerance_px;

        match (&mut last.payload, &event.payload) {
            // Press then its release: fuse into a click, hold time becomes
            // the duration.
            (EventPayload::Mouse(prev), EventPayload::Mouse(data))
                if prev.event_type.is_press()
                    && prev.event_type.matching_release() == Some(data.event_type)
                    && time_since_last <= threshold
                    && in_range(prev.location, data.location, tolerance) =>
            {
                prev.event_type = match prev.event_type {
                    MouseEventType::LeftPress => MouseEventType::LeftClick,
                    MouseEventType::RightPress => MouseEventType::RightClick,
                    _ => MouseEventType::MiddleClick,
                };
                last.duration_ms = time_since_last;
                return self.try_double_click();
            }

            // Same-direction scrolling accumulates into one repeated event,
            // no matter how far apart the wheel notches arrive.
            (EventPayload::Mouse(prev), EventPayload::Mouse(data))
                if matches!(
                    prev.event_type,
                    MouseEventType::ScrollUp | MouseEventType::ScrollDown
                ) && prev.event_type == data.event_type =>
            {
                last.n_repeats += 1;
                last.duration_ms = time_since_last;
                return Observation::default();
            }

            // Key press then its release: fuse into a key type.
            (EventPayload::Keyboard(prev), EventPayload::Keyboard(data))
                if data.event_type == KeyboardEventType::KeyRelease
                    && prev.event_type == KeyboardEventType::KeyPress
                    && prev.key_code == data.key_code
                    && time_since_last <= threshold =>
            {
                prev.event_type = KeyboardEventType::KeyType;
                last.duration_ms = time_since_last;
                return Observation::default();
            }

            // Auto-repeat: the same key pressed again while still unreleased.
            // Unbounded in time so a long hold stays one event.
            (EventPayload::Keyboard(prev), EventPayload::Keyboard(data))
                if data.event_type == KeyboardEventType::KeyPress
                    && prev.event_type == KeyboardEventType::KeyPress
                    && prev.key_code == data.key_code =>
            {
                last.n_repeats += 1;
                last.duration_ms = time_since_last;
                return Observation::default();
            }

            _ => {}
        }

        // A release whose press already fused into a click (or that drifted
        // out of range) stands alone; it still replays correctly.
        let mut event = event;
        event.delay_ms = time_since_last - last.duration_ms;
        self.events.push(event);
        Observation {
            appended: true,
            removed_screenshot: None,
        }
    }

    /// Checks whether the freshly formed click at the tail completes a double
    /// click with the click before it.
    fn try_double_click(&mut self) -> Observation {
        let len = self.events.len();
        if len < 2 {
            return Observation::default();
        }
        let (earlier, later) = {
            let (head, tail) = self.events.split_at(len - 1);
            (&head[len - 2], &tail[0])
        };
        let (Some(first), Some(second)) = (earlier.as_mouse(), later.as_mouse()) else {
            return Observation::default();
        };
        if first.event_type != MouseEventType::LeftClick
            || second.event_type != MouseEventType::LeftClick
        {
            return Observation::default();
        }
        let gap = later.timestamp_ms - earlier.timestamp_ms;
        if gap > 2 * self.config.click_fuse_threshold_ms
            || !in_range(
                first.location,
                second.location,
                self.config.spatial_tolerance_px,
            )
        {
            return Observation::default();
        }

        // The earlier click dissolves into the double click; its screenshot
        // is orphaned.
        let removed = self.events.remove(len - 2);
        let removed_screenshot = removed
            .as_mouse()
            .filter(|m| m.screenshot_id >= 0)
            .map(|m| m.screenshot_id);
        let tail = self.events.last_mut().unwrap();
        tail.delay_ms = removed.delay_ms;
        if let Some(mouse) = tail.as_mouse_mut() {
            mouse.event_type = MouseEventType::DoubleClick;
        }
        debug!("fused double click");
        Observation {
            appended: false,
            removed_screenshot,
        }
    }

    /// Finalizes the recording: drops `discard_tail` trailing events (the
    /// stop gesture's own input), merges printable runs into key strings,
    /// escapes quotes and backslashes for storage, assigns indexes and moves
    /// the list out.
    /// Returns the events plus the screenshot ids orphaned by the tail cut.
    pub fn finish(&mut self, discard_tail: usize) -> (Vec<MacroEvent>, Vec<i64>) {
        let mut orphaned = Vec::new();
        for _ in 0..discard_tail {
            if let Some(event) = self.events.pop() {
                if let Some(id) = event.as_mouse().map(|m| m.screenshot_id) {
                    if id >= 0 {
                        orphaned.push(id);
                    }
                }
            }
        }

        let raw = std::mem::take(&mut self.events);
        let mut merged: Vec<MacroEvent> = Vec::with_capacity(raw.len());
        let mut building_string = false;

        for event in raw {
            // A release can only continue a run (its press already
            // contributed the character), never start one.
            let qualifies = event
                .as_keyboard()
                .map(|data| {
                    event.n_repeats == 0
                        && keys::is_char_key(data)
                        && (matches!(
                            data.event_type,
                            KeyboardEventType::KeyPress | KeyboardEventType::KeyType
                        ) || (building_string
                            && data.event_type == KeyboardEventType::KeyRelease))
                })
                .unwrap_or(false);

            if !qualifies {
                building_string = false;
                merged.push(event);
                continue;
            }

            if building_string {
                let carrier = merged.last_mut().unwrap();
                carrier.duration_ms += event.delay_ms;
                let data = event.as_keyboard().unwrap();
                let text = &mut carrier.as_keyboard_mut().unwrap().key_string;
                if data.event_type == KeyboardEventType::KeyRelease {
                    // Delay folded in above; the character came with the press.
                } else if data.key_code == keys::BACKSPACE {
                    text.pop();
                } else {
                    text.push_str(&data.key_label());
                }
            } else {
                let mut carrier = event;
                let data = carrier.as_keyboard_mut().unwrap();
                let label = if data.key_code == keys::BACKSPACE {
                    String::new()
                } else {
                    data.key_label()
                };
                data.event_type = KeyboardEventType::KeyString;
                data.key_string = label;
                data.key_code = keys::NONE;
                carrier.duration_ms = 0;
                merged.push(carrier);
                building_string = true;
            }
        }

        for event in &mut merged {
            if let Some(data) = event.as_keyboard_mut() {
                if data.event_type == KeyboardEventType::KeyString {
                    // The storage layer quotes strings with single quotes.
                    data.key_string = data
                        .key_string
                        .replace('\\', "\\\\")
                        .replace('\'', "''");
                }
            }
        }

        if self.insert_base >= 0 {
            for (offset, event) in merged.iter_mut().enumerate() {
                event.index = self.insert_base + offset as i32;
            }
        }

        info!(events = merged.len(), "recording finalized");
        (merged, orphaned)
    }

    #[cfg(test)]
    pub fn events(&self) -> &[MacroEvent] {
        &self.events
    }
}

struct BufferShared {
    coalescer: Mutex<Coalescer>,
    pending: Mutex<usize>,
    drained: Condvar,
    store: Arc<dyn EventStore>,
    capture: Arc<dyn ScreenCapture>,
    config: LogBufferConfig,
    recording: AtomicBool,
}

/// Threaded wrapper around [`Coalescer`]: producer side runs on the hook
/// thread, one consumer thread owns the in-progress list.
pub struct EventLogBuffer {
    shared: Arc<BufferShared>,
    queue: Arc<BlockingQueue<MacroEvent>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventLogBuffer {
    pub fn new(
        store: Arc<dyn EventStore>,
        capture: Arc<dyn ScreenCapture>,
        config: LogBufferConfig,
    ) -> Arc<Self> {
        let shared = Arc::new(BufferShared {
            coalescer: Mutex::new(Coalescer::new(config.clone())),
            pending: Mutex::new(0),
            drained: Condvar::new(),
            store,
            capture,
            config,
            recording: AtomicBool::new(true),
        });
        let queue = Arc::new(BlockingQueue::new());

        let buffer = Arc::new(Self {
            shared: Arc::clone(&shared),
            queue: Arc::clone(&queue),
            worker: Mutex::new(None),
        });

        let handle = thread::Builder::new()
            .name("macrotape-coalescer".into())
            .spawn(move || consumer_loop(shared, queue))
            .expect("failed to spawn coalescer thread");
        *buffer.worker.lock().unwrap() = Some(handle);
        buffer
    }

    /// See [`Coalescer::set_insert_index`].
    pub fn set_insert_index(&self, base: i32) {
        self.shared.coalescer.lock().unwrap().set_insert_index(base);
    }

    /// Producer side. Stamps mouse presses with a screenshot and a fresh
    /// collision-checked id before queueing, then hands the event to the
    /// consumer thread.
    pub fn add_event(&self, mut event: MacroEvent) {
        if !self.shared.recording.load(Ordering::SeqCst) {
            return;
        }
        if let Some(mouse) = event.as_mouse_mut() {
            if mouse.event_type.is_press() {
                let rect = Rect::new(
                    mouse.location.x - self.shared.config.capture_width / 2,
                    mouse.location.y - self.shared.config.capture_height / 2,
                    self.shared.config.capture_width,
                    self.shared.config.capture_height,
                );
                match self.shared.capture.take_screenshot(rect) {
                    Ok(image) => match self.shared.store.new_screenshot_id() {
                        Ok(id) => {
                            mouse.screenshot_id = id;
                            mouse.screenshot_image = Some(image);
                            mouse.screenshot_rect = rect;
                        }
                        Err(e) => warn!(?e, "screenshot id allocation failed"),
                    },
                    Err(e) => warn!(?e, "screenshot capture failed"),
                }
            }
        }
        {
            let mut pending = self.shared.pending.lock().unwrap();
            *pending += 1;
        }
        self.queue.push(event);
    }

    /// Finalizes the recording and moves the coalesced events out.
    ///
    /// Blocks until the consumer has drained every event queued so far;
    /// callers deactivate the hook first so production has stopped. The last
    /// `discard_tail` events (the stop gesture) are dropped and their
    /// screenshots discarded.
    pub fn take_added_events(&self, discard_tail: usize) -> Result<Vec<MacroEvent>> {
        self.shared.recording.store(false, Ordering::SeqCst);
        let mut pending = self.shared.pending.lock().unwrap();
        while *pending > 0 {
            pending = self.shared.drained.wait(pending).unwrap();
        }
        drop(pending);

        let (events, orphaned) = self.shared.coalescer.lock().unwrap().finish(discard_tail);
        for id in orphaned {
            self.shared.store.discard_screenshot(id)?;
        }
        self.shared.recording.store(true, Ordering::SeqCst);
        Ok(events)
    }

    /// Stops the consumer thread. Called once, when recording is over for
    /// good.
    pub fn shutdown(&self) {
        self.queue.close();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl EventSink for EventLogBuffer {
    fn handle_event(&self, event: MacroEvent) {
        self.add_event(event);
    }
}

impl Drop for EventLogBuffer {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn consumer_loop(shared: Arc<BufferShared>, queue: Arc<BlockingQueue<MacroEvent>>) {
    while let Some(event) = queue.pop() {
        {
            let mut coalescer = shared.coalescer.lock().unwrap();
            let observation = coalescer.observe(event);

            if let Some(id) = observation.removed_screenshot {
                if let Err(e) = shared.store.discard_screenshot(id) {
                    warn!(?e, id, "failed to discard fused screenshot");
                }
            }

            // Target isolation and screenshot storage wait until the event
            // is actually kept in the log.
            if observation.appended {
                if let Some(mouse) = coalescer.last_mut().and_then(|e| e.as_mouse_mut()) {
                    if let Some(image) = mouse.screenshot_image.as_ref() {
                        let (rect, kind) =
                            shared
                                .capture
                                .isolate_target(image, mouse.location, mouse.cursor_type);
                        mouse.screenshot_rect = rect;
                        mouse.target_image_type = kind;
                        if let Err(e) = shared.store.save_screenshot(mouse.screenshot_id, image) {
                            warn!(?e, "failed to store screenshot");
                        }
                    }
                }
            }
        }

        let mut pending = shared.pending.lock().unwrap();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            shared.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyboardEventData, MouseEventData};

    fn press(ts: i64, x: i32, y: i32) -> MacroEvent {
        mouse(MouseEventType::LeftPress, ts, x, y)
    }

    fn release(ts: i64, x: i32, y: i32) -> MacroEvent {
        mouse(MouseEventType::LeftRelease, ts, x, y)
    }

    fn mouse(event_type: MouseEventType, ts: i64, x: i32, y: i32) -> MacroEvent {
        let mut event = MacroEvent::mouse(MouseEventData::new(event_type, Position::new(x, y)));
        event.timestamp_ms = ts;
        event
    }

    fn key_press(ts: i64, code: i32) -> MacroEvent {
        key(KeyboardEventType::KeyPress, ts, code)
    }

    fn key_release(ts: i64, code: i32) -> MacroEvent {
        key(KeyboardEventType::KeyRelease, ts, code)
    }

    fn key(event_type: KeyboardEventType, ts: i64, code: i32) -> MacroEvent {
        let mut event =
            MacroEvent::keyboard(KeyboardEventData::new(event_type, code));
        event.timestamp_ms = ts;
        event
    }

    fn coalescer() -> Coalescer {
        Coalescer::new(LogBufferConfig::default())
    }

    #[test]
    fn press_release_fuse_into_click() {
        let mut c = coalescer();
        c.observe(press(1000, 50, 50));
        c.observe(release(1150, 53, 47));
        assert_eq!(c.events().len(), 1);
        let mouse = c.events()[0].as_mouse().unwrap();
        assert_eq!(mouse.event_type, MouseEventType::LeftClick);
        assert_eq!(c.events()[0].duration_ms, 150);
    }

    #[test]
    fn distant_release_does_not_fuse() {
        let mut c = coalescer();
        c.observe(press(1000, 50, 50));
        c.observe(release(1150, 80, 50));
        assert_eq!(c.events().len(), 2);
        assert_eq!(
            c.events()[0].as_mouse().unwrap().event_type,
            MouseEventType::LeftPress
        );
        assert_eq!(
            c.events()[1].as_mouse().unwrap().event_type,
            MouseEventType::LeftRelease
        );
    }

    #[test]
    fn slow_release_does_not_fuse() {
        let mut c = coalescer();
        c.observe(press(1000, 50, 50));
        c.observe(release(1300, 50, 50));
        assert_eq!(c.events().len(), 2);
    }

    #[test]
    fn two_quick_clicks_fuse_into_double_click() {
        let mut first_press = press(1000, 50, 50);
        first_press.as_mouse_mut().unwrap().screenshot_id = 11;
        let mut c = coalescer();
        c.observe(first_press);
        c.observe(release(1050, 50, 50));
        c.observe(press(1200, 51, 50));
        let obs = c.observe(release(1250, 51, 50));

        assert_eq!(obs.removed_screenshot, Some(11));
        assert_eq!(c.events().len(), 1);
        assert_eq!(
            c.events()[0].as_mouse().unwrap().event_type,
            MouseEventType::DoubleClick
        );
    }

    #[test]
    fn far_apart_clicks_stay_separate() {
        let mut c = coalescer();
        c.observe(press(1000, 50, 50));
        c.observe(release(1050, 50, 50));
        c.observe(press(1200, 200, 200));
        c.observe(release(1250, 200, 200));
        assert_eq!(c.events().len(), 2);
        assert!(c
            .events()
            .iter()
            .all(|e| e.as_mouse().unwrap().event_type == MouseEventType::LeftClick));
    }

    #[test]
    fn same_direction_scrolls_coalesce() {
        let mut c = coalescer();
        c.observe(mouse(MouseEventType::ScrollUp, 1000, 10, 10));
        c.observe(mouse(MouseEventType::ScrollUp, 1080, 10, 10));
        c.observe(mouse(MouseEventType::ScrollUp, 1160, 10, 10));
        assert_eq!(c.events().len(), 1);
        assert_eq!(c.events()[0].n_repeats, 2);
    }

    #[test]
    fn slow_scrolls_still_coalesce() {
        let mut c = coalescer();
        c.observe(mouse(MouseEventType::ScrollUp, 1000, 10, 10));
        c.observe(mouse(MouseEventType::ScrollUp, 1500, 10, 10));
        c.observe(mouse(MouseEventType::ScrollUp, 2500, 10, 10));
        assert_eq!(c.events().len(), 1);
        assert_eq!(c.events()[0].n_repeats, 2);
    }

    #[test]
    fn opposite_scrolls_do_not_coalesce() {
        let mut c = coalescer();
        c.observe(mouse(MouseEventType::ScrollUp, 1000, 10, 10));
        c.observe(mouse(MouseEventType::ScrollDown, 1080, 10, 10));
        assert_eq!(c.events().len(), 2);
    }

    #[test]
    fn key_press_release_fuse_into_key_type() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_release(1090, b'A' as i32));
        assert_eq!(c.events().len(), 1);
        let data = c.events()[0].as_keyboard().unwrap();
        assert_eq!(data.event_type, KeyboardEventType::KeyType);
        assert_eq!(c.events()[0].duration_ms, 90);
    }

    #[test]
    fn held_key_coalesces_repeats() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_press(1030, b'A' as i32));
        c.observe(key_press(1060, b'A' as i32));
        c.observe(key_release(1100, b'A' as i32));
        assert_eq!(c.events().len(), 1);
        assert_eq!(c.events()[0].n_repeats, 2);
    }

    #[test]
    fn long_hold_stays_one_event() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_press(1150, b'A' as i32));
        c.observe(key_press(1300, b'A' as i32));
        c.observe(key_press(1450, b'A' as i32));
        assert_eq!(c.events().len(), 1);
        assert_eq!(c.events()[0].n_repeats, 3);
        assert_eq!(
            c.events()[0].as_keyboard().unwrap().event_type,
            KeyboardEventType::KeyPress
        );
    }

    #[test]
    fn double_tap_stays_two_presses() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'L' as i32));
        c.observe(key_release(1050, b'L' as i32));
        c.observe(key_press(1100, b'L' as i32));
        assert_eq!(c.events().len(), 2);
        c.observe(key_release(1150, b'L' as i32));
        assert_eq!(c.events().len(), 2);

        let (events, _) = c.finish(0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_keyboard().unwrap().key_string, "ll");
    }

    #[test]
    fn modifiers_and_moves_are_suppressed() {
        let mut c = coalescer();
        c.observe(key_press(1000, keys::SHIFT));
        c.observe(mouse(MouseEventType::Move, 1010, 5, 5));
        c.observe(key_release(1020, keys::SHIFT));
        assert!(c.events().is_empty());
    }

    #[test]
    fn appended_event_delay_subtracts_previous_duration() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_release(1100, b'A' as i32)); // duration 100
        c.observe(press(1350, 50, 50));
        assert_eq!(c.events().len(), 2);
        assert_eq!(c.events()[1].delay_ms, 250);
    }

    #[test]
    fn typed_run_becomes_key_string() {
        let mut c = coalescer();
        let mut shift_h = key_press(1000, b'H' as i32);
        shift_h.as_keyboard_mut().unwrap().mod1 = keys::SHIFT;
        c.observe(shift_h);
        let mut shift_h_up = key_release(1050, b'H' as i32);
        shift_h_up.as_keyboard_mut().unwrap().mod1 = keys::SHIFT;
        c.observe(shift_h_up);
        c.observe(key_press(1200, b'I' as i32));
        c.observe(key_release(1250, b'I' as i32));

        let (events, _) = c.finish(0);
        assert_eq!(events.len(), 1);
        let data = events[0].as_keyboard().unwrap();
        assert_eq!(data.event_type, KeyboardEventType::KeyString);
        assert_eq!(data.key_string, "Hi");
    }

    #[test]
    fn backspace_corrects_the_string() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'H' as i32));
        c.observe(key_release(1050, b'H' as i32));
        c.observe(key_press(1200, b'X' as i32));
        c.observe(key_release(1250, b'X' as i32));
        c.observe(key_press(1400, keys::BACKSPACE));
        c.observe(key_release(1450, keys::BACKSPACE));
        c.observe(key_press(1600, b'I' as i32));
        c.observe(key_release(1650, b'I' as i32));

        let (events, _) = c.finish(0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_keyboard().unwrap().key_string, "hi");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped_for_storage() {
        let mut c = coalescer();
        c.observe(key_press(1000, keys::APOSTROPHE));
        c.observe(key_release(1050, keys::APOSTROPHE));
        c.observe(key_press(1200, keys::BACKSLASH));
        c.observe(key_release(1250, keys::BACKSLASH));
        let (events, _) = c.finish(0);
        assert_eq!(events[0].as_keyboard().unwrap().key_string, "''\\\\");
    }

    #[test]
    fn bare_release_inside_a_run_is_absorbed() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_release(1050, b'A' as i32));
        c.observe(key_press(1300, b'B' as i32));
        // Released too late to fuse; the press already typed the character.
        c.observe(key_release(1600, b'B' as i32));
        c.observe(key_press(1700, b'C' as i32));
        c.observe(key_release(1750, b'C' as i32));

        let (events, _) = c.finish(0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_keyboard().unwrap().key_string, "abc");
    }

    #[test]
    fn key_string_runs_end_at_non_char_events() {
        let mut c = coalescer();
        c.observe(key_press(1000, b'A' as i32));
        c.observe(key_release(1050, b'A' as i32));
        c.observe(press(1300, 10, 10));
        c.observe(release(1350, 10, 10));
        c.observe(key_press(1600, b'B' as i32));
        c.observe(key_release(1650, b'B' as i32));

        let (events, _) = c.finish(0);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_keyboard().unwrap().key_string, "a");
        assert_eq!(events[2].as_keyboard().unwrap().key_string, "b");
    }

    #[test]
    fn finish_discards_tail_and_reports_orphans() {
        let mut c = coalescer();
        c.observe(key_press(1000, keys::RETURN));
        let mut stop = press(2000, 10, 10);
        stop.as_mouse_mut().unwrap().screenshot_id = 99;
        c.observe(stop);

        let (events, orphaned) = c.finish(1);
        assert_eq!(events.len(), 1);
        assert_eq!(orphaned, vec![99]);
    }

    #[test]
    fn finish_assigns_indexes_from_base() {
        let mut c = coalescer();
        c.set_insert_index(5);
        c.observe(press(1000, 10, 10));
        c.observe(mouse(MouseEventType::ScrollUp, 1500, 10, 10));
        let (events, _) = c.finish(0);
        assert_eq!(crate::events::event_indexes(&events), vec![5, 6]);
    }

    #[test]
    fn append_mode_keeps_indexes_unassigned() {
        let mut c = coalescer();
        c.observe(press(1000, 10, 10));
        let (events, _) = c.finish(0);
        assert_eq!(events[0].index, -1);
    }
}
