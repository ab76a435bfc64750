//! The replay engine.
//!
//! [`MacroActivator`] runs a macro's events on a dedicated worker thread and
//! reports progress over a channel. Replay is interruptible at every sleep
//! (sleeps are chunked) and guarantees cleanup: if it stops mid-event, the
//! matching release is synthesized so no button or key is left held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::TargetLocator;
use crate::error::{MacrotapeError, Result};
use crate::events::{
    EventPayload, KeyboardEventType, MacroEvent, MouseEventType, Position,
};
use crate::inject::{InputInjector, MouseButton};
use crate::keys;
use crate::store::EventStore;

/// Progress reports sent while a macro runs.
#[derive(Debug)]
pub enum ActivatorSignal {
    /// Sent just before an event is executed.
    Activating(MacroEvent),
    /// Always sent last, whether the run completed, was stopped, or failed.
    Stopped { error: Option<String> },
}

/// Replay tunables.
#[derive(Debug, Clone)]
pub struct ActivatorConfig {
    /// Pixels the cursor advances per step while walking to a click point.
    pub cursor_step_rate: f64,

    /// Remaining distance at which the walk jumps straight to the target.
    pub cursor_jump_px: i32,

    /// Upper bound on one uninterruptible sleep slice.
    pub sleep_chunk_ms: u64,

    /// Pause before positioning the cursor for a location-sensitive event.
    pub settle_delay_ms: u64,
}

impl Default for ActivatorConfig {
    fn default() -> Self {
        Self {
            cursor_step_rate: 2.0,
            cursor_jump_px: 10,
            sleep_chunk_ms: 50,
            settle_delay_ms: 100,
        }
    }
}

/// Runs macros. One at a time; a second `run_macro` while running is
/// rejected with [`MacrotapeError::AlreadyRunning`].
pub struct MacroActivator {
    injector: Arc<dyn InputInjector>,
    store: Arc<dyn EventStore>,
    locator: Option<Arc<dyn TargetLocator>>,
    config: ActivatorConfig,
    running: Arc<AtomicBool>,
}

impl MacroActivator {
    pub fn new(injector: Arc<dyn InputInjector>, store: Arc<dyn EventStore>) -> Self {
        Self {
            injector,
            store,
            locator: None,
            config: ActivatorConfig::default(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(mut self, config: ActivatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables click-point correction for events recorded with
    /// `auto_correct`.
    pub fn with_locator(mut self, locator: Arc<dyn TargetLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests the current run to stop. The worker notices at the next
    /// sleep chunk or event boundary, performs cleanup, and sends
    /// [`ActivatorSignal::Stopped`].
    pub fn stop_macro(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Starts replaying `events` on a worker thread. Returns the signal
    /// channel; the final [`ActivatorSignal::Stopped`] is always delivered.
    pub fn run_macro(&self, events: Vec<MacroEvent>) -> Result<mpsc::Receiver<ActivatorSignal>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MacrotapeError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel();
        let worker = Worker {
            injector: Arc::clone(&self.injector),
            store: Arc::clone(&self.store),
            locator: self.locator.clone(),
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            signals: tx,
        };

        thread::Builder::new()
            .name("macrotape-activator".into())
            .spawn(move || worker.run(events))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                MacrotapeError::Injection(format!("failed to spawn replay thread: {e}"))
            })?;

        Ok(rx)
    }
}

/// What cleanup an interrupted event requires.
#[derive(Debug, PartialEq, Eq)]
enum CleanupAction {
    ReleaseButton(MouseButton),
    ReleaseKey(i32),
}

/// The corrective release owed if replay stops after starting `event`.
/// Scrolls, moves and key strings leave nothing held.
fn corrective_release(event: &MacroEvent) -> Option<CleanupAction> {
    match &event.payload {
        EventPayload::Mouse(data) => data.event_type.matching_release().map(|release| {
            CleanupAction::ReleaseButton(match release {
                MouseEventType::RightRelease => MouseButton::Right,
                MouseEventType::MiddleRelease => MouseButton::Middle,
                _ => MouseButton::Left,
            })
        }),
        EventPayload::Keyboard(data) => match data.event_type {
            KeyboardEventType::KeyString => None,
            _ if data.key_code == keys::NONE => None,
            _ => Some(CleanupAction::ReleaseKey(data.key_code)),
        },
        EventPayload::Dummy => None,
    }
}

struct Worker {
    injector: Arc<dyn InputInjector>,
    store: Arc<dyn EventStore>,
    locator: Option<Arc<dyn TargetLocator>>,
    config: ActivatorConfig,
    running: Arc<AtomicBool>,
    signals: mpsc::Sender<ActivatorSignal>,
}

impl Worker {
    fn run(self, events: Vec<MacroEvent>) {
        info!(events = events.len(), "macro run started");
        let mut error: Option<String> = None;
        let mut last_started: Option<MacroEvent> = None;

        for event in events {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if event.is_dummy() {
                continue;
            }
            match self.run_event(event, &mut last_started) {
                Ok(true) => {}
                Ok(false) => break, // interrupted
                Err(e) => {
                    warn!(?e, "replay failed");
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        // Cleanup before the stopped signal: never leave a button or key
        // held down.
        let interrupted = !self.running.load(Ordering::SeqCst) || error.is_some();
        if interrupted {
            if let Some(action) = last_started.as_ref().and_then(corrective_release) {
                debug!(?action, "issuing corrective release");
                let result = match action {
                    CleanupAction::ReleaseButton(button) => self.injector.release_button(button),
                    CleanupAction::ReleaseKey(code) => self.injector.release_key(code),
                };
                if let Err(e) = result {
                    warn!(?e, "corrective release failed");
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let _ = self.signals.send(ActivatorSignal::Stopped { error });
        info!("macro run stopped");
    }

    /// Runs one event. `Ok(false)` means the run was interrupted.
    fn run_event(
        &self,
        mut event: MacroEvent,
        last_started: &mut Option<MacroEvent>,
    ) -> Result<bool> {
        // Key strings paste instantly; recorded typing time is dropped.
        let is_key_string = event
            .as_keyboard()
            .map(|data| data.event_type == KeyboardEventType::KeyString)
            .unwrap_or(false);
        if is_key_string {
            event.duration_ms = 0;
        }

        let _ = self
            .signals
            .send(ActivatorSignal::Activating(event.clone()));

        let positioning_started = Instant::now();
        if let Some(data) = event.as_mouse() {
            if data.event_type.is_location_sensitive() {
                if !self.sleep(self.config.settle_delay_ms as i64) {
                    return Ok(false);
                }
                let target = self.corrected_click_point(&event)?;
                if !self.walk_cursor(target)? {
                    return Ok(false);
                }
            }
        }

        let positioning_ms = positioning_started.elapsed().as_millis() as i64;
        if !self.sleep(event.delay_ms - positioning_ms) {
            return Ok(false);
        }

        *last_started = Some(event.clone());
        self.execute(&event)
    }

    /// The click point, corrected by relocating the stored target on screen
    /// when the event asks for it.
    fn corrected_click_point(&self, event: &MacroEvent) -> Result<Position> {
        let data = event.as_mouse().unwrap();
        let recorded = data.location;
        if !data.auto_correct {
            return Ok(recorded);
        }
        let Some(locator) = self.locator.as_ref() else {
            return Ok(recorded);
        };
        let screenshot = match &data.screenshot_image {
            Some(image) => Some(image.clone()),
            None if data.screenshot_id >= 0 => self.store.load_screenshot(data.screenshot_id)?,
            None => None,
        };
        let Some(screenshot) = screenshot else {
            return Ok(recorded);
        };
        match locator.locate_target(&screenshot, data.screenshot_rect) {
            Some(found) => {
                let old_center = data.screenshot_rect.center();
                let new_center = found.center();
                let corrected = Position::new(
                    recorded.x + new_center.x - old_center.x,
                    recorded.y + new_center.y - old_center.y,
                );
                debug!(?recorded, ?corrected, "click point corrected");
                Ok(corrected)
            }
            None => {
                debug!("target not found on screen, using recorded point");
                Ok(recorded)
            }
        }
    }

    /// Walks the cursor toward `target` in small steps, jumping the last few
    /// pixels. `Ok(false)` when interrupted mid-walk.
    fn walk_cursor(&self, target: Position) -> Result<bool> {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(false);
            }
            let current = self.injector.cursor_position()?;
            let dx = (target.x - current.x) as f64;
            let dy = (target.y - current.y) as f64;
            let distance = (dx * dx + dy * dy).sqrt();
            if distance <= self.config.cursor_jump_px as f64 {
                self.injector.move_cursor(target)?;
                return Ok(true);
            }
            let step = self.config.cursor_step_rate / distance;
            let next = Position::new(
                current.x + (dx * step).round() as i32,
                current.y + (dy * step).round() as i32,
            );
            self.injector.move_cursor(next)?;
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Executes the event `n_repeats + 1` times, spacing the repeats by an
    /// equal slice of the recorded duration.
    fn execute(&self, event: &MacroEvent) -> Result<bool> {
        let reps = event.n_repeats as i64 + 1;
        let slice = event.duration_ms.max(0) / reps;

        match &event.payload {
            EventPayload::Mouse(data) => {
                for rep in 0..reps {
                    if !self.running.load(Ordering::SeqCst) {
                        return Ok(false);
                    }
                    match data.event_type {
                        MouseEventType::LeftPress => self.injector.press_button(MouseButton::Left)?,
                        MouseEventType::LeftRelease => {
                            self.injector.release_button(MouseButton::Left)?
                        }
                        MouseEventType::RightPress => {
                            self.injector.press_button(MouseButton::Right)?
                        }
                        MouseEventType::RightRelease => {
                            self.injector.release_button(MouseButton::Right)?
                        }
                        MouseEventType::MiddlePress => {
                            self.injector.press_button(MouseButton::Middle)?
                        }
                        MouseEventType::MiddleRelease => {
                            self.injector.release_button(MouseButton::Middle)?
                        }
                        MouseEventType::LeftClick
                        | MouseEventType::RightClick
                        | MouseEventType::MiddleClick => {
                            let button = match data.event_type {
                                MouseEventType::RightClick => MouseButton::Right,
                                MouseEventType::MiddleClick => MouseButton::Middle,
                                _ => MouseButton::Left,
                            };
                            self.injector.press_button(button)?;
                            if !self.sleep(slice) {
                                // The matching release is owed; cleanup
                                // handles it.
                                return Ok(false);
                            }
                            self.injector.release_button(button)?;
                        }
                        MouseEventType::DoubleClick => {
                            for _ in 0..2 {
                                self.injector.press_button(MouseButton::Left)?;
                                self.injector.release_button(MouseButton::Left)?;
                            }
                        }
                        MouseEventType::ScrollUp => self.injector.scroll(1)?,
                        MouseEventType::ScrollDown => self.injector.scroll(-1)?,
                        MouseEventType::Move => {}
                    }
                    if rep + 1 < reps && !self.sleep(slice) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            EventPayload::Keyboard(data) => self.execute_keyboard(data, reps, slice),
            EventPayload::Dummy => Ok(true),
        }
    }

    fn execute_keyboard(
        &self,
        data: &crate::events::KeyboardEventData,
        reps: i64,
        slice: i64,
    ) -> Result<bool> {
        if data.event_type == KeyboardEventType::KeyString {
            // Quotes and backslashes were escaped for storage; undo that
            // before pasting.
            let text = data.key_string.replace("''", "'").replace("\\\\", "\\");
            self.injector.paste_text(&text)?;
            return Ok(true);
        }

        // Lock keys toggle only when the hardware state disagrees with the
        // recording; Num Lock is forced off for navigation-cluster keys so
        // the keypad variants replay as navigation.
        let want_num_lock =
            data.num_lock && !keys::needs_numpad_off(data.key_code & !keys::KEYPAD);
        if self.injector.num_lock_on()? != want_num_lock {
            self.tap(keys::NUM_LOCK)?;
        }
        let mut caps_turned_on = false;
        if self.injector.caps_lock_on()? != data.caps_lock {
            self.tap(keys::CAPS_LOCK)?;
            caps_turned_on = data.caps_lock;
        }

        for modifier in [data.mod1, data.mod2] {
            if modifier != keys::NONE {
                self.injector.press_key(modifier)?;
            }
        }

        let mut interrupted = false;
        for rep in 0..reps {
            if !self.running.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            match data.event_type {
                KeyboardEventType::KeyPress => self.injector.press_key(data.key_code)?,
                KeyboardEventType::KeyRelease => self.injector.release_key(data.key_code)?,
                KeyboardEventType::KeyType => {
                    self.injector.press_key(data.key_code)?;
                    if !self.sleep(slice) {
                        interrupted = true;
                        break;
                    }
                    self.injector.release_key(data.key_code)?;
                }
                KeyboardEventType::KeyString => unreachable!(),
            }
            if rep + 1 < reps && !self.sleep(slice) {
                interrupted = true;
                break;
            }
        }

        for modifier in [data.mod2, data.mod1] {
            if modifier != keys::NONE {
                self.injector.release_key(modifier)?;
            }
        }
        if caps_turned_on {
            self.tap(keys::CAPS_LOCK)?;
        }

        Ok(!interrupted)
    }

    fn tap(&self, key_code: i32) -> Result<()> {
        self.injector.press_key(key_code)?;
        self.injector.release_key(key_code)
    }

    /// Interruptible sleep in chunks of at most `sleep_chunk_ms`. Returns
    /// false when the run was stopped mid-sleep.
    fn sleep(&self, ms: i64) -> bool {
        let mut remaining = ms.max(0) as u64;
        while remaining > 0 {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let chunk = remaining.min(self.config.sleep_chunk_ms);
            thread::sleep(Duration::from_millis(chunk));
            remaining -= chunk;
        }
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{KeyboardEventData, MouseEventData};

    #[test]
    fn corrective_release_matches_started_event() {
        let press = MacroEvent::mouse(MouseEventData::new(
            MouseEventType::LeftPress,
            Position::new(0, 0),
        ));
        assert_eq!(
            corrective_release(&press),
            Some(CleanupAction::ReleaseButton(MouseButton::Left))
        );

        let right_click = MacroEvent::mouse(MouseEventData::new(
            MouseEventType::RightClick,
            Position::new(0, 0),
        ));
        assert_eq!(
            corrective_release(&right_click),
            Some(CleanupAction::ReleaseButton(MouseButton::Right))
        );

        let scroll = MacroEvent::mouse(MouseEventData::new(
            MouseEventType::ScrollUp,
            Position::new(0, 0),
        ));
        assert_eq!(corrective_release(&scroll), None);

        let key = MacroEvent::keyboard(KeyboardEventData::new(
            KeyboardEventType::KeyPress,
            b'A' as i32,
        ));
        assert_eq!(
            corrective_release(&key),
            Some(CleanupAction::ReleaseKey(b'A' as i32))
        );

        let mut string = KeyboardEventData::new(KeyboardEventType::KeyString, keys::NONE);
        string.key_string = "hello".into();
        assert_eq!(corrective_release(&MacroEvent::keyboard(string)), None);
    }
}
