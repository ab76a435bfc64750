//! Shared test doubles for the integration tests.

use std::sync::Mutex;

use image::RgbaImage;
use macrotape::capture::TargetLocator;
use macrotape::error::{MacrotapeError, Result};
use macrotape::events::{Position, Rect};
use macrotape::inject::{InputInjector, MouseButton};
use macrotape::keys;

/// One injected action, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Move(Position),
    Press(MouseButton),
    Release(MouseButton),
    Scroll(i32),
    KeyDown(i32),
    KeyUp(i32),
    Paste(String),
}

struct MockState {
    actions: Vec<Action>,
    cursor: Position,
    caps_lock: bool,
    num_lock: bool,
    fail_on_press: bool,
}

/// Injector that records everything and simulates cursor/lock state.
pub struct MockInjector {
    state: Mutex<MockState>,
}

impl Default for MockInjector {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl MockInjector {
    pub fn new(caps_lock: bool, num_lock: bool) -> Self {
        Self {
            state: Mutex::new(MockState {
                actions: Vec::new(),
                cursor: Position::default(),
                caps_lock,
                num_lock,
                fail_on_press: false,
            }),
        }
    }

    /// Makes every button press fail, for error-path tests.
    pub fn failing_on_press() -> Self {
        let injector = Self::default();
        injector.state.lock().unwrap().fail_on_press = true;
        injector
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn count(&self, wanted: &Action) -> usize {
        self.actions().iter().filter(|a| *a == wanted).count()
    }
}

impl InputInjector for MockInjector {
    fn cursor_position(&self) -> Result<Position> {
        Ok(self.state.lock().unwrap().cursor)
    }

    fn move_cursor(&self, position: Position) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.cursor = position;
        state.actions.push(Action::Move(position));
        Ok(())
    }

    fn press_button(&self, button: MouseButton) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_on_press {
            return Err(MacrotapeError::Injection("press refused".into()));
        }
        state.actions.push(Action::Press(button));
        Ok(())
    }

    fn release_button(&self, button: MouseButton) -> Result<()> {
        self.state.lock().unwrap().actions.push(Action::Release(button));
        Ok(())
    }

    fn scroll(&self, delta: i32) -> Result<()> {
        self.state.lock().unwrap().actions.push(Action::Scroll(delta));
        Ok(())
    }

    fn press_key(&self, key_code: i32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match key_code {
            keys::CAPS_LOCK => state.caps_lock = !state.caps_lock,
            keys::NUM_LOCK => state.num_lock = !state.num_lock,
            _ => {}
        }
        state.actions.push(Action::KeyDown(key_code));
        Ok(())
    }

    fn release_key(&self, key_code: i32) -> Result<()> {
        self.state.lock().unwrap().actions.push(Action::KeyUp(key_code));
        Ok(())
    }

    fn caps_lock_on(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().caps_lock)
    }

    fn num_lock_on(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().num_lock)
    }

    fn paste_text(&self, text: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .actions
            .push(Action::Paste(text.to_string()));
        Ok(())
    }
}

/// Locator that reports every target shifted by a fixed offset.
pub struct ShiftedLocator {
    pub dx: i32,
    pub dy: i32,
}

impl TargetLocator for ShiftedLocator {
    fn locate_target(&self, _screenshot: &RgbaImage, rect: Rect) -> Option<Rect> {
        Some(Rect::new(rect.x + self.dx, rect.y + self.dy, rect.width, rect.height))
    }
}
