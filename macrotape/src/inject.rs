//! Synthetic input injection.
//!
//! [`InputInjector`] is what the replay engine drives; [`RdevInjector`] backs
//! it with `rdev::simulate` plus `arboard` for clipboard pastes.

use std::sync::Mutex;

use rdev::{simulate, EventType, SimulateError};
use tracing::debug;

use crate::error::{MacrotapeError, Result};
use crate::events::Position;
use crate::keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Low-level input synthesis used during replay.
pub trait InputInjector: Send + Sync {
    fn cursor_position(&self) -> Result<Position>;
    fn move_cursor(&self, position: Position) -> Result<()>;
    fn press_button(&self, button: MouseButton) -> Result<()>;
    fn release_button(&self, button: MouseButton) -> Result<()>;
    /// Positive delta scrolls up.
    fn scroll(&self, delta: i32) -> Result<()>;
    fn press_key(&self, key_code: i32) -> Result<()>;
    fn release_key(&self, key_code: i32) -> Result<()>;
    fn caps_lock_on(&self) -> Result<bool>;
    fn num_lock_on(&self) -> Result<bool>;
    /// Types `text` by putting it on the clipboard and sending Ctrl+V.
    fn paste_text(&self, text: &str) -> Result<()>;
}

/// Maps a macrotape key code onto the key `rdev` can synthesize.
fn rdev_key(key_code: i32) -> Result<rdev::Key> {
    use rdev::Key;

    let key = match key_code {
        keys::ESCAPE => Key::Escape,
        keys::TAB => Key::Tab,
        keys::BACKSPACE => Key::Backspace,
        keys::RETURN => Key::Return,
        keys::PRINT => Key::PrintScreen,
        keys::DELETE => Key::Delete,
        keys::HOME => Key::Home,
        keys::END => Key::End,
        keys::PAGE_UP => Key::PageUp,
        keys::PAGE_DOWN => Key::PageDown,
        keys::UP => Key::UpArrow,
        keys::DOWN => Key::DownArrow,
        keys::LEFT => Key::LeftArrow,
        keys::RIGHT => Key::RightArrow,
        keys::INSERT => Key::Insert,
        keys::SHIFT => Key::ShiftLeft,
        keys::CONTROL => Key::ControlLeft,
        keys::ALT => Key::Alt,
        keys::CAPS_LOCK => Key::CapsLock,
        keys::NUM_LOCK => Key::NumLock,
        keys::META => Key::MetaLeft,
        keys::SPACE => Key::Space,
        keys::COMMA => Key::Comma,
        keys::PERIOD => Key::Dot,
        keys::MINUS => Key::Minus,
        keys::EQUAL => Key::Equal,
        keys::SEMICOLON => Key::SemiColon,
        keys::SLASH => Key::Slash,
        keys::GRAVE => Key::BackQuote,
        keys::BRACKET_LEFT => Key::LeftBracket,
        keys::BRACKET_RIGHT => Key::RightBracket,
        keys::BACKSLASH => Key::BackSlash,
        keys::APOSTROPHE => Key::Quote,
        code if code == keys::KEYPAD | keys::PLUS => Key::KpPlus,
        code if code == keys::KEYPAD | keys::MINUS => Key::KpMinus,
        code if code == keys::KEYPAD | keys::ASTERISK => Key::KpMultiply,
        code if code == keys::KEYPAD | keys::SLASH => Key::KpDivide,
        code if code & keys::KEYPAD != 0
            && (b'0' as i32..=b'9' as i32).contains(&(code & !keys::KEYPAD)) =>
        {
            match (code & !keys::KEYPAD) as u8 {
                b'0' => Key::Kp0,
                b'1' => Key::Kp1,
                b'2' => Key::Kp2,
                b'3' => Key::Kp3,
                b'4' => Key::Kp4,
                b'5' => Key::Kp5,
                b'6' => Key::Kp6,
                b'7' => Key::Kp7,
                b'8' => Key::Kp8,
                b'9' => Key::Kp9,
                _ => unreachable!(),
            }
        }
        code if code == keys::KEYPAD | keys::PERIOD => Key::KpDelete,
        code if (keys::F1..=keys::F12).contains(&code) => match code - keys::F1 {
            0 => Key::F1,
            1 => Key::F2,
            2 => Key::F3,
            3 => Key::F4,
            4 => Key::F5,
            5 => Key::F6,
            6 => Key::F7,
            7 => Key::F8,
            8 => Key::F9,
            9 => Key::F10,
            10 => Key::F11,
            _ => Key::F12,
        },
        code if (b'0' as i32..=b'9' as i32).contains(&code) => match code as u8 {
            b'0' => Key::Num0,
            b'1' => Key::Num1,
            b'2' => Key::Num2,
            b'3' => Key::Num3,
            b'4' => Key::Num4,
            b'5' => Key::Num5,
            b'6' => Key::Num6,
            b'7' => Key::Num7,
            b'8' => Key::Num8,
            b'9' => Key::Num9,
            _ => unreachable!(),
        },
        code if (b'A' as i32..=b'Z' as i32).contains(&code) => match code as u8 {
            b'A' => Key::KeyA,
            b'B' => Key::KeyB,
            b'C' => Key::KeyC,
            b'D' => Key::KeyD,
            b'E' => Key::KeyE,
            b'F' => Key::KeyF,
            b'G' => Key::KeyG,
            b'H' => Key::KeyH,
            b'I' => Key::KeyI,
            b'J' => Key::KeyJ,
            b'K' => Key::KeyK,
            b'L' => Key::KeyL,
            b'M' => Key::KeyM,
            b'N' => Key::KeyN,
            b'O' => Key::KeyO,
            b'P' => Key::KeyP,
            b'Q' => Key::KeyQ,
            b'R' => Key::KeyR,
            b'S' => Key::KeyS,
            b'T' => Key::KeyT,
            b'U' => Key::KeyU,
            b'V' => Key::KeyV,
            b'W' => Key::KeyW,
            b'X' => Key::KeyX,
            b'Y' => Key::KeyY,
            b'Z' => Key::KeyZ,
            _ => unreachable!(),
        },
        other => {
            return Err(MacrotapeError::InvalidEvent(format!(
                "no injectable key for code {other:#x}"
            )))
        }
    };
    Ok(key)
}

fn send(event_type: EventType) -> Result<()> {
    simulate(&event_type).map_err(|SimulateError| {
        MacrotapeError::Injection(format!("simulate failed for {event_type:?}"))
    })
}

struct InjectorState {
    cursor: Position,
    caps_lock: bool,
    num_lock: bool,
}

/// [`InputInjector`] backed by `rdev`.
///
/// `rdev` offers no state queries, so the injector tracks the cursor position
/// it last set and the lock states it has toggled. Callers seed the initial
/// lock states from the recording hook.
pub struct RdevInjector {
    state: Mutex<InjectorState>,
}

impl RdevInjector {
    pub fn new(caps_lock: bool, num_lock: bool) -> Self {
        Self {
            state: Mutex::new(InjectorState {
                cursor: Position::default(),
                caps_lock,
                num_lock,
            }),
        }
    }
}

impl Default for RdevInjector {
    fn default() -> Self {
        Self::new(false, true)
    }
}

impl InputInjector for RdevInjector {
    fn cursor_position(&self) -> Result<Position> {
        Ok(self.state.lock().unwrap().cursor)
    }

    fn move_cursor(&self, position: Position) -> Result<()> {
        send(EventType::MouseMove {
            x: position.x as f64,
            y: position.y as f64,
        })?;
        self.state.lock().unwrap().cursor = position;
        Ok(())
    }

    fn press_button(&self, button: MouseButton) -> Result<()> {
        send(EventType::ButtonPress(match button {
            MouseButton::Left => rdev::Button::Left,
            MouseButton::Right => rdev::Button::Right,
            MouseButton::Middle => rdev::Button::Middle,
        }))
    }

    fn release_button(&self, button: MouseButton) -> Result<()> {
        send(EventType::ButtonRelease(match button {
            MouseButton::Left => rdev::Button::Left,
            MouseButton::Right => rdev::Button::Right,
            MouseButton::Middle => rdev::Button::Middle,
        }))
    }

    fn scroll(&self, delta: i32) -> Result<()> {
        send(EventType::Wheel {
            delta_x: 0,
            delta_y: delta as i64,
        })
    }

    fn press_key(&self, key_code: i32) -> Result<()> {
        send(EventType::KeyPress(rdev_key(key_code)?))?;
        let mut state = self.state.lock().unwrap();
        match key_code {
            keys::CAPS_LOCK => state.caps_lock = !state.caps_lock,
            keys::NUM_LOCK => state.num_lock = !state.num_lock,
            _ => {}
        }
        Ok(())
    }

    fn release_key(&self, key_code: i32) -> Result<()> {
        send(EventType::KeyRelease(rdev_key(key_code)?))
    }

    fn caps_lock_on(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().caps_lock)
    }

    fn num_lock_on(&self) -> Result<bool> {
        Ok(self.state.lock().unwrap().num_lock)
    }

    fn paste_text(&self, text: &str) -> Result<()> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| MacrotapeError::Injection(format!("clipboard unavailable: {e}")))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|e| MacrotapeError::Injection(format!("clipboard write failed: {e}")))?;
        debug!(chars = text.len(), "pasting key string");
        send(EventType::KeyPress(rdev::Key::ControlLeft))?;
        send(EventType::KeyPress(rdev::Key::KeyV))?;
        send(EventType::KeyRelease(rdev::Key::KeyV))?;
        send(EventType::KeyRelease(rdev::Key::ControlLeft))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mapping_covers_the_code_space() {
        assert!(matches!(rdev_key(b'A' as i32), Ok(rdev::Key::KeyA)));
        assert!(matches!(rdev_key(b'9' as i32), Ok(rdev::Key::Num9)));
        assert!(matches!(
            rdev_key(keys::KEYPAD | b'5' as i32),
            Ok(rdev::Key::Kp5)
        ));
        assert!(matches!(rdev_key(keys::F12), Ok(rdev::Key::F12)));
        assert!(matches!(rdev_key(keys::RETURN), Ok(rdev::Key::Return)));
        assert!(rdev_key(keys::NONE).is_err());
    }
}
