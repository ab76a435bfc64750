//! Global input capture.
//!
//! [`InputHook`] is the recording-side seam: an owned, explicitly activated
//! hook that delivers already-shaped [`MacroEvent`]s to a registered sink.
//! [`RdevHook`] adapts `rdev::listen` to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info};

use crate::error::Result;
use crate::events::{
    KeyboardEventData, KeyboardEventType, MacroEvent, MouseEventData, MouseEventType, Position,
};
use crate::keys;

/// Receives captured events on the hook's thread. Implementations must hand
/// the event off quickly (the log buffer queues it).
pub trait EventSink: Send + Sync {
    fn handle_event(&self, event: MacroEvent);
}

/// A global input hook with explicit lifecycle.
pub trait InputHook: Send + Sync {
    /// Registers the sink that receives captured events.
    fn set_sink(&self, sink: Arc<dyn EventSink>);

    /// Starts delivering events to the sink.
    fn activate(&self) -> Result<()>;

    /// Stops delivery. The underlying OS hook may stay installed; events
    /// captured while deactivated are dropped.
    fn deactivate(&self);

    fn is_active(&self) -> bool;
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn key_code_from_rdev(key: rdev::Key) -> i32 {
    use rdev::Key;

    match key {
        Key::Escape => keys::ESCAPE,
        Key::Tab => keys::TAB,
        Key::Backspace => keys::BACKSPACE,
        Key::Return => keys::RETURN,
        Key::KpReturn => keys::RETURN,
        Key::PrintScreen => keys::PRINT,
        Key::Delete => keys::DELETE,
        Key::Home => keys::HOME,
        Key::End => keys::END,
        Key::PageUp => keys::PAGE_UP,
        Key::PageDown => keys::PAGE_DOWN,
        Key::UpArrow => keys::UP,
        Key::DownArrow => keys::DOWN,
        Key::LeftArrow => keys::LEFT,
        Key::RightArrow => keys::RIGHT,
        Key::Insert => keys::INSERT,
        Key::ShiftLeft | Key::ShiftRight => keys::SHIFT,
        Key::ControlLeft | Key::ControlRight => keys::CONTROL,
        Key::Alt | Key::AltGr => keys::ALT,
        Key::CapsLock => keys::CAPS_LOCK,
        Key::NumLock => keys::NUM_LOCK,
        Key::MetaLeft | Key::MetaRight => keys::META,
        Key::Space => keys::SPACE,
        Key::Comma => keys::COMMA,
        Key::Dot => keys::PERIOD,
        Key::Minus => keys::MINUS,
        Key::Equal => keys::EQUAL,
        Key::SemiColon => keys::SEMICOLON,
        Key::Slash => keys::SLASH,
        Key::BackQuote => keys::GRAVE,
        Key::LeftBracket => keys::BRACKET_LEFT,
        Key::RightBracket => keys::BRACKET_RIGHT,
        Key::BackSlash | Key::IntlBackslash => keys::BACKSLASH,
        Key::Quote => keys::APOSTROPHE,
        Key::KpPlus => keys::KEYPAD | keys::PLUS,
        Key::KpMinus => keys::KEYPAD | keys::MINUS,
        Key::KpMultiply => keys::KEYPAD | keys::ASTERISK,
        Key::KpDivide => keys::KEYPAD | keys::SLASH,
        Key::KpDelete => keys::KEYPAD | keys::PERIOD,
        Key::Kp0 => keys::KEYPAD | b'0' as i32,
        Key::Kp1 => keys::KEYPAD | b'1' as i32,
        Key::Kp2 => keys::KEYPAD | b'2' as i32,
        Key::Kp3 => keys::KEYPAD | b'3' as i32,
        Key::Kp4 => keys::KEYPAD | b'4' as i32,
        Key::Kp5 => keys::KEYPAD | b'5' as i32,
        Key::Kp6 => keys::KEYPAD | b'6' as i32,
        Key::Kp7 => keys::KEYPAD | b'7' as i32,
        Key::Kp8 => keys::KEYPAD | b'8' as i32,
        Key::Kp9 => keys::KEYPAD | b'9' as i32,
        Key::F1 => keys::F1,
        Key::F2 => keys::F1 + 1,
        Key::F3 => keys::F1 + 2,
        Key::F4 => keys::F1 + 3,
        Key::F5 => keys::F1 + 4,
        Key::F6 => keys::F1 + 5,
        Key::F7 => keys::F1 + 6,
        Key::F8 => keys::F1 + 7,
        Key::F9 => keys::F1 + 8,
        Key::F10 => keys::F1 + 9,
        Key::F11 => keys::F1 + 10,
        Key::F12 => keys::F12,
        Key::Num0 => b'0' as i32,
        Key::Num1 => b'1' as i32,
        Key::Num2 => b'2' as i32,
        Key::Num3 => b'3' as i32,
        Key::Num4 => b'4' as i32,
        Key::Num5 => b'5' as i32,
        Key::Num6 => b'6' as i32,
        Key::Num7 => b'7' as i32,
        Key::Num8 => b'8' as i32,
        Key::Num9 => b'9' as i32,
        Key::KeyA => b'A' as i32,
        Key::KeyB => b'B' as i32,
        Key::KeyC => b'C' as i32,
        Key::KeyD => b'D' as i32,
        Key::KeyE => b'E' as i32,
        Key::KeyF => b'F' as i32,
        Key::KeyG => b'G' as i32,
        Key::KeyH => b'H' as i32,
        Key::KeyI => b'I' as i32,
        Key::KeyJ => b'J' as i32,
        Key::KeyK => b'K' as i32,
        Key::KeyL => b'L' as i32,
        Key::KeyM => b'M' as i32,
        Key::KeyN => b'N' as i32,
        Key::KeyO => b'O' as i32,
        Key::KeyP => b'P' as i32,
        Key::KeyQ => b'Q' as i32,
        Key::KeyR => b'R' as i32,
        Key::KeyS => b'S' as i32,
        Key::KeyT => b'T' as i32,
        Key::KeyU => b'U' as i32,
        Key::KeyV => b'V' as i32,
        Key::KeyW => b'W' as i32,
        Key::KeyX => b'X' as i32,
        Key::KeyY => b'Y' as i32,
        Key::KeyZ => b'Z' as i32,
        _ => keys::NONE,
    }
}

/// Keyboard state the hook maintains between events so each captured event
/// carries the modifiers and lock flags that were in force.
#[derive(Default)]
struct KeyState {
    shift: bool,
    control: bool,
    alt: bool,
    meta: bool,
    caps_lock: bool,
    num_lock: bool,
    cursor: Position,
}

impl KeyState {
    fn set_held(&mut self, key_code: i32, held: bool) {
        match key_code {
            keys::SHIFT => self.shift = held,
            keys::CONTROL => self.control = held,
            keys::ALT => self.alt = held,
            keys::META => self.meta = held,
            _ => {}
        }
    }

    fn toggle_locks(&mut self, key_code: i32) {
        match key_code {
            keys::CAPS_LOCK => self.caps_lock = !self.caps_lock,
            keys::NUM_LOCK => self.num_lock = !self.num_lock,
            _ => {}
        }
    }

    /// The up-to-two held modifiers, Shift and Ctrl taking the named slots
    /// first.
    fn mods(&self) -> (i32, i32) {
        let mut held = [keys::NONE, keys::NONE];
        let mut slot = 0;
        for (active, code) in [
            (self.shift, keys::SHIFT),
            (self.control, keys::CONTROL),
            (self.alt, keys::ALT),
            (self.meta, keys::META),
        ] {
            if active && slot < held.len() {
                held[slot] = code;
                slot += 1;
            }
        }
        (held[0], held[1])
    }
}

fn keyboard_event(state: &KeyState, event_type: KeyboardEventType, key_code: i32) -> MacroEvent {
    let (mod1, mod2) = state.mods();
    let mut event = MacroEvent::keyboard(KeyboardEventData {
        event_type,
        key_code,
        mod1,
        mod2,
        caps_lock: state.caps_lock,
        num_lock: state.num_lock,
        key_string: String::new(),
    });
    event.timestamp_ms = now_ms();
    event
}

fn mouse_event(state: &KeyState, event_type: MouseEventType, wheel_delta: i32) -> MacroEvent {
    let mut data = MouseEventData::new(event_type, state.cursor);
    data.wheel_delta = wheel_delta;
    let mut event = MacroEvent::mouse(data);
    event.timestamp_ms = now_ms();
    event
}

/// [`InputHook`] over `rdev::listen`.
///
/// `rdev` cannot uninstall its listener, so the listener thread is started
/// once on the first activation and lives for the process; `deactivate` only
/// stops delivery. Lock states start from the constructor arguments since
/// `rdev` cannot query them.
pub struct RdevHook {
    sink: Arc<Mutex<Option<Arc<dyn EventSink>>>>,
    active: Arc<AtomicBool>,
    listener_started: Mutex<bool>,
    initial_caps_lock: bool,
    initial_num_lock: bool,
}

impl RdevHook {
    pub fn new(caps_lock: bool, num_lock: bool) -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
            active: Arc::new(AtomicBool::new(false)),
            listener_started: Mutex::new(false),
            initial_caps_lock: caps_lock,
            initial_num_lock: num_lock,
        }
    }

    fn ensure_listener(&self) {
        let mut started = self.listener_started.lock().unwrap();
        if *started {
            return;
        }
        *started = true;

        let sink = Arc::clone(&self.sink);
        let active = Arc::clone(&self.active);
        let mut state = KeyState {
            caps_lock: self.initial_caps_lock,
            num_lock: self.initial_num_lock,
            ..KeyState::default()
        };

        thread::Builder::new()
            .name("macrotape-hook".into())
            .spawn(move || {
                let callback = move |raw: rdev::Event| {
                    let event = match raw.event_type {
                        rdev::EventType::KeyPress(key) => {
                            let code = key_code_from_rdev(key);
                            state.toggle_locks(code);
                            let event =
                                keyboard_event(&state, KeyboardEventType::KeyPress, code);
                            state.set_held(code, true);
                            event
                        }
                        rdev::EventType::KeyRelease(key) => {
                            let code = key_code_from_rdev(key);
                            state.set_held(code, false);
                            keyboard_event(&state, KeyboardEventType::KeyRelease, code)
                        }
                        rdev::EventType::ButtonPress(button) => {
                            let kind = match button {
                                rdev::Button::Left => MouseEventType::LeftPress,
                                rdev::Button::Right => MouseEventType::RightPress,
                                rdev::Button::Middle => MouseEventType::MiddlePress,
                                rdev::Button::Unknown(_) => return,
                            };
                            mouse_event(&state, kind, 0)
                        }
                        rdev::EventType::ButtonRelease(button) => {
                            let kind = match button {
                                rdev::Button::Left => MouseEventType::LeftRelease,
                                rdev::Button::Right => MouseEventType::RightRelease,
                                rdev::Button::Middle => MouseEventType::MiddleRelease,
                                rdev::Button::Unknown(_) => return,
                            };
                            mouse_event(&state, kind, 0)
                        }
                        rdev::EventType::MouseMove { x, y } => {
                            state.cursor = Position::new(x as i32, y as i32);
                            mouse_event(&state, MouseEventType::Move, 0)
                        }
                        rdev::EventType::Wheel { delta_y, .. } => {
                            let kind = if delta_y >= 0 {
                                MouseEventType::ScrollUp
                            } else {
                                MouseEventType::ScrollDown
                            };
                            mouse_event(&state, kind, delta_y as i32)
                        }
                    };

                    if !active.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(sink) = sink.lock().unwrap().as_ref() {
                        sink.handle_event(event);
                    }
                };
                if let Err(e) = rdev::listen(callback) {
                    error!(?e, "input listener terminated");
                }
            })
            .expect("failed to spawn hook thread");
    }
}

impl InputHook for RdevHook {
    fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn activate(&self) -> Result<()> {
        self.ensure_listener();
        self.active.store(true, Ordering::SeqCst);
        info!("input hook activated");
        Ok(())
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("input hook deactivated");
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
