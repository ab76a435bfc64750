//! The recorded event model.
//!
//! A macro is an ordered list of [`MacroEvent`]s. Each event carries the shared
//! scheduling fields (index, delay, duration, repeat count) plus exactly one
//! payload: mouse, keyboard, or a dummy placeholder used only inside edit
//! sessions.

use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::keys;

/// A screen position in absolute pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned screen rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Kind of a recorded mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseEventType {
    Move,
    LeftPress,
    LeftRelease,
    LeftClick,
    DoubleClick,
    RightPress,
    RightRelease,
    RightClick,
    MiddlePress,
    MiddleRelease,
    MiddleClick,
    ScrollUp,
    ScrollDown,
}

impl MouseEventType {
    /// Press events that anchor a target screenshot.
    pub fn is_press(&self) -> bool {
        matches!(
            self,
            MouseEventType::LeftPress | MouseEventType::RightPress | MouseEventType::MiddlePress
        )
    }

    /// Whether this event kind occurs at a meaningful screen location
    /// (scrolls and moves do not anchor a click point).
    pub fn is_location_sensitive(&self) -> bool {
        !matches!(
            self,
            MouseEventType::Move | MouseEventType::ScrollUp | MouseEventType::ScrollDown
        )
    }

    /// The release that completes a press of the same button, if any.
    pub fn matching_release(&self) -> Option<MouseEventType> {
        match self {
            MouseEventType::LeftPress | MouseEventType::LeftClick | MouseEventType::DoubleClick => {
                Some(MouseEventType::LeftRelease)
            }
            MouseEventType::RightPress | MouseEventType::RightClick => {
                Some(MouseEventType::RightRelease)
            }
            MouseEventType::MiddlePress | MouseEventType::MiddleClick => {
                Some(MouseEventType::MiddleRelease)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MouseEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MouseEventType::Move => "Move",
            MouseEventType::LeftPress => "Left Press",
            MouseEventType::LeftRelease => "Left Release",
            MouseEventType::LeftClick => "Left Click",
            MouseEventType::DoubleClick => "Double Click",
            MouseEventType::RightPress => "Right Press",
            MouseEventType::RightRelease => "Right Release",
            MouseEventType::RightClick => "Right Click",
            MouseEventType::MiddlePress => "Middle Press",
            MouseEventType::MiddleRelease => "Middle Release",
            MouseEventType::MiddleClick => "Middle Click",
            MouseEventType::ScrollUp => "Scroll Up",
            MouseEventType::ScrollDown => "Scroll Down",
        };
        write!(f, "{name}")
    }
}

/// Kind of a recorded keyboard event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyboardEventType {
    KeyPress,
    KeyRelease,
    /// A press immediately followed by its release, fused during recording.
    KeyType,
    /// A carrier event holding a typed string in `key_string`.
    KeyString,
}

impl fmt::Display for KeyboardEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyboardEventType::KeyPress => "Key Press",
            KeyboardEventType::KeyRelease => "Key Release",
            KeyboardEventType::KeyType => "Key Type",
            KeyboardEventType::KeyString => "Key String",
        };
        write!(f, "{name}")
    }
}

/// How a click target was isolated from the screenshot taken at press time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetImageType {
    /// No target isolated; the raw capture rect is kept.
    #[default]
    None,
    /// A widget-sized rectangle centered on the click point.
    Widget,
    /// A text caret context, wider than tall.
    Text,
}

/// Cursor shape observed at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CursorType {
    #[default]
    Arrow,
    IBeam,
    Hand,
    Other,
}

/// Payload of a recorded mouse event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseEventData {
    pub event_type: MouseEventType,
    /// Absolute cursor position at the time of the event.
    pub location: Position,
    /// Wheel delta for scroll events, 0 otherwise.
    pub wheel_delta: i32,
    /// Id of the stored screenshot taken at press time, -1 when none.
    pub screenshot_id: i64,
    /// In-memory screenshot; only its id and rect are persisted.
    #[serde(skip)]
    pub screenshot_image: Option<RgbaImage>,
    /// Portion of the screenshot that contains the click target.
    pub screenshot_rect: Rect,
    /// How the target rect was isolated from the screenshot.
    pub target_image_type: TargetImageType,
    /// Cursor shape at capture time, used to pick the isolation strategy.
    pub cursor_type: CursorType,
    /// Whether the click point is corrected at replay time by relocating
    /// the target image on screen.
    pub auto_correct: bool,
}

impl Default for MouseEventData {
    fn default() -> Self {
        Self {
            event_type: MouseEventType::Move,
            location: Position::default(),
            wheel_delta: 0,
            screenshot_id: -1,
            screenshot_image: None,
            screenshot_rect: Rect::default(),
            target_image_type: TargetImageType::None,
            cursor_type: CursorType::Arrow,
            auto_correct: false,
        }
    }
}

impl MouseEventData {
    pub fn new(event_type: MouseEventType, location: Position) -> Self {
        Self {
            event_type,
            location,
            ..Self::default()
        }
    }
}

/// Payload of a recorded keyboard event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardEventData {
    pub event_type: KeyboardEventType,
    /// Key code, [`keys::NONE`] for key-string carriers.
    pub key_code: i32,
    /// First held modifier, [`keys::NONE`] when absent.
    pub mod1: i32,
    /// Second held modifier, [`keys::NONE`] when absent.
    pub mod2: i32,
    /// Caps Lock state at the time of the event.
    pub caps_lock: bool,
    /// Num Lock state at the time of the event.
    pub num_lock: bool,
    /// Typed text for KeyString events, empty otherwise.
    pub key_string: String,
}

impl Default for KeyboardEventData {
    fn default() -> Self {
        Self {
            event_type: KeyboardEventType::KeyPress,
            key_code: keys::NONE,
            mod1: keys::NONE,
            mod2: keys::NONE,
            caps_lock: false,
            num_lock: false,
            key_string: String::new(),
        }
    }
}

impl KeyboardEventData {
    pub fn new(event_type: KeyboardEventType, key_code: i32) -> Self {
        Self {
            event_type,
            key_code,
            ..Self::default()
        }
    }

    /// Human readable label for the key this event carries.
    pub fn key_label(&self) -> String {
        keys::key_label(
            self.key_code,
            self.mod1,
            self.mod2,
            self.caps_lock,
            self.num_lock,
        )
    }
}

/// The mutually exclusive event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Mouse(MouseEventData),
    Keyboard(KeyboardEventData),
    /// Placeholder filling index gaps in multi-macro edit sessions.
    /// Never persisted.
    Dummy,
}

/// A single recorded input event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroEvent {
    /// Position within its macro, contiguous from 0. `-1` means unassigned.
    pub index: i32,
    /// Milliseconds to wait after the previous event finished. `-1` when the
    /// value differs across macros in a uniform view.
    pub delay_ms: i64,
    /// Milliseconds the event itself takes (hold time, or the span covered by
    /// coalesced repeats). `-1` in uniform views, as above.
    pub duration_ms: i64,
    /// Extra repetitions folded into this event; 0 means it fires once.
    pub n_repeats: u32,
    /// Wall-clock capture time in milliseconds, used only while recording.
    pub timestamp_ms: i64,
    /// Name of the process that owned the foreground window at capture time.
    pub target_process: String,
    pub payload: EventPayload,
}

impl MacroEvent {
    pub fn mouse(data: MouseEventData) -> Self {
        Self {
            index: -1,
            delay_ms: 0,
            duration_ms: 0,
            n_repeats: 0,
            timestamp_ms: 0,
            target_process: String::new(),
            payload: EventPayload::Mouse(data),
        }
    }

    pub fn keyboard(data: KeyboardEventData) -> Self {
        Self {
            index: -1,
            delay_ms: 0,
            duration_ms: 0,
            n_repeats: 0,
            timestamp_ms: 0,
            target_process: String::new(),
            payload: EventPayload::Keyboard(data),
        }
    }

    pub fn dummy(index: i32) -> Self {
        Self {
            index,
            delay_ms: 0,
            duration_ms: 0,
            n_repeats: 0,
            timestamp_ms: 0,
            target_process: String::new(),
            payload: EventPayload::Dummy,
        }
    }

    pub fn is_dummy(&self) -> bool {
        matches!(self.payload, EventPayload::Dummy)
    }

    pub fn as_mouse(&self) -> Option<&MouseEventData> {
        match &self.payload {
            EventPayload::Mouse(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_keyboard(&self) -> Option<&KeyboardEventData> {
        match &self.payload {
            EventPayload::Keyboard(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_mouse_mut(&mut self) -> Option<&mut MouseEventData> {
        match &mut self.payload {
            EventPayload::Mouse(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_keyboard_mut(&mut self) -> Option<&mut KeyboardEventData> {
        match &mut self.payload {
            EventPayload::Keyboard(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for MacroEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::Mouse(data) => {
                write!(f, "#{} {} at {}", self.index, data.event_type, data.location)?;
                if self.n_repeats > 0 {
                    write!(f, " x{}", self.n_repeats + 1)?;
                }
            }
            EventPayload::Keyboard(data) => {
                if data.event_type == KeyboardEventType::KeyString {
                    write!(f, "#{} Key String {:?}", self.index, data.key_string)?;
                } else {
                    write!(f, "#{} {} '{}'", self.index, data.event_type, data.key_label())?;
                    if self.n_repeats > 0 {
                        write!(f, " x{}", self.n_repeats + 1)?;
                    }
                }
            }
            EventPayload::Dummy => write!(f, "#{} (placeholder)", self.index)?,
        }
        write!(f, " delay {}ms duration {}ms", self.delay_ms, self.duration_ms)
    }
}

/// Collects the indexes of a slice of events, in order.
pub fn event_indexes(events: &[MacroEvent]) -> Vec<i32> {
    events.iter().map(|event| event.index).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_release_covers_clicks_and_presses() {
        assert_eq!(
            MouseEventType::LeftPress.matching_release(),
            Some(MouseEventType::LeftRelease)
        );
        assert_eq!(
            MouseEventType::DoubleClick.matching_release(),
            Some(MouseEventType::LeftRelease)
        );
        assert_eq!(
            MouseEventType::MiddleClick.matching_release(),
            Some(MouseEventType::MiddleRelease)
        );
        assert_eq!(MouseEventType::ScrollUp.matching_release(), None);
        assert_eq!(MouseEventType::Move.matching_release(), None);
    }

    #[test]
    fn location_sensitivity() {
        assert!(MouseEventType::LeftClick.is_location_sensitive());
        assert!(MouseEventType::RightPress.is_location_sensitive());
        assert!(!MouseEventType::ScrollDown.is_location_sensitive());
        assert!(!MouseEventType::Move.is_location_sensitive());
    }

    #[test]
    fn events_round_trip_through_json_without_images() {
        let mut data = MouseEventData::new(
            MouseEventType::LeftClick,
            Position::new(100, 200),
        );
        data.screenshot_id = 7;
        data.screenshot_image = Some(RgbaImage::new(4, 4));
        data.screenshot_rect = Rect::new(80, 180, 40, 40);
        let event = MacroEvent::mouse(data);

        let json = serde_json::to_string(&event).unwrap();
        let back: MacroEvent = serde_json::from_str(&json).unwrap();
        let mouse = back.as_mouse().unwrap();
        assert_eq!(mouse.screenshot_id, 7);
        assert_eq!(mouse.screenshot_rect, Rect::new(80, 180, 40, 40));
        assert!(mouse.screenshot_image.is_none());
    }

    #[test]
    fn display_is_readable() {
        let mut event = MacroEvent::keyboard(KeyboardEventData::new(
            KeyboardEventType::KeyType,
            b'A' as i32,
        ));
        event.index = 3;
        event.delay_ms = 250;
        let text = event.to_string();
        assert!(text.contains("#3"));
        assert!(text.contains("Key Type"));
        assert!(text.contains("250ms"));
    }
}
