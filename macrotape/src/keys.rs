//! Key codes and pure keyboard classification helpers.
//!
//! Key codes are plain `i32` values: printable ASCII for letters (upper case),
//! digits and punctuation, and values above [`BASE`] for everything else. The
//! [`KEYPAD`] bit marks numeric-keypad variants of a key. `-1` means "no key"
//! (used for unset modifier slots and key-string carrier events).

use crate::events::KeyboardEventData;

/// Sentinel for an unset key code or modifier slot.
pub const NONE: i32 = -1;

/// Bit set on key codes originating from the numeric keypad.
pub const KEYPAD: i32 = 0x2000_0000;

const BASE: i32 = 0x0100_0000;

pub const SPACE: i32 = b' ' as i32;
pub const APOSTROPHE: i32 = b'\'' as i32;
pub const COMMA: i32 = b',' as i32;
pub const MINUS: i32 = b'-' as i32;
pub const PERIOD: i32 = b'.' as i32;
pub const SLASH: i32 = b'/' as i32;
pub const SEMICOLON: i32 = b';' as i32;
pub const EQUAL: i32 = b'=' as i32;
pub const BRACKET_LEFT: i32 = b'[' as i32;
pub const BACKSLASH: i32 = b'\\' as i32;
pub const BRACKET_RIGHT: i32 = b']' as i32;
pub const GRAVE: i32 = b'`' as i32;
pub const ASTERISK: i32 = b'*' as i32;
pub const PLUS: i32 = b'+' as i32;

pub const ESCAPE: i32 = BASE;
pub const TAB: i32 = BASE | 0x01;
pub const BACKSPACE: i32 = BASE | 0x02;
pub const RETURN: i32 = BASE | 0x03;
pub const PRINT: i32 = BASE | 0x04;
pub const DELETE: i32 = BASE | 0x05;
pub const HOME: i32 = BASE | 0x06;
pub const END: i32 = BASE | 0x07;
pub const PAGE_UP: i32 = BASE | 0x08;
pub const PAGE_DOWN: i32 = BASE | 0x09;
pub const UP: i32 = BASE | 0x0a;
pub const DOWN: i32 = BASE | 0x0b;
pub const LEFT: i32 = BASE | 0x0c;
pub const RIGHT: i32 = BASE | 0x0d;
pub const INSERT: i32 = BASE | 0x0e;

pub const SHIFT: i32 = BASE | 0x20;
pub const CONTROL: i32 = BASE | 0x21;
pub const ALT: i32 = BASE | 0x22;
pub const CAPS_LOCK: i32 = BASE | 0x23;
pub const NUM_LOCK: i32 = BASE | 0x24;
pub const META: i32 = BASE | 0x25;

pub const F1: i32 = BASE | 0x30;
pub const F12: i32 = F1 + 11;
pub const F24: i32 = F1 + 23;

/// True for keys that are only recorded as modifiers on other events and are
/// never appended to the event log on their own.
pub fn is_modifier(key_code: i32) -> bool {
    matches!(key_code, SHIFT | CONTROL | ALT | CAPS_LOCK | NUM_LOCK | META)
}

/// True for navigation-cluster keys that require Num Lock to be off when they
/// are replayed through the numeric keypad.
pub fn needs_numpad_off(key_code: i32) -> bool {
    matches!(
        key_code,
        UP | DOWN | LEFT | RIGHT | DELETE | PAGE_UP | PAGE_DOWN | HOME | END
    )
}

/// Whether a keyboard event types a printable character into a text editor.
///
/// Alt/Ctrl chords are commands rather than text, Tab is excluded because it
/// usually traverses form fields, and keypad digits only count while Num Lock
/// is on.
pub fn is_char_key(event: &KeyboardEventData) -> bool {
    if event.mod1 == ALT || event.mod1 == CONTROL || event.mod2 == ALT || event.mod2 == CONTROL {
        return false;
    }

    match event.key_code {
        SPACE | BACKSPACE | COMMA | PERIOD | MINUS | EQUAL | SEMICOLON | SLASH | GRAVE
        | BRACKET_LEFT | BACKSLASH | BRACKET_RIGHT | APOSTROPHE => return true,
        code if code == KEYPAD | PLUS
            || code == KEYPAD | MINUS
            || code == KEYPAD | ASTERISK
            || code == KEYPAD | SLASH =>
        {
            return true
        }
        code if (b'0' as i32..=b'9' as i32).contains(&code) => return true,
        _ => {}
    }

    if event.num_lock {
        let unpadded = event.key_code & !KEYPAD;
        if event.key_code & KEYPAD != 0
            && (unpadded == PERIOD || (b'0' as i32..=b'9' as i32).contains(&unpadded))
        {
            return true;
        }
    }

    (b'A' as i32..=b'Z' as i32).contains(&event.key_code)
}

fn shifted_digit(digit: u8) -> &'static str {
    match digit {
        b'0' => ")",
        b'1' => "!",
        b'2' => "@",
        b'3' => "#",
        b'4' => "$",
        b'5' => "%",
        b'6' => "^",
        b'7' => "&",
        b'8' => "*",
        b'9' => "(",
        _ => "N/A",
    }
}

fn shifted_punct(code: i32) -> &'static str {
    match code {
        COMMA => "<",
        PERIOD => ">",
        MINUS => "_",
        EQUAL => "+",
        SEMICOLON => ":",
        SLASH => "?",
        GRAVE => "~",
        BRACKET_LEFT => "{",
        BACKSLASH => "|",
        BRACKET_RIGHT => "}",
        APOSTROPHE => "\"",
        _ => "N/A",
    }
}

/// Renders the human readable label for a key code, honoring the Shift, Caps
/// Lock and Num Lock state recorded with the event. Printable keys come back
/// as the character they type; everything else as a key name.
pub fn key_label(key_code: i32, mod1: i32, mod2: i32, caps_lock: bool, num_lock: bool) -> String {
    let shift = mod1 == SHIFT || mod2 == SHIFT;

    let label: String = match key_code {
        SPACE => " ".to_string(),
        TAB => "Tab".to_string(),
        BACKSPACE => "Backspace".to_string(),
        ESCAPE => "Escape".to_string(),
        RETURN => "Enter".to_string(),
        CAPS_LOCK => "Caps Lock".to_string(),
        NUM_LOCK => "Num Lock".to_string(),
        PRINT => "Print Screen".to_string(),
        DELETE => "Delete".to_string(),
        HOME => "Home".to_string(),
        END => "End".to_string(),
        PAGE_UP => "Page Up".to_string(),
        PAGE_DOWN => "Page Down".to_string(),
        INSERT => "Insert".to_string(),
        UP => "Up".to_string(),
        DOWN => "Down".to_string(),
        LEFT => "Left".to_string(),
        RIGHT => "Right".to_string(),
        SHIFT => "Shift".to_string(),
        ALT => "Alt".to_string(),
        CONTROL => "Ctrl".to_string(),
        META => "Meta".to_string(),
        code if code == KEYPAD | PLUS => "+".to_string(),
        code if code == KEYPAD | MINUS => "-".to_string(),
        code if code == KEYPAD | ASTERISK => "*".to_string(),
        code if code == KEYPAD | SLASH => "/".to_string(),
        code if code == KEYPAD | PERIOD => {
            if num_lock { ".".to_string() } else { "Delete".to_string() }
        }
        code if code & KEYPAD != 0 && (b'0' as i32..=b'9' as i32).contains(&(code & !KEYPAD)) => {
            let digit = (code & !KEYPAD) as u8;
            if num_lock {
                (digit as char).to_string()
            } else {
                // Keypad digits act as the navigation cluster with Num Lock off.
                match digit {
                    b'0' => "Insert".to_string(),
                    b'1' => "End".to_string(),
                    b'2' => "Down".to_string(),
                    b'3' => "Page Down".to_string(),
                    b'4' => "Left".to_string(),
                    b'5' => "N/A".to_string(),
                    b'6' => "Right".to_string(),
                    b'7' => "Home".to_string(),
                    b'8' => "Up".to_string(),
                    b'9' => "Page Up".to_string(),
                    _ => "N/A".to_string(),
                }
            }
        }
        code if (F1..=F24).contains(&code) => format!("F{}", code - F1 + 1),
        code if (b'0' as i32..=b'9' as i32).contains(&code) => {
            if shift {
                shifted_digit(code as u8).to_string()
            } else {
                (code as u8 as char).to_string()
            }
        }
        code if (b'A' as i32..=b'Z' as i32).contains(&code) => {
            let upper = code as u8 as char;
            if shift || caps_lock {
                upper.to_string()
            } else {
                upper.to_ascii_lowercase().to_string()
            }
        }
        COMMA | PERIOD | MINUS | EQUAL | SEMICOLON | SLASH | GRAVE | BRACKET_LEFT | BACKSLASH
        | BRACKET_RIGHT | APOSTROPHE => {
            if shift {
                shifted_punct(key_code).to_string()
            } else {
                (key_code as u8 as char).to_string()
            }
        }
        _ => "N/A".to_string(),
    };

    label
}
