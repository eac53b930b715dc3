//! Translation from Linux input key codes to the platform-neutral [`Key`].

use keylockr_core::key::{EventKind, Key, KeyEvent, Modifiers};

const LETTER_ROWS: &[(u16, &str)] = &[(16, "QWERTYUIOP"), (30, "ASDFGHJKL"), (44, "ZXCVBNM")];

const KEY_ESC: u16 = 1;
const KEY_BACKSPACE: u16 = 14;
const KEY_TAB: u16 = 15;
const KEY_ENTER: u16 = 28;
const KEY_LEFTCTRL: u16 = 29;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_RIGHTSHIFT: u16 = 54;
const KEY_LEFTALT: u16 = 56;
const KEY_SPACE: u16 = 57;
const KEY_F11: u16 = 87;
const KEY_F12: u16 = 88;
const KEY_KPENTER: u16 = 96;
const KEY_RIGHTCTRL: u16 = 97;
const KEY_RIGHTALT: u16 = 100;
const KEY_UP: u16 = 103;
const KEY_LEFT: u16 = 105;
const KEY_RIGHT: u16 = 106;
const KEY_DOWN: u16 = 108;
const KEY_DELETE: u16 = 111;
const KEY_LEFTMETA: u16 = 125;
const KEY_RIGHTMETA: u16 = 126;
const KEY_F13: u16 = 183;
const KEY_F24: u16 = 194;

pub(crate) fn key_from_code(code: u16) -> Key {
    for (start, row) in LETTER_ROWS {
        if let Some(offset) = code.checked_sub(*start) {
            if let Some(c) = row.chars().nth(usize::from(offset)) {
                return Key::Letter(c);
            }
        }
    }

    match code {
        // KEY_1 = 2 .. KEY_0 = 11
        2..=10 => Key::Digit((code - 1) as u8),
        11 => Key::Digit(0),
        // KEY_F1 = 59 .. KEY_F10 = 68
        59..=68 => Key::Function((code - 58) as u8),
        KEY_F11 => Key::Function(11),
        KEY_F12 => Key::Function(12),
        KEY_F13..=KEY_F24 => Key::Function((code - KEY_F13 + 13) as u8),
        KEY_ESC => Key::Escape,
        KEY_BACKSPACE => Key::Backspace,
        KEY_TAB => Key::Tab,
        KEY_ENTER | KEY_KPENTER => Key::Enter,
        KEY_SPACE => Key::Space,
        KEY_DELETE => Key::Delete,
        KEY_UP => Key::Up,
        KEY_LEFT => Key::Left,
        KEY_RIGHT => Key::Right,
        KEY_DOWN => Key::Down,
        KEY_LEFTCTRL | KEY_RIGHTCTRL => Key::Control,
        KEY_LEFTALT | KEY_RIGHTALT => Key::Alt,
        KEY_LEFTSHIFT | KEY_RIGHTSHIFT => Key::Shift,
        KEY_LEFTMETA | KEY_RIGHTMETA => Key::Meta,
        other => Key::Other(other),
    }
}

/// Tracks held modifiers across every grabbed keyboard and turns raw
/// `EV_KEY` values into [`KeyEvent`]s.
#[derive(Debug, Default)]
pub(crate) struct ModifierTracker {
    held: Modifiers,
}

impl ModifierTracker {
    /// `value` follows evdev: 0 release, 1 press, 2 autorepeat.
    pub(crate) fn translate(&mut self, code: u16, value: i32) -> KeyEvent {
        let key = key_from_code(code);
        let down = value != 0;

        // the event reports the modifiers held before it
        let modifiers = self.held;
        match key {
            Key::Control => self.held.ctrl = down,
            Key::Alt => self.held.alt = down,
            Key::Shift => self.held.shift = down,
            Key::Meta => self.held.meta = down,
            _ => {}
        }

        let system = modifiers.alt || key == Key::Alt;
        let kind = match (down, system) {
            (true, false) => EventKind::KeyDown,
            (false, false) => EventKind::KeyUp,
            (true, true) => EventKind::SystemKeyDown,
            (false, true) => EventKind::SystemKeyUp,
        };

        KeyEvent::new(kind, key, u32::from(code)).with_modifiers(modifiers)
    }
}
