//! Platform-neutral view of a low-level keyboard event.

use std::fmt;

/// Logical key identity, reduced to what the blocking policy needs to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// `A`..`Z`, always stored upper-case.
    Letter(char),
    /// `0`..`9` on the main row.
    Digit(u8),
    /// `F1`..`F24`.
    Function(u8),
    Space,
    Backspace,
    Enter,
    Tab,
    Escape,
    Delete,
    Left,
    Up,
    Right,
    Down,
    Control,
    Alt,
    Shift,
    Meta,
    /// Anything else, carrying the raw platform key code.
    Other(u16),
}

impl Key {
    pub fn letter(c: char) -> Option<Self> {
        c.is_ascii_alphabetic()
            .then(|| Key::Letter(c.to_ascii_uppercase()))
    }

    pub fn is_alphanumeric(&self) -> bool {
        matches!(self, Key::Letter(_) | Key::Digit(_))
    }

    pub fn is_arrow(&self) -> bool {
        matches!(self, Key::Left | Key::Up | Key::Right | Key::Down)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Letter(c) => write!(f, "{c}"),
            Key::Digit(d) => write!(f, "{d}"),
            Key::Function(n) => write!(f, "F{n}"),
            Key::Space => f.write_str("Space"),
            Key::Backspace => f.write_str("Backspace"),
            Key::Enter => f.write_str("Enter"),
            Key::Tab => f.write_str("Tab"),
            Key::Escape => f.write_str("Escape"),
            Key::Delete => f.write_str("Delete"),
            Key::Left => f.write_str("Left"),
            Key::Up => f.write_str("Up"),
            Key::Right => f.write_str("Right"),
            Key::Down => f.write_str("Down"),
            Key::Control => f.write_str("Ctrl"),
            Key::Alt => f.write_str("Alt"),
            Key::Shift => f.write_str("Shift"),
            Key::Meta => f.write_str("Win"),
            Key::Other(code) => write!(f, "0x{code:02x}"),
        }
    }
}

/// Modifier keys held down when an event was generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    pub fn ctrl_alt() -> Self {
        Self {
            ctrl: true,
            alt: true,
            ..Self::NONE
        }
    }

    /// True when every modifier set in `required` is also set here.
    pub fn contains(&self, required: Modifiers) -> bool {
        (!required.ctrl || self.ctrl)
            && (!required.alt || self.alt)
            && (!required.shift || self.shift)
            && (!required.meta || self.meta)
    }
}

/// Kind of low-level event delivered to the input filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    /// Key-down while an Alt-like modifier is held.
    SystemKeyDown,
    SystemKeyUp,
    Other,
}

impl EventKind {
    pub fn is_key(&self) -> bool {
        !matches!(self, EventKind::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub kind: EventKind,
    pub key: Key,
    pub scan_code: u32,
    /// Synthesised by software rather than a physical device.
    pub injected: bool,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    pub fn new(kind: EventKind, key: Key, scan_code: u32) -> Self {
        Self {
            kind,
            key,
            scan_code,
            injected: false,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn injected(mut self) -> Self {
        self.injected = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_are_normalised_to_upper_case() {
        assert_eq!(Key::letter('k'), Some(Key::Letter('K')));
        assert_eq!(Key::letter('1'), None);
    }

    #[test]
    fn modifiers_contain_subsets_only() {
        let held = Modifiers {
            shift: true,
            ..Modifiers::ctrl_alt()
        };
        assert!(held.contains(Modifiers::ctrl_alt()));
        assert!(held.contains(Modifiers::NONE));
        assert!(!Modifiers::ctrl_alt().contains(held));
    }
}
