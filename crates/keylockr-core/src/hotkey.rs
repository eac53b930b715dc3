//! Parsing for `Ctrl+Alt+K`-style hotkey strings.

use crate::key::{Key, KeyEvent, Modifiers};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_HOTKEY: &str = "Ctrl+Alt+K";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HotkeyParseError {
    #[error("hotkey is empty")]
    Empty,

    #[error("unrecognised key `{0}`")]
    UnknownToken(String),

    #[error("hotkey needs a trigger key besides modifiers")]
    MissingKey,

    #[error("hotkey lists more than one trigger key (`{0}` and `{1}`)")]
    DuplicateKey(String, String),
}

/// Modifier set plus a single trigger key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    pub key: Key,
}

impl Hotkey {
    pub fn parse(text: &str) -> Result<Self, HotkeyParseError> {
        let tokens: Vec<&str> = text
            .split('+')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();
        if tokens.is_empty() {
            return Err(HotkeyParseError::Empty);
        }

        let mut modifiers = Modifiers::NONE;
        let mut key: Option<Key> = None;

        for token in tokens {
            match token.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.ctrl = true,
                "alt" => modifiers.alt = true,
                "shift" => modifiers.shift = true,
                "win" | "windows" | "meta" | "super" => modifiers.meta = true,
                _ => {
                    let parsed = parse_key(token)
                        .ok_or_else(|| HotkeyParseError::UnknownToken(token.to_string()))?;
                    if let Some(existing) = key {
                        return Err(HotkeyParseError::DuplicateKey(
                            existing.to_string(),
                            parsed.to_string(),
                        ));
                    }
                    key = Some(parsed);
                }
            }
        }

        let key = key.ok_or(HotkeyParseError::MissingKey)?;
        Ok(Self { modifiers, key })
    }

    /// True when `event` is this hotkey's trigger key with at least the
    /// required modifiers held.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.key == self.key && event.modifiers.contains(self.modifiers)
    }
}

impl Default for Hotkey {
    fn default() -> Self {
        Self {
            modifiers: Modifiers::ctrl_alt(),
            key: Key::Letter('K'),
        }
    }
}

impl FromStr for Hotkey {
    type Err = HotkeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hotkey::parse(s)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (held, label) in [
            (m.ctrl, "Ctrl"),
            (m.alt, "Alt"),
            (m.shift, "Shift"),
            (m.meta, "Win"),
        ] {
            if held {
                write!(f, "{label}+")?;
            }
        }
        write!(f, "{}", self.key)
    }
}

fn parse_key(token: &str) -> Option<Key> {
    let lower = token.to_ascii_lowercase();
    let named = match lower.as_str() {
        "space" => Some(Key::Space),
        "enter" | "return" => Some(Key::Enter),
        "backspace" | "back" => Some(Key::Backspace),
        "delete" | "del" => Some(Key::Delete),
        "tab" => Some(Key::Tab),
        "escape" | "esc" => Some(Key::Escape),
        "left" => Some(Key::Left),
        "up" => Some(Key::Up),
        "right" => Some(Key::Right),
        "down" => Some(Key::Down),
        _ => None,
    };
    if named.is_some() {
        return named;
    }

    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return Key::letter(c);
        }
        if let Some(d) = c.to_digit(10) {
            return Some(Key::Digit(d as u8));
        }
        return None;
    }

    let index = lower.strip_prefix('f')?.parse::<u8>().ok()?;
    (1..=24).contains(&index).then_some(Key::Function(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EventKind;

    #[test]
    fn parses_default_hotkey() {
        let hotkey = Hotkey::parse(DEFAULT_HOTKEY).unwrap();
        assert_eq!(hotkey, Hotkey::default());
        assert_eq!(hotkey.to_string(), "Ctrl+Alt+K");
    }

    #[test]
    fn parsing_is_case_insensitive_and_tolerates_spaces() {
        let hotkey = Hotkey::parse(" control + SHIFT + f12 ").unwrap();
        assert!(hotkey.modifiers.ctrl && hotkey.modifiers.shift);
        assert!(!hotkey.modifiers.alt);
        assert_eq!(hotkey.key, Key::Function(12));
    }

    #[test]
    fn rejects_malformed_hotkeys() {
        assert_eq!(Hotkey::parse(" + "), Err(HotkeyParseError::Empty));
        assert_eq!(Hotkey::parse("Ctrl+Alt"), Err(HotkeyParseError::MissingKey));
        assert!(matches!(
            Hotkey::parse("Ctrl+Banana"),
            Err(HotkeyParseError::UnknownToken(_))
        ));
        assert!(matches!(
            Hotkey::parse("Ctrl+K+L"),
            Err(HotkeyParseError::DuplicateKey(_, _))
        ));
        assert!(Hotkey::parse("F25").is_err());
    }

    #[test]
    fn matches_requires_key_and_modifiers() {
        let hotkey = Hotkey::default();
        let bare = KeyEvent::new(EventKind::KeyDown, Key::Letter('K'), 0x25);
        assert!(!hotkey.matches(&bare));
        assert!(hotkey.matches(&bare.with_modifiers(Modifiers::ctrl_alt())));

        let other = KeyEvent::new(EventKind::KeyDown, Key::Letter('J'), 0x24)
            .with_modifiers(Modifiers::ctrl_alt());
        assert!(!hotkey.matches(&other));
    }
}
