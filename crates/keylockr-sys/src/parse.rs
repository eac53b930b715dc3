//! Helpers for turning sysfs attribute text into the identifiers the
//! classifier works with.

use std::collections::HashSet;

// Q W E R T Y
const QWERTY_CODES: &[u16] = &[16, 17, 18, 19, 20, 21];
// SPACE A Z
const A_Z_SPACE_CODES: &[u16] = &[57, 30, 44];

const WORD_BITS: u16 = libc::c_ulong::BITS as u16;

/// Linux `BUS_*` constants we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bus {
    Usb,
    Bluetooth,
    I8042,
    I2c,
    Host,
    Other(u16),
}

impl Bus {
    pub(crate) fn from_code(code: u16) -> Self {
        match code {
            0x03 => Bus::Usb,
            0x05 => Bus::Bluetooth,
            0x11 => Bus::I8042,
            0x18 => Bus::I2c,
            0x19 => Bus::Host,
            other => Bus::Other(other),
        }
    }

    pub(crate) fn code(&self) -> u16 {
        match self {
            Bus::Usb => 0x03,
            Bus::Bluetooth => 0x05,
            Bus::I8042 => 0x11,
            Bus::I2c => 0x18,
            Bus::Host => 0x19,
            Bus::Other(code) => *code,
        }
    }

    /// Buses a user can plug and unplug at runtime.
    pub(crate) fn is_hotpluggable(&self) -> bool {
        matches!(self, Bus::Usb | Bus::Bluetooth)
    }

    /// Buses wired to the mainboard.
    pub(crate) fn is_onboard(&self) -> bool {
        matches!(self, Bus::I8042 | Bus::I2c | Bus::Host)
    }

    fn label(&self) -> &'static str {
        match self {
            Bus::Usb => "USB",
            Bus::Bluetooth => "Bluetooth",
            Bus::I8042 => "PS/2",
            Bus::I2c => "I2C",
            Bus::Host => "platform",
            Bus::Other(_) => "input",
        }
    }
}

/// Decode a `capabilities/key` bitmap. The kernel prints one hex word per
/// `unsigned long`, most significant word first.
pub(crate) fn parse_key_bitmap(text: &str) -> Vec<u16> {
    let mut codes = Vec::new();
    for (index, word) in text.split_whitespace().rev().enumerate() {
        let Ok(bits) = u64::from_str_radix(word, 16) else {
            continue;
        };
        let Ok(index) = u16::try_from(index) else {
            break;
        };
        let base = index.saturating_mul(WORD_BITS);
        for bit in 0..u64::BITS as u16 {
            if bits & (1u64 << bit) != 0 {
                codes.push(base.saturating_add(bit));
            }
        }
    }
    codes.sort_unstable();
    codes
}

/// Full letter block plus space: anything less is a mouse, a power button or
/// a media remote.
pub(crate) fn is_keyboard(supported: &[u16]) -> bool {
    let keys: HashSet<u16> = supported.iter().copied().collect();
    QWERTY_CODES.iter().all(|code| keys.contains(code))
        && A_Z_SPACE_CODES.iter().all(|code| keys.contains(code))
}

pub(crate) fn parse_hex_u16(text: &str) -> Option<u16> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16).ok()
}

/// `PNP: PNP0303 PNP030b` (serio `firmware_id`) or a bare ACPI `hid` such as
/// `PNP0303` become `ACPI\PNP0303` style ids.
pub(crate) fn parse_firmware_ids(text: &str) -> Vec<String> {
    let body = text
        .trim()
        .split_once(':')
        .map_or(text.trim(), |(_, rest)| rest);
    let mut ids: Vec<String> = Vec::new();
    for token in body.split_whitespace() {
        let id = format!("ACPI\\{}", token.to_ascii_uppercase());
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Hardware ids for one input device, most specific first.
pub(crate) fn hardware_ids(
    bus: Bus,
    vendor: u16,
    product: u16,
    firmware_ids: &[String],
) -> Vec<String> {
    let mut ids = Vec::new();
    match bus {
        Bus::Usb | Bus::I2c => {
            ids.push(format!("HID\\VID_{vendor:04X}&PID_{product:04X}"));
            ids.push(format!("HID\\VID_{vendor:04X}"));
        }
        Bus::Bluetooth => {
            ids.push(format!("BTHENUM\\VID_{vendor:04X}&PID_{product:04X}"));
        }
        _ => {}
    }
    ids.extend(firmware_ids.iter().cloned());
    ids.push(format!(
        "INPUT\\BUS_{:04X}&VID_{vendor:04X}&PID_{product:04X}",
        bus.code()
    ));
    ids
}

/// Human readable location; on-board buses are reported as internal.
pub(crate) fn location(bus: Bus, phys: &str) -> Option<String> {
    let phys = phys.trim();
    match (bus.is_onboard(), phys.is_empty()) {
        (true, true) => Some(format!("internal {} bus", bus.label())),
        (true, false) => Some(format!("internal {} bus ({phys})", bus.label())),
        (false, true) => None,
        (false, false) => Some(format!("{} {phys}", bus.label())),
    }
}

/// Name shown to the user. i8042 keyboards report "AT Translated Set 2
/// keyboard", so the bus is appended to keep the PS/2 hint visible.
pub(crate) fn description(bus: Bus, name: &str) -> String {
    let name = name.trim();
    let name = if name.is_empty() { "Keyboard" } else { name };
    if bus == Bus::I8042 && !name.contains("PS/2") {
        format!("{name} (PS/2)")
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_words_are_little_endian_by_position() {
        // bit 57 (SPACE) in the lowest word, bit 0 of the next word is 64
        let codes = parse_key_bitmap("1 200000000000000");
        assert_eq!(codes, vec![57, WORD_BITS]);
    }

    #[test]
    fn garbage_words_are_skipped() {
        assert_eq!(parse_key_bitmap("zz 2"), vec![1]);
        assert!(parse_key_bitmap("").is_empty());
    }

    #[test]
    fn keyboard_needs_letters_and_space() {
        let mut codes = QWERTY_CODES.to_vec();
        codes.extend_from_slice(A_Z_SPACE_CODES);
        assert!(is_keyboard(&codes));
        codes.retain(|code| *code != 57);
        assert!(!is_keyboard(&codes));
        assert!(!is_keyboard(&[272, 273, 274]));
    }

    #[test]
    fn hex_ids_accept_optional_prefix() {
        assert_eq!(parse_hex_u16("046d\n"), Some(0x046d));
        assert_eq!(parse_hex_u16("0x0011"), Some(0x11));
        assert_eq!(parse_hex_u16("nope"), None);
    }

    #[test]
    fn firmware_ids_become_acpi_ids() {
        assert_eq!(
            parse_firmware_ids("PNP: PNP0303 PNP030b\n"),
            vec!["ACPI\\PNP0303".to_string(), "ACPI\\PNP030B".to_string()]
        );
        assert_eq!(parse_firmware_ids("PNP0303"), vec!["ACPI\\PNP0303".to_string()]);
        assert!(parse_firmware_ids("").is_empty());
    }

    #[test]
    fn usb_ids_carry_vendor_prefix() {
        let ids = hardware_ids(Bus::Usb, 0x17ef, 0x6047, &[]);
        assert_eq!(ids[0], "HID\\VID_17EF&PID_6047");
        assert_eq!(ids[1], "HID\\VID_17EF");
        assert_eq!(ids[2], "INPUT\\BUS_0003&VID_17EF&PID_6047");
    }

    #[test]
    fn i8042_prefers_firmware_ids() {
        let fw = parse_firmware_ids("PNP: PNP0303");
        let ids = hardware_ids(Bus::I8042, 0x0001, 0x0001, &fw);
        assert_eq!(ids[0], "ACPI\\PNP0303");
    }

    #[test]
    fn onboard_buses_read_as_internal() {
        assert_eq!(
            location(Bus::I8042, "isa0060/serio0/input0").as_deref(),
            Some("internal PS/2 bus (isa0060/serio0/input0)")
        );
        assert_eq!(location(Bus::Usb, "").as_deref(), None);
        assert_eq!(
            description(Bus::I8042, "AT Translated Set 2 keyboard"),
            "AT Translated Set 2 keyboard (PS/2)"
        );
        assert_eq!(description(Bus::Usb, "Logitech K120"), "Logitech K120");
    }
}
