//! Heuristics that decide which enumerated keyboard is the built-in one.
//!
//! Every decision is derived from one [`Signals`] evaluation per device:
//!
//! * strong signals: learned id, hardware-id prefix, "internal" location,
//!   non-removable;
//! * weak signals: "PS/2" description, ACPI identifier, "Keyboard"
//!   description, currently disabled.
//!
//! A device *is internal* when any strong signal fires. It is a *candidate*
//! (something lock/unlock may touch) when it is internal or described as
//! PS/2. The external-keyboard safety check only counts devices that are not
//! candidates, so a device we might disable never passes as the escape
//! keyboard.

use crate::config::KeylockrConfig;
use crate::device::KeyboardDevice;
use std::cmp::Reverse;

/// Identifier prefix of devices enumerated on the platform ACPI bus.
pub const ACPI_ID_PREFIX: &str = "ACPI\\";

const PREFER_DISABLED_WEIGHT: i64 = 1_000_000;
const KNOWN_ID_WEIGHT: i64 = 500_000;
const HARDWARE_PREFIX_WEIGHT: i64 = 250_000;
const INTERNAL_LOCATION_WEIGHT: i64 = 50_000;
const PS2_WEIGHT: i64 = 25_000;
const NON_REMOVABLE_WEIGHT: i64 = 10_000;
const ACPI_ID_WEIGHT: i64 = 5_000;
const KEYBOARD_DESCRIPTION_WEIGHT: i64 = 1_000;
const DISABLED_WEIGHT: i64 = 100;

/// Per-device evidence that it is the built-in keyboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Signals {
    pub known_id: bool,
    pub hardware_prefix: bool,
    pub internal_location: bool,
    pub ps2_description: bool,
    pub non_removable: bool,
    pub acpi_id: bool,
    pub keyboard_description: bool,
    pub disabled: bool,
}

impl Signals {
    pub fn evaluate(device: &KeyboardDevice, config: &KeylockrConfig) -> Self {
        Self {
            known_id: config.is_known_internal(&device.id),
            hardware_prefix: config.matches_internal_prefix(&device.hardware_ids),
            internal_location: device
                .location
                .as_deref()
                .is_some_and(|location| contains_ignore_case(location, "internal")),
            ps2_description: contains_ignore_case(&device.description, "PS/2"),
            non_removable: !device.removable,
            acpi_id: device
                .id
                .get(..ACPI_ID_PREFIX.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(ACPI_ID_PREFIX)),
            keyboard_description: contains_ignore_case(&device.description, "keyboard"),
            disabled: !device.enabled,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.known_id || self.hardware_prefix || self.internal_location || self.non_removable
    }

    pub fn is_candidate(&self) -> bool {
        self.is_internal() || self.ps2_description
    }

    /// Additive score; each signal outweighs the sum of every weaker one.
    pub fn score(&self, prefer_disabled: bool) -> i64 {
        [
            (prefer_disabled && self.disabled, PREFER_DISABLED_WEIGHT),
            (self.known_id, KNOWN_ID_WEIGHT),
            (self.hardware_prefix, HARDWARE_PREFIX_WEIGHT),
            (self.internal_location, INTERNAL_LOCATION_WEIGHT),
            (self.ps2_description, PS2_WEIGHT),
            (self.non_removable, NON_REMOVABLE_WEIGHT),
            (self.acpi_id, ACPI_ID_WEIGHT),
            (self.keyboard_description, KEYBOARD_DESCRIPTION_WEIGHT),
            (self.disabled, DISABLED_WEIGHT),
        ]
        .iter()
        .filter(|(fired, _)| *fired)
        .map(|(_, weight)| weight)
        .sum()
    }
}

/// A ranked candidate together with the score that placed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub device: KeyboardDevice,
    pub signals: Signals,
    pub score: i64,
}

/// Rank present devices that could be the internal keyboard, most likely first.
///
/// Ties on score go to non-removable devices; remaining ties keep snapshot
/// order, so the result is a pure function of the inputs.
pub fn classify_internal_candidates(
    devices: &[KeyboardDevice],
    config: &KeylockrConfig,
    prefer_disabled: bool,
) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = devices
        .iter()
        .filter(|device| device.present)
        .filter_map(|device| {
            let signals = Signals::evaluate(device, config);
            signals.is_candidate().then(|| Candidate {
                device: device.clone(),
                signals,
                score: signals.score(prefer_disabled),
            })
        })
        .collect();

    ranked.sort_by_key(|candidate| (Reverse(candidate.score), candidate.device.removable));
    ranked
}

pub fn is_internal(device: &KeyboardDevice, config: &KeylockrConfig) -> bool {
    Signals::evaluate(device, config).is_internal()
}

pub fn is_candidate(device: &KeyboardDevice, config: &KeylockrConfig) -> bool {
    Signals::evaluate(device, config).is_candidate()
}

/// True when some present, enabled device could serve as the user's keyboard
/// once the internal one is off.
pub fn has_external_keyboard(devices: &[KeyboardDevice], config: &KeylockrConfig) -> bool {
    devices
        .iter()
        .any(|device| device.present && device.enabled && !is_candidate(device, config))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, description: &str, removable: bool) -> KeyboardDevice {
        KeyboardDevice {
            id: id.to_string(),
            description: description.to_string(),
            hardware_ids: Vec::new(),
            location: None,
            enabled: true,
            present: true,
            removable,
        }
    }

    fn ids(ranked: &[Candidate]) -> Vec<&str> {
        ranked.iter().map(|c| c.device.id.as_str()).collect()
    }

    #[test]
    fn removable_device_without_signals_is_not_a_candidate() {
        let cfg = KeylockrConfig::default();
        let usb = device("HID\\VID_046D&PID_C31C\\1", "USB Keyboard", true);
        assert!(classify_internal_candidates(&[usb.clone()], &cfg, false).is_empty());
        assert!(!is_internal(&usb, &cfg));
        assert!(has_external_keyboard(&[usb], &cfg));
    }

    #[test]
    fn absent_devices_are_ignored() {
        let cfg = KeylockrConfig::default();
        let mut gone = device("ACPI\\PNP0303\\0", "Standard PS/2 Keyboard", false);
        gone.present = false;
        assert!(classify_internal_candidates(&[gone.clone()], &cfg, false).is_empty());
        assert!(!has_external_keyboard(&[gone], &cfg));
    }

    #[test]
    fn ps2_description_makes_a_candidate_but_not_internal() {
        let cfg = KeylockrConfig::default();
        let ps2 = device("USB\\ADAPTER\\1", "PS/2 to USB adapter", true);
        assert!(is_candidate(&ps2, &cfg));
        assert!(!is_internal(&ps2, &cfg));
        assert!(!has_external_keyboard(&[ps2], &cfg));
    }

    #[test]
    fn known_id_outranks_everything_but_prefer_disabled() {
        let mut cfg = KeylockrConfig::default();
        cfg.internal_device_ids.push("hid\\learned\\1".to_string());

        let learned = device("HID\\LEARNED\\1", "HID device", true);
        let mut acpi = device("ACPI\\PNP0303\\0", "Standard PS/2 Keyboard", false);
        acpi.hardware_ids = vec!["ACPI\\PNP0303".to_string()];

        let ranked = classify_internal_candidates(&[acpi.clone(), learned.clone()], &cfg, false);
        assert_eq!(ids(&ranked), vec!["HID\\LEARNED\\1", "ACPI\\PNP0303\\0"]);

        acpi.enabled = false;
        let ranked = classify_internal_candidates(&[learned, acpi], &cfg, true);
        assert_eq!(ids(&ranked)[0], "ACPI\\PNP0303\\0");
    }

    #[test]
    fn stronger_signal_wins_over_removability() {
        let cfg = KeylockrConfig {
            internal_hardware_id_prefixes: vec!["X\\".to_string()],
            ..KeylockrConfig::default()
        };
        let mut removable = device("R", "pad", true);
        removable.hardware_ids = vec!["X\\1".to_string()];
        removable.location = Some("internal".to_string());
        let mut fixed = device("F", "pad", false);
        fixed.hardware_ids = vec!["X\\2".to_string()];

        let ranked = classify_internal_candidates(&[fixed, removable], &cfg, false);
        assert_eq!(ids(&ranked), vec!["R", "F"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn equal_scores_keep_snapshot_order() {
        let cfg = KeylockrConfig::default();
        let first = device("B", "Keyboard", false);
        let second = device("A", "Keyboard", false);
        let ranked = classify_internal_candidates(&[first, second], &cfg, false);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ids(&ranked), vec!["B", "A"]);
    }

    #[test]
    fn location_signal_applies_when_no_prefix_matches() {
        let cfg = KeylockrConfig {
            internal_hardware_id_prefixes: vec![
                "ACPI\\PNP0303".to_string(),
                "HID\\VID_06CB".to_string(),
            ],
            ..KeylockrConfig::default()
        };
        let mut dev = device("HID\\VID_1234&PID_0001\\7", "HID Keyboard Device", true);
        dev.hardware_ids = vec!["HID\\VID_1234&PID_0001".to_string()];
        dev.location = Some("Internal I2C bus".to_string());

        let ranked = classify_internal_candidates(&[dev], &cfg, false);
        assert_eq!(ranked.len(), 1);
        let signals = ranked[0].signals;
        assert!(signals.internal_location);
        assert!(!signals.hardware_prefix);
        assert_eq!(
            ranked[0].score,
            INTERNAL_LOCATION_WEIGHT + KEYBOARD_DESCRIPTION_WEIGHT
        );
    }

    #[test]
    fn each_signal_outweighs_all_weaker_ones_combined() {
        let weights = [
            PREFER_DISABLED_WEIGHT,
            KNOWN_ID_WEIGHT,
            HARDWARE_PREFIX_WEIGHT,
            INTERNAL_LOCATION_WEIGHT,
            PS2_WEIGHT,
            NON_REMOVABLE_WEIGHT,
            ACPI_ID_WEIGHT,
            KEYBOARD_DESCRIPTION_WEIGHT,
            DISABLED_WEIGHT,
        ];
        for (i, weight) in weights.iter().enumerate() {
            let weaker: i64 = weights[i + 1..].iter().sum();
            assert!(*weight > weaker, "weight #{i} does not dominate");
        }
    }

    #[test]
    fn acpi_prefix_is_case_insensitive() {
        let cfg = KeylockrConfig::default();
        let dev = device("acpi\\pnp0303\\0", "kbd", false);
        assert!(Signals::evaluate(&dev, &cfg).acpi_id);
    }

    #[test]
    fn classification_is_deterministic() {
        let cfg = KeylockrConfig::default();
        let devices = vec![
            device("ACPI\\PNP0303\\0", "Standard PS/2 Keyboard", false),
            device("ACPI\\PNP0303\\1", "Standard PS/2 Keyboard", false),
            device("HID\\X\\2", "HID Keyboard Device", false),
        ];
        let first = ids(&classify_internal_candidates(&devices, &cfg, false))
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        for _ in 0..10 {
            let again = classify_internal_candidates(&devices, &cfg, false);
            assert_eq!(ids(&again), first);
        }
        assert_eq!(first[0], "ACPI\\PNP0303\\0");
        assert_eq!(first[1], "ACPI\\PNP0303\\1");
    }
}
