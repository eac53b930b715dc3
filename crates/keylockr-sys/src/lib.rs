//! Linux backends for KeyLockr: a sysfs device provider that inhibits the
//! built-in keyboard, and an evdev input filter for the software fallback.
//! Attribute decoding lives in `parse`, key translation in `keymap`.

mod filter;
mod keymap;
mod parse;
mod system;

pub use filter::{EvdevFilterHandle, EvdevInputFilter, VIRTUAL_DEVICE_NAME};
pub use system::{SysfsDeviceProvider, DEFAULT_SYSFS_ROOT};
