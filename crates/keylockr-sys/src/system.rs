//! Sysfs-backed `DeviceProvider`. Keyboards are discovered under
//! `/sys/class/input` and switched off through the kernel's per-device
//! `inhibited` attribute, which stops event delivery without unbinding the
//! driver.

use crate::filter::VIRTUAL_DEVICE_NAME;
use crate::parse::{self, Bus};
use keylockr_core::device::{
    DeviceError, DeviceErrorKind, DeviceProvider, DeviceResult, KeyboardDevice,
};
use log::{debug, trace};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where sysfs is mounted on a normal system.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

const INPUT_CLASS_DIR: &str = "class/input";
const INHIBITED_ATTR: &str = "inhibited";

/// Enumerates and toggles keyboards through sysfs.
#[derive(Debug, Clone)]
pub struct SysfsDeviceProvider {
    root: PathBuf,
}

/// A keyboard together with the sysfs directory that owns it.
#[derive(Debug, Clone)]
struct InputNode {
    dir: PathBuf,
    device: KeyboardDevice,
}

impl Default for SysfsDeviceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsDeviceProvider {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_SYSFS_ROOT)
    }

    /// Point the provider at an alternative sysfs mount, e.g. a fixture tree.
    pub fn with_root<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn scan(&self) -> DeviceResult<Vec<InputNode>> {
        let class_dir = self.root.join(INPUT_CLASS_DIR);
        let entries = fs::read_dir(&class_dir).map_err(|err| {
            io_error(
                &err,
                format!("cannot enumerate input devices in {}", class_dir.display()),
            )
        })?;

        let mut nodes = Vec::new();
        for entry in entries.flatten() {
            let sysname = entry.file_name().to_string_lossy().into_owned();
            if !is_input_node(&sysname) {
                continue;
            }
            if let Some(node) = read_node(&entry.path(), &sysname) {
                nodes.push(node);
            }
        }

        // read_dir order is unspecified; keep snapshots stable between calls
        nodes.sort_by_key(|node| input_number(&node.dir));
        Ok(nodes)
    }

    fn find(&self, id: &str) -> DeviceResult<InputNode> {
        self.scan()?
            .into_iter()
            .find(|node| node.device.has_id(id))
            .ok_or_else(|| {
                DeviceError::new(
                    DeviceErrorKind::Other,
                    libc::ENODEV,
                    format!("keyboard {id} is no longer present"),
                )
            })
    }

    fn set_inhibited(&self, id: &str, inhibited: bool) -> DeviceResult<()> {
        let node = self.find(id)?;
        let attr = node.dir.join(INHIBITED_ATTR);
        let value = if inhibited { "1" } else { "0" };
        debug!("writing {value} to {}", attr.display());

        // never create the attribute: kernels without inhibit support lack it
        fs::OpenOptions::new()
            .write(true)
            .open(&attr)
            .and_then(|mut file| io::Write::write_all(&mut file, value.as_bytes()))
            .map_err(|err| io_error(&err, format!("cannot write {}", attr.display())))
    }
}

impl DeviceProvider for SysfsDeviceProvider {
    fn list(&self) -> DeviceResult<Vec<KeyboardDevice>> {
        let devices: Vec<KeyboardDevice> =
            self.scan()?.into_iter().map(|node| node.device).collect();
        debug!("sysfs reports {} keyboard(s)", devices.len());
        Ok(devices)
    }

    fn enable(&self, id: &str) -> DeviceResult<()> {
        self.set_inhibited(id, false)
    }

    fn disable(&self, id: &str) -> DeviceResult<()> {
        self.set_inhibited(id, true)
    }
}

fn is_input_node(sysname: &str) -> bool {
    sysname
        .strip_prefix("input")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn input_number(dir: &Path) -> u32 {
    dir.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_prefix("input"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|value| value.trim().to_string())
}

fn read_node(dir: &Path, sysname: &str) -> Option<InputNode> {
    let keys = parse::parse_key_bitmap(&read_attr(dir, "capabilities/key")?);
    if !parse::is_keyboard(&keys) {
        trace!("{sysname}: not a keyboard");
        return None;
    }

    let name = read_attr(dir, "name").unwrap_or_default();
    if name.contains(VIRTUAL_DEVICE_NAME) {
        trace!("{sysname}: skipping our own virtual keyboard");
        return None;
    }

    let bus = Bus::from_code(read_hex(dir, "id/bustype"));
    let vendor = read_hex(dir, "id/vendor");
    let product = read_hex(dir, "id/product");
    let phys = read_attr(dir, "phys").unwrap_or_default();
    let firmware = read_attr(dir, "device/firmware_id")
        .or_else(|| read_attr(dir, "device/firmware_node/hid"))
        .map(|text| parse::parse_firmware_ids(&text))
        .unwrap_or_default();

    let hardware_ids = parse::hardware_ids(bus, vendor, product, &firmware);
    let instance = if phys.is_empty() { sysname } else { phys.as_str() };
    let id = format!("{}\\{}", hardware_ids[0], instance);

    let enabled = read_attr(dir, INHIBITED_ATTR).map_or(true, |value| value != "1");

    Some(InputNode {
        dir: dir.to_path_buf(),
        device: KeyboardDevice {
            id,
            description: parse::description(bus, &name),
            hardware_ids,
            location: parse::location(bus, &phys),
            enabled,
            present: true,
            removable: is_removable(dir, bus),
        },
    })
}

fn read_hex(dir: &Path, name: &str) -> u16 {
    read_attr(dir, name)
        .and_then(|value| parse::parse_hex_u16(&value))
        .unwrap_or(0)
}

/// Hot-pluggable buses are removable unless the USB port they hang off is
/// marked `fixed` (internal hubs on many laptops).
fn is_removable(dir: &Path, bus: Bus) -> bool {
    if !bus.is_hotpluggable() {
        return false;
    }
    let Ok(mut current) = fs::canonicalize(dir.join("device")) else {
        return true;
    };
    loop {
        if let Some(value) = read_attr(&current, "removable") {
            match value.as_str() {
                "fixed" => return false,
                "removable" => return true,
                _ => {}
            }
        }
        if !current.pop() {
            return true;
        }
    }
}

fn io_error(err: &io::Error, context: String) -> DeviceError {
    let code = err.raw_os_error().unwrap_or(0);
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied => DeviceErrorKind::PermissionDenied,
        io::ErrorKind::NotFound => DeviceErrorKind::NotDisableable,
        _ if code == libc::EROFS || code == libc::EINVAL => DeviceErrorKind::NotDisableable,
        _ => DeviceErrorKind::Other,
    };
    DeviceError::new(kind, code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_numbered_input_nodes_are_considered() {
        assert!(is_input_node("input0"));
        assert!(is_input_node("input42"));
        assert!(!is_input_node("input"));
        assert!(!is_input_node("event3"));
        assert!(!is_input_node("input3x"));
    }

    #[test]
    fn io_errors_map_to_device_error_kinds() {
        let denied = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(
            io_error(&denied, "x".into()).kind,
            DeviceErrorKind::PermissionDenied
        );

        let missing = io::Error::from_raw_os_error(libc::ENOENT);
        let err = io_error(&missing, "x".into());
        assert_eq!(err.kind, DeviceErrorKind::NotDisableable);
        assert_eq!(err.code, libc::ENOENT);

        let busy = io::Error::from_raw_os_error(libc::EBUSY);
        assert_eq!(io_error(&busy, "x".into()).kind, DeviceErrorKind::Other);
    }

    #[test]
    fn non_hotplug_buses_are_fixed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_removable(dir.path(), Bus::I8042));
        assert!(is_removable(dir.path(), Bus::Usb));
    }

    #[test]
    fn fixed_usb_port_is_not_removable() {
        let dir = tempfile::tempdir().unwrap();
        let port = dir.path().join("usb1/1-7");
        let iface = port.join("1-7:1.0/0003:17EF:6047.0001");
        fs::create_dir_all(&iface).unwrap();
        fs::write(port.join("removable"), "fixed\n").unwrap();

        let node = dir.path().join("input5");
        fs::create_dir_all(&node).unwrap();
        std::os::unix::fs::symlink(&iface, node.join("device")).unwrap();

        assert!(!is_removable(&node, Bus::Usb));
    }
}
