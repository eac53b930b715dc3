//! Software keyboard blocking on Linux.
//!
//! Every physical keyboard is grabbed through evdev so nothing else sees its
//! events. A worker thread polls the grabbed devices, asks the installed
//! callback about each key event and replays forwarded ones through a uinput
//! virtual keyboard.

use crate::keymap::ModifierTracker;
use crate::parse;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, Device, EventType, InputEvent, Key};
use keylockr_core::blocker::{FilterCallback, FilterVerdict, InputFilter};
use keylockr_core::device::{DeviceError, DeviceErrorKind, DeviceResult};
use log::{debug, error, info, warn};
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Name of the uinput keyboard forwarded events are replayed through.
pub const VIRTUAL_DEVICE_NAME: &str = "KeyLockr (virtual) Keyboard";

const INPUT_DEV_DIR: &str = "/dev/input";

const POLL_TIMEOUT_MS: i32 = 100;

/// Poll results meaning the descriptor is dead, e.g. after an unplug.
const POLL_GONE: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

/// [`InputFilter`] built on evdev grabs and a uinput replay device.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvdevInputFilter;

/// Running filter; dropping it without `uninstall` leaves the worker running
/// until the process exits.
pub struct EvdevFilterHandle {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EvdevInputFilter {
    pub fn new() -> Self {
        Self
    }
}

impl InputFilter for EvdevInputFilter {
    type Handle = EvdevFilterHandle;

    fn install(&self, callback: FilterCallback) -> DeviceResult<EvdevFilterHandle> {
        let (mut keyboards, denied) = open_keyboards();
        if keyboards.is_empty() {
            return Err(no_keyboards_error(denied));
        }

        let output = build_virtual_keyboard()
            .map_err(|err| device_error(&err, "cannot create uinput keyboard"))?;

        for index in 0..keyboards.len() {
            if let Err(err) = keyboards[index].grab() {
                for grabbed in &mut keyboards[..index] {
                    let _ = grabbed.ungrab();
                }
                return Err(device_error(&err, "cannot grab keyboard"));
            }
        }
        info!("grabbed {} keyboard device(s)", keyboards.len());

        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("keylockr-filter".into())
                .spawn(move || pump(keyboards, output, callback, stop))
                .map_err(|err| device_error(&err, "cannot start filter thread"))?
        };

        Ok(EvdevFilterHandle {
            stop,
            worker: Some(worker),
        })
    }

    fn uninstall(&self, mut handle: EvdevFilterHandle) {
        handle.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = handle.worker.take() {
            if worker.join().is_err() {
                error!("keyboard filter thread panicked");
            }
        }
    }
}

/// Open every physical keyboard event node. The flag reports whether any
/// node refused to open for lack of permission.
fn open_keyboards() -> (Vec<Device>, bool) {
    let entries = match fs::read_dir(INPUT_DEV_DIR) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("cannot list {INPUT_DEV_DIR}: {err}");
            return (Vec::new(), err.kind() == io::ErrorKind::PermissionDenied);
        }
    };

    let mut denied = false;
    let mut keyboards = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_event_node = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("event"));
        if !is_event_node {
            continue;
        }
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(err) => {
                debug!("skipping {}: {err}", path.display());
                denied |= err.kind() == io::ErrorKind::PermissionDenied;
                continue;
            }
        };

        let name = device.name().unwrap_or("").to_string();
        if name.contains(VIRTUAL_DEVICE_NAME) {
            continue;
        }
        let codes: Vec<u16> = device
            .supported_keys()
            .map(|keys| keys.iter().map(|key| key.code()).collect())
            .unwrap_or_default();
        if !parse::is_keyboard(&codes) {
            continue;
        }
        debug!("filtering {} ({})", name, path.display());
        keyboards.push(device);
    }
    (keyboards, denied)
}

fn no_keyboards_error(denied: bool) -> DeviceError {
    if denied {
        DeviceError::new(
            DeviceErrorKind::PermissionDenied,
            libc::EACCES,
            "permission denied opening keyboard event devices under /dev/input",
        )
    } else {
        DeviceError::new(
            DeviceErrorKind::Other,
            libc::ENODEV,
            "no readable keyboard event devices under /dev/input",
        )
    }
}

fn build_virtual_keyboard() -> io::Result<VirtualDevice> {
    let mut keys = AttributeSet::<Key>::new();
    for code in 0..256u16 {
        keys.insert(Key::new(code));
    }
    VirtualDeviceBuilder::new()?
        .name(VIRTUAL_DEVICE_NAME)
        .with_keys(&keys)?
        .build()
}

fn pump(
    mut keyboards: Vec<Device>,
    mut output: VirtualDevice,
    callback: FilterCallback,
    stop: Arc<AtomicBool>,
) {
    let mut fds: Vec<libc::pollfd> = keyboards
        .iter()
        .map(|device| libc::pollfd {
            fd: device.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let mut tracker = ModifierTracker::default();

    while !stop.load(Ordering::SeqCst) {
        // SAFETY: `fds` holds descriptors owned by `keyboards`, which outlive the call.
        let ready = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                POLL_TIMEOUT_MS,
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            error!("poll on keyboard devices failed: {err}");
            break;
        }
        if ready == 0 {
            continue;
        }

        let mut gone = Vec::new();
        for (index, (device, fd)) in keyboards.iter_mut().zip(fds.iter()).enumerate() {
            if is_gone(fd.revents) {
                gone.push(index);
                continue;
            }
            if fd.revents & libc::POLLIN == 0 {
                continue;
            }
            let events: Vec<InputEvent> = match device.fetch_events() {
                Ok(events) => events.collect(),
                Err(err) if err.raw_os_error() == Some(libc::ENODEV) => {
                    gone.push(index);
                    continue;
                }
                Err(err) => {
                    warn!("reading keyboard events failed: {err}");
                    continue;
                }
            };

            let forwarded: Vec<InputEvent> = events
                .into_iter()
                .filter(|event| event.event_type() == EventType::KEY)
                .filter(|event| {
                    let translated = tracker.translate(event.code(), event.value());
                    callback(&translated) == FilterVerdict::Forward
                })
                .collect();
            if !forwarded.is_empty() {
                if let Err(err) = output.emit(&forwarded) {
                    warn!("replaying keyboard events failed: {err}");
                }
            }
        }

        if !gone.is_empty() {
            warn!("{} keyboard device(s) went away; no longer filtering them", gone.len());
            drop_gone(&mut keyboards, &mut fds, &gone);
        }
    }

    for device in &mut keyboards {
        let _ = device.ungrab();
    }
    info!("released keyboard grabs");
}

fn is_gone(revents: libc::c_short) -> bool {
    revents & POLL_GONE != 0
}

/// Remove the entries at `gone` (ascending indices) from both lists.
fn drop_gone<T>(devices: &mut Vec<T>, fds: &mut Vec<libc::pollfd>, gone: &[usize]) {
    for &index in gone.iter().rev() {
        devices.remove(index);
        fds.remove(index);
    }
}

fn device_error(err: &io::Error, context: &str) -> DeviceError {
    let code = err.raw_os_error().unwrap_or(0);
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied => DeviceErrorKind::PermissionDenied,
        _ => DeviceErrorKind::Other,
    };
    DeviceError::new(kind, code, format!("{context}: {err}"))
}
