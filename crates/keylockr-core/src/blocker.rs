//! Software keyboard blocking through a low-level input filter.
//!
//! Used when the internal keyboard cannot be turned off at the device level.
//! While armed, the filter suppresses physical key events system-wide except
//! for a fixed set of escape combinations and the configured unlock hotkey.

use crate::device::{DeviceError, DeviceResult};
use crate::hotkey::Hotkey;
use crate::key::{EventKind, Key, KeyEvent};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Scan codes above this are treated as coming from an external device's
/// extended keymap and are never blocked.
pub const EXTENDED_SCAN_CODE_THRESHOLD: u32 = 0x80;

/// Decision returned by a filter callback for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    Suppress,
    Forward,
}

pub type FilterCallback = Arc<dyn Fn(&KeyEvent) -> FilterVerdict + Send + Sync>;

/// Platform primitive that routes every low-level keyboard event through a
/// callback.
///
/// Implementations pass [`FilterVerdict::Forward`]ed events on to the next
/// handler in the chain themselves; the callback only decides. The callback
/// may run on a dedicated input thread and must stay cheap.
pub trait InputFilter: Send + Sync {
    type Handle: Send;

    fn install(&self, callback: FilterCallback) -> DeviceResult<Self::Handle>;

    fn uninstall(&self, handle: Self::Handle);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockerError {
    #[error("software blocker has been disposed")]
    Disposed,

    #[error("failed to install input filter: {0}")]
    Install(#[from] DeviceError),
}

/// What to let through while armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPolicy {
    pub aggressive: bool,
    pub unlock_hotkey: Hotkey,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self {
            aggressive: true,
            unlock_hotkey: Hotkey::default(),
        }
    }
}

impl BlockPolicy {
    pub fn should_block(&self, event: &KeyEvent) -> bool {
        if !event.kind.is_key() || event.injected {
            return false;
        }

        let mods = event.modifiers;
        if event.key == Key::Function(4) && mods.alt {
            return false;
        }
        if event.key == Key::Delete && mods.ctrl && mods.alt {
            return false;
        }
        if self.unlock_hotkey.matches(event) {
            return false;
        }
        if event.scan_code > EXTENDED_SCAN_CODE_THRESHOLD {
            return false;
        }

        if self.aggressive {
            return true;
        }

        event.key.is_alphanumeric()
            || event.key.is_arrow()
            || matches!(event.key, Key::Space | Key::Backspace | Key::Enter)
    }
}

/// State the input callback reads without taking the blocker's mutex.
struct Shared {
    armed: AtomicBool,
    blocked: AtomicU64,
    unlock_requested: AtomicBool,
    policy: RwLock<BlockPolicy>,
}

impl Shared {
    fn decide(&self, event: &KeyEvent) -> FilterVerdict {
        if !self.armed.load(Ordering::Acquire) {
            return FilterVerdict::Forward;
        }
        let policy = self.policy.read();
        if matches!(event.kind, EventKind::KeyDown | EventKind::SystemKeyDown)
            && !event.injected
            && policy.unlock_hotkey.matches(event)
        {
            self.unlock_requested.store(true, Ordering::Release);
        }
        if policy.should_block(event) {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            FilterVerdict::Suppress
        } else {
            FilterVerdict::Forward
        }
    }
}

struct Inner<H> {
    handle: Option<H>,
    disposed: bool,
}

/// Owned software blocker: Disarmed -> `start_blocking` -> Armed ->
/// `stop_blocking` -> Disarmed. Dropping it disarms.
pub struct SoftwareBlocker<F: InputFilter> {
    filter: F,
    inner: Mutex<Inner<F::Handle>>,
    shared: Arc<Shared>,
}

impl<F: InputFilter> SoftwareBlocker<F> {
    pub fn new(filter: F) -> Self {
        Self::with_policy(filter, BlockPolicy::default())
    }

    pub fn with_policy(filter: F, policy: BlockPolicy) -> Self {
        Self {
            filter,
            inner: Mutex::new(Inner {
                handle: None,
                disposed: false,
            }),
            shared: Arc::new(Shared {
                armed: AtomicBool::new(false),
                blocked: AtomicU64::new(0),
                unlock_requested: AtomicBool::new(false),
                policy: RwLock::new(policy),
            }),
        }
    }

    /// Install the filter. No-op when already armed.
    pub fn start_blocking(&self) -> Result<(), BlockerError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(BlockerError::Disposed);
        }
        if inner.handle.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let callback: FilterCallback = Arc::new(move |event: &KeyEvent| shared.decide(event));
        let handle = self.filter.install(callback)?;
        inner.handle = Some(handle);
        self.shared.unlock_requested.store(false, Ordering::Release);
        self.shared.armed.store(true, Ordering::Release);
        info!("software keyboard block armed");
        Ok(())
    }

    /// Remove the filter. No-op when disarmed or disposed.
    pub fn stop_blocking(&self) {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.handle.take() {
            self.shared.armed.store(false, Ordering::Release);
            self.filter.uninstall(handle);
            info!(
                "software keyboard block released ({} events blocked)",
                self.blocked_count()
            );
        }
    }

    /// Disarm and refuse any further arming.
    pub fn dispose(&self) {
        self.stop_blocking();
        let mut inner = self.inner.lock();
        if !inner.disposed {
            debug!("software blocker disposed");
            inner.disposed = true;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::Acquire)
    }

    /// Set once the unlock hotkey is pressed on a physical keyboard while
    /// armed. Whoever holds the block decides what to do with it.
    pub fn unlock_requested(&self) -> bool {
        self.shared.unlock_requested.load(Ordering::Acquire)
    }

    pub fn blocked_count(&self) -> u64 {
        self.shared.blocked.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> BlockPolicy {
        *self.shared.policy.read()
    }

    pub fn set_policy(&self, policy: BlockPolicy) {
        *self.shared.policy.write() = policy;
    }

    /// Run the per-event decision exactly as the installed callback would.
    pub fn should_block(&self, event: &KeyEvent) -> bool {
        self.shared.decide(event) == FilterVerdict::Suppress
    }
}

impl<F: InputFilter> Drop for SoftwareBlocker<F> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::device::DeviceErrorKind;
    use crate::key::{EventKind, Modifiers};
    use std::sync::Mutex as StdMutex;

    /// Records install/uninstall calls and keeps the last callback around so
    /// tests can feed events through it.
    #[derive(Default)]
    pub(crate) struct MockFilter {
        pub installs: StdMutex<u32>,
        pub uninstalls: StdMutex<u32>,
        pub callback: StdMutex<Option<FilterCallback>>,
        pub fail_with: StdMutex<Option<DeviceError>>,
        /// Tripped right after a successful install.
        pub cancel_on_install: StdMutex<Option<CancelToken>>,
    }

    impl MockFilter {
        pub fn failing(err: DeviceError) -> Self {
            let filter = Self::default();
            *filter.fail_with.lock().unwrap() = Some(err);
            filter
        }

        pub fn feed(&self, event: &KeyEvent) -> FilterVerdict {
            let callback = self.callback.lock().unwrap().clone();
            callback.map_or(FilterVerdict::Forward, |cb| cb(event))
        }
    }

    impl InputFilter for Arc<MockFilter> {
        type Handle = u32;

        fn install(&self, callback: FilterCallback) -> DeviceResult<u32> {
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }
            let mut installs = self.installs.lock().unwrap();
            *installs += 1;
            *self.callback.lock().unwrap() = Some(callback);
            if let Some(token) = self.cancel_on_install.lock().unwrap().as_ref() {
                token.cancel();
            }
            Ok(*installs)
        }

        fn uninstall(&self, _handle: u32) {
            *self.uninstalls.lock().unwrap() += 1;
            *self.callback.lock().unwrap() = None;
        }
    }

    fn key(key: Key, scan: u32) -> KeyEvent {
        KeyEvent::new(EventKind::KeyDown, key, scan)
    }

    fn armed(policy: BlockPolicy) -> (Arc<MockFilter>, SoftwareBlocker<Arc<MockFilter>>) {
        let filter = Arc::new(MockFilter::default());
        let blocker = SoftwareBlocker::with_policy(filter.clone(), policy);
        blocker.start_blocking().unwrap();
        (filter, blocker)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let filter = Arc::new(MockFilter::default());
        let blocker = SoftwareBlocker::new(filter.clone());

        blocker.stop_blocking();
        assert_eq!(*filter.uninstalls.lock().unwrap(), 0);

        blocker.start_blocking().unwrap();
        blocker.start_blocking().unwrap();
        assert!(blocker.is_armed());
        assert_eq!(*filter.installs.lock().unwrap(), 1);

        blocker.stop_blocking();
        blocker.stop_blocking();
        assert!(!blocker.is_armed());
        assert_eq!(*filter.uninstalls.lock().unwrap(), 1);
    }

    #[test]
    fn disposed_blocker_refuses_to_arm() {
        let (filter, blocker) = armed(BlockPolicy::default());
        blocker.dispose();
        assert!(!blocker.is_armed());
        assert_eq!(*filter.uninstalls.lock().unwrap(), 1);
        assert_eq!(blocker.start_blocking(), Err(BlockerError::Disposed));
    }

    #[test]
    fn drop_disarms() {
        let (filter, blocker) = armed(BlockPolicy::default());
        drop(blocker);
        assert_eq!(*filter.uninstalls.lock().unwrap(), 1);
    }

    #[test]
    fn install_failure_leaves_blocker_disarmed() {
        let err = DeviceError::new(DeviceErrorKind::PermissionDenied, 13, "EVIOCGRAB");
        let blocker = SoftwareBlocker::new(Arc::new(MockFilter::failing(err.clone())));
        assert_eq!(blocker.start_blocking(), Err(BlockerError::Install(err)));
        assert!(!blocker.is_armed());
    }

    #[test]
    fn aggressive_mode_blocks_ordinary_keys_and_counts_them() {
        let (filter, blocker) = armed(BlockPolicy::default());
        assert_eq!(filter.feed(&key(Key::Letter('A'), 0x1e)), FilterVerdict::Suppress);
        assert_eq!(filter.feed(&key(Key::Function(5), 0x3f)), FilterVerdict::Suppress);
        assert_eq!(blocker.blocked_count(), 2);
    }

    #[test]
    fn escape_combinations_always_pass() {
        let (filter, _blocker) = armed(BlockPolicy::default());
        let alt = Modifiers {
            alt: true,
            ..Modifiers::NONE
        };
        let alt_f4 = KeyEvent::new(EventKind::SystemKeyDown, Key::Function(4), 0x3e)
            .with_modifiers(alt);
        let cad = key(Key::Delete, 0x53).with_modifiers(Modifiers::ctrl_alt());
        let hotkey = key(Key::Letter('K'), 0x25).with_modifiers(Modifiers::ctrl_alt());

        assert_eq!(filter.feed(&alt_f4), FilterVerdict::Forward);
        assert_eq!(filter.feed(&cad), FilterVerdict::Forward);
        assert_eq!(filter.feed(&hotkey), FilterVerdict::Forward);
        assert_eq!(filter.feed(&key(Key::Delete, 0x53)), FilterVerdict::Suppress);
    }

    #[test]
    fn injected_extended_and_non_key_events_pass() {
        let (filter, blocker) = armed(BlockPolicy::default());
        assert_eq!(
            filter.feed(&key(Key::Letter('A'), 0x1e).injected()),
            FilterVerdict::Forward
        );
        assert_eq!(filter.feed(&key(Key::Other(0xe0), 0xe0)), FilterVerdict::Forward);
        assert_eq!(
            filter.feed(&KeyEvent::new(EventKind::Other, Key::Letter('A'), 0x1e)),
            FilterVerdict::Forward
        );
        assert_eq!(blocker.blocked_count(), 0);
    }

    #[test]
    fn selective_mode_only_blocks_typing_keys() {
        let (filter, _blocker) = armed(BlockPolicy {
            aggressive: false,
            unlock_hotkey: Hotkey::default(),
        });
        for k in [
            Key::Letter('Q'),
            Key::Digit(7),
            Key::Space,
            Key::Backspace,
            Key::Enter,
            Key::Left,
            Key::Down,
        ] {
            assert_eq!(filter.feed(&key(k, 0x10)), FilterVerdict::Suppress, "{k}");
        }
        for k in [Key::Escape, Key::Tab, Key::Function(1), Key::Control, Key::Delete] {
            assert_eq!(filter.feed(&key(k, 0x10)), FilterVerdict::Forward, "{k}");
        }
    }

    #[test]
    fn custom_hotkey_and_injected_events_pass_in_every_mode() {
        let hotkey = Hotkey::parse("Shift+F9").unwrap();
        for aggressive in [true, false] {
            let (filter, _blocker) = armed(BlockPolicy {
                aggressive,
                unlock_hotkey: hotkey,
            });
            let shift = Modifiers {
                shift: true,
                ..Modifiers::NONE
            };
            let press = KeyEvent::new(EventKind::KeyDown, Key::Function(9), 0x43).with_modifiers(shift);
            let release = KeyEvent::new(EventKind::KeyUp, Key::Function(9), 0x43).with_modifiers(shift);
            assert_eq!(filter.feed(&press), FilterVerdict::Forward);
            assert_eq!(filter.feed(&release), FilterVerdict::Forward);
            assert_eq!(
                filter.feed(&key(Key::Letter('Z'), 0x2c).injected()),
                FilterVerdict::Forward
            );
        }
    }

    #[test]
    fn disarmed_callback_forwards_everything() {
        let filter = Arc::new(MockFilter::default());
        let blocker = SoftwareBlocker::new(filter.clone());
        assert!(!blocker.should_block(&key(Key::Letter('A'), 0x1e)));
        blocker.start_blocking().unwrap();
        assert!(blocker.should_block(&key(Key::Letter('A'), 0x1e)));
    }

    #[test]
    fn unlock_hotkey_press_is_latched_until_rearmed() {
        let (filter, blocker) = armed(BlockPolicy::default());
        assert!(!blocker.unlock_requested());

        let injected = KeyEvent::new(EventKind::KeyDown, Key::Letter('K'), 0x25)
            .with_modifiers(Modifiers::ctrl_alt())
            .injected();
        filter.feed(&injected);
        assert!(!blocker.unlock_requested());

        let press = KeyEvent::new(EventKind::SystemKeyDown, Key::Letter('K'), 0x25)
            .with_modifiers(Modifiers::ctrl_alt());
        filter.feed(&press);
        assert!(blocker.unlock_requested());

        blocker.stop_blocking();
        blocker.start_blocking().unwrap();
        assert!(!blocker.unlock_requested());
    }
}
