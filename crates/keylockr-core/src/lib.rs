pub mod blocker;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod device;
pub mod error;
pub mod hotkey;
pub mod key;
pub mod logging;
pub mod service;

pub use blocker::{BlockPolicy, BlockerError, FilterCallback, FilterVerdict, InputFilter, SoftwareBlocker};
pub use cancel::CancelToken;
pub use classifier::{classify_internal_candidates, has_external_keyboard, Candidate, Signals};
pub use config::{BlockerCfg, ConfigFormat, ConfigStore, FileConfigStore, KeylockrConfig};
pub use device::{DeviceError, DeviceErrorKind, DeviceProvider, DeviceResult, KeyboardDevice};
pub use error::{KeylockrError, KeylockrResult};
pub use hotkey::{Hotkey, HotkeyParseError};
pub use key::{EventKind, Key, KeyEvent, Modifiers};
pub use service::{DeviceReport, HoldEnd, KeyboardManager, LockOutcome, LockState, UnlockReport};
