use std::fmt;
use thiserror::Error;

/// One keyboard-class device as reported by a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardDevice {
    pub id: String,
    pub description: String,
    pub hardware_ids: Vec<String>,
    pub location: Option<String>,
    pub enabled: bool,
    pub present: bool,
    pub removable: bool,
}

impl KeyboardDevice {
    /// Identifier comparison is case-insensitive.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}

/// Why a device primitive failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    PermissionDenied,
    NotDisableable,
    Other,
}

impl fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceErrorKind::PermissionDenied => "permission denied",
            DeviceErrorKind::NotDisableable => "device cannot be disabled",
            DeviceErrorKind::Other => "device error",
        };
        f.write_str(label)
    }
}

/// Failure reported by a device or input-filter primitive, tagged by kind and
/// carrying the platform's native error code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message} (native error {code})")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.kind == DeviceErrorKind::PermissionDenied
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Abstraction over the platform's keyboard enumeration and device-node
/// enable/disable primitives.
///
/// Implementations own whatever OS session handle they need and release it
/// before returning; the core only ever sees plain snapshots.
pub trait DeviceProvider: Send + Sync {
    /// Return every keyboard-class device currently known to the system.
    fn list(&self) -> DeviceResult<Vec<KeyboardDevice>>;

    /// Turn the device node identified by `id` back on.
    fn enable(&self, id: &str) -> DeviceResult<()>;

    /// Turn the device node identified by `id` off.
    fn disable(&self, id: &str) -> DeviceResult<()>;
}
