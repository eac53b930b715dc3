use crate::device::DeviceError;
use thiserror::Error;

/// Result alias for core operations.
pub type KeylockrResult<T> = Result<T, KeylockrError>;

#[derive(Error, Debug)]
pub enum KeylockrError {
    #[error("[KL1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[KL1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[KL1002] toml config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("[KL1003] yaml config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[KL1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[KL1200] {0}")]
    InternalKeyboardNotFound(String),

    #[error("[KL1201] {0}")]
    ExternalKeyboardNotFound(String),

    #[error("[KL1300] {0}")]
    AdministrativePrivilegesRequired(String),

    #[error("[KL2000] device operation failed:\n{details}")]
    DeviceOperationFailed {
        details: String,
        #[source]
        cause: DeviceError,
    },

    #[error("[KL2100] software blocker error: {0}")]
    Blocker(String),

    #[error("[KL9000] operation canceled")]
    Canceled,
}

impl KeylockrError {
    pub fn code(&self) -> &'static str {
        match self {
            KeylockrError::Io(_) => "KL1000",
            KeylockrError::Toml(_) => "KL1001",
            KeylockrError::TomlSerialize(_) => "KL1002",
            KeylockrError::Yaml(_) => "KL1003",
            KeylockrError::InvalidConfig(_) => "KL1100",
            KeylockrError::InternalKeyboardNotFound(_) => "KL1200",
            KeylockrError::ExternalKeyboardNotFound(_) => "KL1201",
            KeylockrError::AdministrativePrivilegesRequired(_) => "KL1300",
            KeylockrError::DeviceOperationFailed { .. } => "KL2000",
            KeylockrError::Blocker(_) => "KL2100",
            KeylockrError::Canceled => "KL9000",
        }
    }

    /// Process exit code used by the command surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            KeylockrError::ExternalKeyboardNotFound(_) => 2,
            KeylockrError::InternalKeyboardNotFound(_) => 3,
            KeylockrError::AdministrativePrivilegesRequired(_) => 4,
            KeylockrError::DeviceOperationFailed { .. } | KeylockrError::Blocker(_) => 5,
            KeylockrError::Canceled => 130,
            _ => 1,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, KeylockrError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceErrorKind;

    #[test]
    fn exit_codes_follow_command_contract() {
        let cause = DeviceError::new(DeviceErrorKind::Other, 5, "boom");
        let cases = [
            (KeylockrError::ExternalKeyboardNotFound("x".into()), 2),
            (KeylockrError::InternalKeyboardNotFound("x".into()), 3),
            (KeylockrError::AdministrativePrivilegesRequired("x".into()), 4),
            (
                KeylockrError::DeviceOperationFailed {
                    details: "x".into(),
                    cause,
                },
                5,
            ),
            (KeylockrError::Canceled, 130),
            (KeylockrError::InvalidConfig("x".into()), 1),
        ];

        for (err, code) in cases {
            assert_eq!(err.exit_code(), code, "{err}");
        }
    }

    #[test]
    fn messages_carry_stable_codes() {
        let err = KeylockrError::ExternalKeyboardNotFound("attach one".into());
        assert!(err.to_string().starts_with("[KL1201]"));
        assert_eq!(err.code(), "KL1201");
    }
}
