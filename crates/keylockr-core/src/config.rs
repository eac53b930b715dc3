use crate::error::{KeylockrError, KeylockrResult};
use crate::hotkey::{Hotkey, DEFAULT_HOTKEY};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Hardware-id prefixes that usually belong to a built-in keyboard: the
/// standard PS/2 ACPI node, vendor ACPI nodes, and the Synaptics, Lenovo and
/// Elan I2C HID controllers.
pub const DEFAULT_INTERNAL_HARDWARE_ID_PREFIXES: &[&str] = &[
    "ACPI\\PNP0303",
    "ACPI\\VEN_",
    "HID\\VID_06CB",
    "HID\\VID_17EF",
    "HID\\VID_04F3",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BlockerCfg {
    /// Block every physical key except the escape combinations. When false,
    /// only typing keys (alphanumerics, space, backspace, enter, arrows) are
    /// blocked.
    #[serde(default = "default_true")]
    pub aggressive: bool,
}

impl Default for BlockerCfg {
    fn default() -> Self {
        Self { aggressive: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct KeylockrConfig {
    /// Device identifiers known to be the internal keyboard. Grows as the
    /// orchestrator learns.
    #[serde(default)]
    pub internal_device_ids: Vec<String>,

    #[serde(default = "default_prefixes")]
    pub internal_hardware_id_prefixes: Vec<String>,

    #[serde(default = "default_true")]
    pub require_external_keyboard: bool,

    #[serde(default = "default_auto_unlock_minutes")]
    pub auto_unlock_timeout_minutes: u32,

    #[serde(default)]
    pub persistent_lock: bool,

    #[serde(default = "default_hotkey")]
    pub global_hotkey: String,

    #[serde(default)]
    pub blocker: BlockerCfg,
}

fn default_true() -> bool {
    true
}

fn default_prefixes() -> Vec<String> {
    DEFAULT_INTERNAL_HARDWARE_ID_PREFIXES
        .iter()
        .map(|prefix| prefix.to_string())
        .collect()
}

fn default_auto_unlock_minutes() -> u32 {
    10
}

fn default_hotkey() -> String {
    DEFAULT_HOTKEY.to_string()
}

impl Default for KeylockrConfig {
    fn default() -> Self {
        Self {
            internal_device_ids: Vec::new(),
            internal_hardware_id_prefixes: default_prefixes(),
            require_external_keyboard: true,
            auto_unlock_timeout_minutes: default_auto_unlock_minutes(),
            persistent_lock: false,
            global_hotkey: default_hotkey(),
            blocker: BlockerCfg::default(),
        }
    }
}

impl KeylockrConfig {
    pub fn is_known_internal(&self, id: &str) -> bool {
        self.internal_device_ids
            .iter()
            .any(|known| known.eq_ignore_ascii_case(id))
    }

    /// Any hardware id starts with a configured prefix (ASCII case-insensitive).
    pub fn matches_internal_prefix(&self, hardware_ids: &[String]) -> bool {
        hardware_ids.iter().any(|hwid| {
            self.internal_hardware_id_prefixes
                .iter()
                .filter(|prefix| !prefix.is_empty())
                .any(|prefix| starts_with_ignore_case(hwid, prefix))
        })
    }

    /// Record `id` as a known internal keyboard. Returns false when it was
    /// already present.
    pub fn remember_internal_device(&mut self, id: &str) -> bool {
        if self.is_known_internal(id) {
            return false;
        }
        self.internal_device_ids.push(id.to_string());
        true
    }

    /// Auto-unlock delay, never shorter than one minute.
    pub fn auto_unlock_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.auto_unlock_timeout_minutes.max(1)) * 60)
    }

    /// When a lock taken at `from` should lift itself; `None` under `persistent_lock`.
    pub fn auto_unlock_deadline(&self, from: Instant) -> Option<Instant> {
        (!self.persistent_lock).then(|| from + self.auto_unlock_timeout())
    }

    pub fn hotkey(&self) -> KeylockrResult<Hotkey> {
        Hotkey::parse(&self.global_hotkey).map_err(|err| {
            KeylockrError::InvalidConfig(format!(
                "global_hotkey `{}`: {}",
                self.global_hotkey, err
            ))
        })
    }

    /// Hotkey to honour while blocking; falls back to Ctrl+Alt+K when the
    /// configured one does not parse.
    pub fn unlock_hotkey_or_default(&self) -> Hotkey {
        self.hotkey().unwrap_or_default()
    }

    /// Report problems a user should fix; an empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.internal_hardware_id_prefixes.is_empty() {
            issues.push(
                "internal_hardware_id_prefixes is empty; only learned ids and heuristics will identify the internal keyboard".to_string(),
            );
        }
        if self
            .internal_hardware_id_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
        {
            issues.push("internal_hardware_id_prefixes contains a blank entry".to_string());
        }
        if self.auto_unlock_timeout_minutes == 0 {
            issues.push("auto_unlock_timeout_minutes must be at least 1".to_string());
        }
        if let Err(err) = self.hotkey() {
            issues.push(err.to_string());
        }
        issues
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .as_bytes()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix.as_bytes()))
}

/// Persistence boundary for [`KeylockrConfig`].
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> KeylockrResult<KeylockrConfig>;
    fn save(&self, config: &KeylockrConfig) -> KeylockrResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                ConfigFormat::Yaml
            }
            _ => ConfigFormat::Toml,
        }
    }
}

/// File-backed store. A missing file means "use defaults".
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/keylockr/config.toml` for the current user.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keylockr")
            .join("config.toml")
    }

    pub fn format(&self) -> ConfigFormat {
        ConfigFormat::from_path(&self.path)
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> KeylockrResult<KeylockrConfig> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(KeylockrConfig::default());
            }
            Err(err) => return Err(err.into()),
        };

        let cfg = match self.format() {
            ConfigFormat::Toml => toml::from_str::<KeylockrConfig>(&contents)?,
            ConfigFormat::Yaml => serde_yaml::from_str::<KeylockrConfig>(&contents)?,
        };
        Ok(cfg)
    }

    fn save(&self, config: &KeylockrConfig) -> KeylockrResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let rendered = match self.format() {
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Yaml => serde_yaml::to_string(config)?,
        };
        fs::write(&self.path, rendered)?;
        Ok(())
    }
}
