//! Lock orchestration: coordinates configuration, the device provider, and the
//! software blocker.

use crate::blocker::{BlockPolicy, BlockerError, InputFilter, SoftwareBlocker};
use crate::cancel::CancelToken;
use crate::classifier::{self, Candidate, Signals};
use crate::config::{ConfigStore, KeylockrConfig};
use crate::device::{DeviceError, DeviceErrorKind, DeviceProvider, KeyboardDevice};
use crate::error::{KeylockrError, KeylockrResult};
use log::{debug, info, warn};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

/// Lock state, always recomputed from the live snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unknown,
    Locked,
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockState::Unknown => "unknown",
            LockState::Locked => "locked",
            LockState::Unlocked => "unlocked",
        };
        f.write_str(label)
    }
}

/// What a successful lock actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    AlreadyLocked,
    HardwareDisabled { device_id: String },
    SoftwareBlocked { device_id: String },
}

/// What a successful unlock actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockReport {
    pub enabled: Vec<String>,
    pub software_block_released: bool,
}

impl UnlockReport {
    pub fn already_unlocked(&self) -> bool {
        self.enabled.is_empty() && !self.software_block_released
    }
}

/// Why [`KeyboardManager::hold`] stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldEnd {
    Interrupted,
    UnlockHotkey,
    TimedOut,
    /// The software block was released by someone else.
    Released,
}

/// One row of `debug-list-devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device: KeyboardDevice,
    pub signals: Signals,
    pub score: Option<i64>,
    pub rank: Option<usize>,
}

/// Per-device failures collected while walking the candidate list.
#[derive(Default)]
struct Failures {
    details: Vec<String>,
    cause: Option<DeviceError>,
}

impl Failures {
    fn record(&mut self, detail: String, err: DeviceError) {
        if !self.details.contains(&detail) {
            self.details.push(detail);
        }
        // keep the latest non-permission error as the cause when there is one
        let more_specific = match &self.cause {
            None => true,
            Some(current) => current.is_permission_denied() || !err.is_permission_denied(),
        };
        if more_specific {
            self.cause = Some(err);
        }
    }

    fn into_error(self, fallback: &str) -> KeylockrError {
        let cause = self
            .cause
            .unwrap_or_else(|| DeviceError::new(DeviceErrorKind::Other, 0, fallback));
        KeylockrError::DeviceOperationFailed {
            details: self.details.join("\n"),
            cause,
        }
    }
}

/// Single source of truth for lock, unlock and status.
///
/// Shared by reference between callers; owns the process-wide software
/// blocker. Concurrent lock/unlock calls are not serialised against each
/// other.
pub struct KeyboardManager<P, S, F>
where
    P: DeviceProvider,
    S: ConfigStore,
    F: InputFilter,
{
    provider: P,
    store: S,
    blocker: SoftwareBlocker<F>,
}

impl<P, S, F> KeyboardManager<P, S, F>
where
    P: DeviceProvider,
    S: ConfigStore,
    F: InputFilter,
{
    pub fn new(provider: P, store: S, filter: F) -> Self {
        Self {
            provider,
            store,
            blocker: SoftwareBlocker::new(filter),
        }
    }

    pub fn blocker(&self) -> &SoftwareBlocker<F> {
        &self.blocker
    }

    pub fn load_config(&self, cancel: &CancelToken) -> KeylockrResult<KeylockrConfig> {
        cancel.check()?;
        let config = self.store.load()?;
        cancel.check()?;
        Ok(config)
    }

    fn snapshot(&self, cancel: &CancelToken) -> KeylockrResult<Vec<KeyboardDevice>> {
        let devices = self.provider.list().map_err(|err| {
            let details = format!("failed to enumerate keyboards: {}", err.message);
            KeylockrError::DeviceOperationFailed {
                details,
                cause: err,
            }
        })?;
        cancel.check()?;
        Ok(devices)
    }

    /// Disable the internal keyboard, falling back to software blocking when
    /// no candidate can be turned off.
    pub fn lock(&self, force: bool, cancel: &CancelToken) -> KeylockrResult<LockOutcome> {
        let mut config = self.load_config(cancel)?;
        let devices = self.snapshot(cancel)?;

        let candidates = classifier::classify_internal_candidates(&devices, &config, false);
        log_ranking("lock", &candidates);
        if candidates.is_empty() {
            return Err(KeylockrError::InternalKeyboardNotFound(
                "no internal keyboard found; mark it manually in internal_device_ids".to_string(),
            ));
        }

        if self.blocker.is_armed() || candidates.iter().all(|c| !c.device.enabled) {
            debug!("internal keyboard already locked");
            return Ok(LockOutcome::AlreadyLocked);
        }

        if config.require_external_keyboard
            && !force
            && !classifier::has_external_keyboard(&devices, &config)
        {
            return Err(KeylockrError::ExternalKeyboardNotFound(
                "no external keyboard detected; attach one before locking so input stays available"
                    .to_string(),
            ));
        }

        let mut failures = Failures::default();
        for candidate in candidates.iter().filter(|c| c.device.enabled) {
            cancel.check()?;
            let device = &candidate.device;
            match self.provider.disable(&device.id) {
                Ok(()) => {
                    info!("disabled internal keyboard {} ({})", device.description, device.id);
                    self.persist_learned_id(&mut config, &device.id, cancel)?;
                    return Ok(LockOutcome::HardwareDisabled {
                        device_id: device.id.clone(),
                    });
                }
                Err(err) => {
                    warn!("disable {} failed: {}", device.id, err);
                    let detail = match err.kind {
                        DeviceErrorKind::PermissionDenied => format!(
                            "device {} ({}) requires administrative privileges to disable",
                            device.description, device.id
                        ),
                        DeviceErrorKind::NotDisableable => format!(
                            "device {} ({}) does not support being disabled",
                            device.description, device.id
                        ),
                        DeviceErrorKind::Other => format!(
                            "device {} ({}) failed to disable: {}",
                            device.description, device.id, err.message
                        ),
                    };
                    failures.record(detail, err);
                }
            }
        }

        cancel.check()?;
        warn!("hardware disable unavailable; arming software keyboard block");
        self.blocker.set_policy(BlockPolicy {
            aggressive: config.blocker.aggressive,
            unlock_hotkey: config.unlock_hotkey_or_default(),
        });
        match self.blocker.start_blocking() {
            Ok(()) => {
                let top = candidates[0].device.id.clone();
                if let Err(err) = self.persist_learned_id(&mut config, &top, cancel) {
                    // a canceled lock must not leave input suppressed
                    self.blocker.stop_blocking();
                    return Err(err);
                }
                Ok(LockOutcome::SoftwareBlocked { device_id: top })
            }
            Err(BlockerError::Install(native)) => {
                failures.record(
                    format!("software keyboard block unavailable: {}", native.message),
                    native,
                );
                Err(failures.into_error("failed to disable internal keyboard"))
            }
            Err(err @ BlockerError::Disposed) => Err(KeylockrError::Blocker(err.to_string())),
        }
    }

    /// Restore the internal keyboard. Always releases the software block first.
    pub fn unlock(&self, cancel: &CancelToken) -> KeylockrResult<UnlockReport> {
        let mut config = self.load_config(cancel)?;
        let devices = self.snapshot(cancel)?;

        let candidates = classifier::classify_internal_candidates(&devices, &config, true);
        log_ranking("unlock", &candidates);

        let mut report = UnlockReport {
            software_block_released: self.blocker.is_armed(),
            ..UnlockReport::default()
        };
        self.blocker.stop_blocking();

        if candidates.is_empty() {
            if report.software_block_released {
                return Ok(report);
            }
            return Err(KeylockrError::InternalKeyboardNotFound(
                "no internal keyboard found; nothing to unlock".to_string(),
            ));
        }

        let mut failures = Failures::default();
        for candidate in candidates.iter().filter(|c| !c.device.enabled) {
            cancel.check()?;
            let device = &candidate.device;
            match self.provider.enable(&device.id) {
                Ok(()) => {
                    info!("enabled internal keyboard {} ({})", device.description, device.id);
                    self.persist_learned_id(&mut config, &device.id, cancel)?;
                    report.enabled.push(device.id.clone());
                }
                Err(err) if err.is_permission_denied() => {
                    return Err(KeylockrError::AdministrativePrivilegesRequired(format!(
                        "enabling {} requires administrative privileges; rerun as root",
                        device.id
                    )));
                }
                Err(err) => {
                    warn!("enable {} failed: {}", device.id, err);
                    let detail = format!(
                        "device {} ({}) failed to enable: {}",
                        device.description, device.id, err.message
                    );
                    failures.record(detail, err);
                }
            }
        }

        if failures.details.is_empty() {
            Ok(report)
        } else {
            Err(failures.into_error("failed to enable internal keyboard"))
        }
    }

    pub fn status(&self, cancel: &CancelToken) -> KeylockrResult<LockState> {
        let config = self.load_config(cancel)?;
        let devices = self.snapshot(cancel)?;

        let candidates = classifier::classify_internal_candidates(&devices, &config, false);
        let Some(top) = candidates.first() else {
            return Ok(LockState::Unknown);
        };

        if self.blocker.is_armed() || !top.device.enabled {
            Ok(LockState::Locked)
        } else {
            Ok(LockState::Unlocked)
        }
    }

    /// Annotated snapshot for diagnostics, candidates first in rank order.
    pub fn list_devices(&self, cancel: &CancelToken) -> KeylockrResult<Vec<DeviceReport>> {
        let config = self.load_config(cancel)?;
        let devices = self.snapshot(cancel)?;
        let candidates = classifier::classify_internal_candidates(&devices, &config, false);

        let mut rows: Vec<DeviceReport> = candidates
            .iter()
            .enumerate()
            .map(|(rank, candidate)| DeviceReport {
                device: candidate.device.clone(),
                signals: candidate.signals,
                score: Some(candidate.score),
                rank: Some(rank + 1),
            })
            .collect();

        for device in devices {
            if rows.iter().any(|row| row.device == device) {
                continue;
            }
            rows.push(DeviceReport {
                signals: Signals::evaluate(&device, &config),
                device,
                score: None,
                rank: None,
            });
        }
        Ok(rows)
    }

    /// Undo a lock left behind by an earlier session unless the user asked
    /// for locks to persist. Returns true when it unlocked.
    pub fn reconcile_on_startup(&self, cancel: &CancelToken) -> KeylockrResult<bool> {
        let config = self.load_config(cancel)?;
        if config.persistent_lock {
            return Ok(false);
        }
        if self.status(cancel)? != LockState::Locked {
            return Ok(false);
        }
        info!("found a non-persistent lock from an earlier session; restoring the internal keyboard");
        self.unlock(cancel)?;
        Ok(true)
    }

    /// Wait on the calling thread while a lock is in place and report the
    /// first reason to stop. Never unlocks by itself.
    ///
    /// The unlock hotkey and outside release are only observable while the
    /// software block is armed; a hardware lock waits for `stop` or `deadline`.
    pub fn hold(&self, stop: &CancelToken, deadline: Option<Instant>, tick: Duration) -> HoldEnd {
        let software = self.blocker.is_armed();
        loop {
            if stop.is_canceled() {
                return HoldEnd::Interrupted;
            }
            if software && self.blocker.unlock_requested() {
                return HoldEnd::UnlockHotkey;
            }
            if deadline.is_some_and(|at| Instant::now() >= at) {
                return HoldEnd::TimedOut;
            }
            if software && !self.blocker.is_armed() {
                return HoldEnd::Released;
            }
            thread::sleep(tick);
        }
    }

    /// Remember `id` as internal. Save failures are logged and swallowed;
    /// only cancellation propagates.
    fn persist_learned_id(
        &self,
        config: &mut KeylockrConfig,
        id: &str,
        cancel: &CancelToken,
    ) -> KeylockrResult<()> {
        if !config.remember_internal_device(id) {
            return Ok(());
        }
        cancel.check()?;
        match self.store.save(config) {
            Ok(()) => debug!("learned internal keyboard id {id}"),
            Err(KeylockrError::Canceled) => return Err(KeylockrError::Canceled),
            Err(err) => warn!("could not persist learned keyboard id {id}: {err}"),
        }
        Ok(())
    }
}

fn log_ranking(operation: &str, candidates: &[Candidate]) {
    for (rank, candidate) in candidates.iter().enumerate() {
        debug!(
            "{operation}: candidate #{} {} score={} enabled={}",
            rank + 1,
            candidate.device.id,
            candidate.score,
            candidate.device.enabled
        );
    }
}
