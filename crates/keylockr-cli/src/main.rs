//! KeyLockr command-line interface: lock, unlock and inspect the built-in keyboard.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keylockr_core::{
    logging, CancelToken, ConfigStore, DeviceReport, FileConfigStore, HoldEnd, KeyboardManager,
    KeylockrConfig, KeylockrError, LockOutcome, LockState,
};
use keylockr_sys::{EvdevInputFilter, SysfsDeviceProvider};
use log::{info, warn};
use schemars::schema_for;
use serde_json::to_string_pretty;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Manager = KeyboardManager<SysfsDeviceProvider, FileConfigStore, EvdevInputFilter>;

const HOLD_TICK: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(
    name = "keylockr",
    version,
    about = "Disable a laptop's built-in keyboard while an external one is attached."
)]
struct Cli {
    /// Path to the KeyLockr configuration file (TOML, or YAML by extension).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Disable the internal keyboard.
    Lock {
        /// Skip the external keyboard check.
        #[arg(long)]
        force: bool,

        /// Stay in the foreground after a hardware lock and unlock on
        /// auto-unlock timeout or SIGINT.
        #[arg(long)]
        hold: bool,
    },

    /// Re-enable the internal keyboard and release any software block.
    Unlock,

    /// Print whether the internal keyboard is locked.
    Status,

    /// List detected keyboards with their classification.
    DebugListDevices,

    /// Undo a lock left over from an earlier session unless persistent_lock is set.
    Reconcile,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Configuration file to validate; defaults to --config or the user config path.
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(&err)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    logging::init("info");
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(FileConfigStore::default_path);

    let interrupted = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&interrupted))
            .context("failed to install signal handler")?;
    }
    let cancel = CancelToken::from_flag(Arc::clone(&interrupted));

    let command = match cli.command {
        Commands::Validate { file, schema } => {
            return validate(file.unwrap_or(config_path), schema);
        }
        command => command,
    };

    let manager = KeyboardManager::new(
        SysfsDeviceProvider::new(),
        FileConfigStore::new(&config_path),
        EvdevInputFilter::new(),
    );

    match command {
        Commands::Lock { force, hold } => match manager.lock(force, &cancel)? {
            LockOutcome::AlreadyLocked => println!("Internal keyboard is already locked."),
            LockOutcome::HardwareDisabled { device_id } => {
                println!("Internal keyboard disabled ({device_id}).");
                if hold {
                    hold_lock(&manager, &cancel, false)?;
                }
            }
            LockOutcome::SoftwareBlocked { device_id } => {
                println!(
                    "Internal keyboard ({device_id}) could not be disabled; blocking keystrokes instead."
                );
                hold_lock(&manager, &cancel, true)?;
            }
        },
        Commands::Unlock => {
            let report = manager.unlock(&cancel)?;
            if report.already_unlocked() {
                println!("Internal keyboard is already unlocked.");
            }
            for id in &report.enabled {
                println!("Enabled {id}.");
            }
            if report.software_block_released {
                println!("Released software keyboard block.");
            }
        }
        Commands::Status => {
            let state = manager.status(&cancel)?;
            println!("Internal keyboard: {}", state.to_string().to_uppercase());
            if state == LockState::Unknown {
                return Ok(3);
            }
        }
        Commands::DebugListDevices => {
            let rows = manager.list_devices(&cancel)?;
            print_device_table(&rows);
        }
        Commands::Reconcile => {
            if manager.reconcile_on_startup(&cancel)? {
                println!("Restored the internal keyboard left locked by an earlier session.");
            } else {
                println!("Nothing to reconcile.");
            }
        }
        Commands::Validate { .. } => unreachable!("handled above"),
    }

    Ok(0)
}

/// Keep a lock in place in the foreground until auto-unlock fires or the
/// user interrupts, then restore input.
fn hold_lock(manager: &Manager, cancel: &CancelToken, software: bool) -> Result<()> {
    let config = manager.load_config(&CancelToken::new())?;
    let deadline = config.auto_unlock_deadline(Instant::now());
    let hotkey = config.unlock_hotkey_or_default();
    match (deadline, software) {
        (Some(_), true) => println!(
            "Blocking for {} minute(s); press {hotkey} or send SIGINT to stop early.",
            config.auto_unlock_timeout_minutes.max(1)
        ),
        (Some(_), false) => println!(
            "Unlocking in {} minute(s); send SIGINT to unlock early.",
            config.auto_unlock_timeout_minutes.max(1)
        ),
        (None, true) => println!(
            "Blocking until {hotkey} is pressed or SIGINT arrives (persistent_lock is set)."
        ),
        (None, false) => println!("Holding until SIGINT arrives (persistent_lock is set)."),
    }

    match manager.hold(cancel, deadline, HOLD_TICK) {
        HoldEnd::Interrupted => info!("interrupted; restoring the internal keyboard"),
        HoldEnd::UnlockHotkey => info!("unlock hotkey pressed"),
        HoldEnd::TimedOut => info!("auto-unlock timeout reached"),
        HoldEnd::Released => info!("software keyboard block released elsewhere"),
    }

    // the shared token is already tripped by the signal, so unlock with a fresh one
    let report = manager.unlock(&CancelToken::new())?;
    for id in &report.enabled {
        println!("Enabled {id}.");
    }
    if report.software_block_released {
        println!("Released software keyboard block.");
    }
    Ok(())
}

fn validate(file: PathBuf, schema: bool) -> Result<i32> {
    if schema {
        let schema = schema_for!(KeylockrConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(0);
    }

    let cfg = FileConfigStore::new(&file)
        .load()
        .with_context(|| format!("failed to load configuration from {}", file.display()))?;

    let issues = cfg.validate();
    if issues.is_empty() {
        println!(
            "Configuration valid ({} learned device ids, {} hardware id prefixes).",
            cfg.internal_device_ids.len(),
            cfg.internal_hardware_id_prefixes.len()
        );
        Ok(0)
    } else {
        eprintln!("Configuration validation failed:");
        for issue in issues {
            eprintln!("  - {issue}");
        }
        Ok(1)
    }
}

fn print_device_table(rows: &[DeviceReport]) {
    if rows.is_empty() {
        println!("No keyboards detected.");
        return;
    }
    println!(
        "{:<5} {:>8} {:<8} {:<9} {:<9} {:<40} ID",
        "RANK", "SCORE", "ENABLED", "INTERNAL", "REMOVABLE", "DESCRIPTION"
    );
    for row in rows {
        let rank = row.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        let score = row.score.map_or_else(|| "-".to_string(), |s| s.to_string());
        println!(
            "{:<5} {:>8} {:<8} {:<9} {:<9} {:<40} {}",
            rank,
            score,
            yes_no(row.device.enabled),
            yes_no(row.signals.is_internal()),
            yes_no(row.device.removable),
            row.device.description,
            row.device.id
        );
        if let Some(location) = &row.device.location {
            println!("      location: {location}");
        }
        if !row.device.hardware_ids.is_empty() {
            println!("      hardware ids: {}", row.device.hardware_ids.join(", "));
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err
        .chain()
        .find_map(|cause| cause.downcast_ref::<KeylockrError>())
    {
        Some(err) => {
            if err.is_canceled() {
                warn!("operation canceled");
            }
            err.exit_code()
        }
        None => 1,
    }
}
