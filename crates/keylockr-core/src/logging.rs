//! Process-wide logger setup for the KeyLockr binaries.
//!
//! Output is one JSON object per line unless `KEYLOCKR_LOG_FORMAT=plain`.
//! `RUST_LOG` wins over everything; otherwise `KEYLOCKR_LOG_LEVEL`, then the
//! level the binary asks for.

use env_logger::Env;
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "KEYLOCKR_LOG_FORMAT";
const LEVEL_ENV: &str = "KEYLOCKR_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    /// Anything other than `plain` keeps the JSON default.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "plain" || v == "text" => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

/// Install the global logger. Only the first call has any effect.
pub fn init(default_level: &str) {
    INIT.get_or_init(|| install(default_level));
}

fn install(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::parse(env::var(FORMAT_ENV).ok().as_deref());

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let line = json!({
                    "timestamp": buf.timestamp().to_string(),
                    "level": record.level().as_str().to_ascii_lowercase(),
                    "target": record.target(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{line}")
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} {:<5} {} - {}",
                    buf.timestamp(),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
        }
    }

    if let Err(err) = builder.try_init() {
        eprintln!("keylockr: logger already initialised: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_is_the_default_format() {
        assert_eq!(LogFormat::parse(None), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("bogus")), LogFormat::Json);
    }

    #[test]
    fn plain_format_is_case_insensitive() {
        assert_eq!(LogFormat::parse(Some(" Plain ")), LogFormat::Plain);
    }

    #[test]
    fn repeated_init_is_harmless() {
        init("debug");
        init("trace");
        log::info!("logger initialised twice");
    }
}
