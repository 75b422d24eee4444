//! Logging bootstrapper for the truenas-unlock binary.
//!
//! Single-shot runs are read by an operator at a terminal, daemon runs by a
//! log collector, so each driver picks its own default [`LogFormat`].

use env_logger::{Builder, Env};
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "TRUENAS_UNLOCK_LOG_FORMAT";
const LEVEL_ENV: &str = "TRUENAS_UNLOCK_LOG_LEVEL";

/// Line format for log records written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per record with timestamp, level, target and message.
    Json,
    /// `LEVEL message`, no timestamp.
    Plain,
}

impl LogFormat {
    /// Parse an override value. Unknown or absent values keep `default`.
    fn resolve(value: Option<&str>, default: LogFormat) -> LogFormat {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => LogFormat::Json,
            Some("plain") | Some("text") => LogFormat::Plain,
            _ => default,
        }
    }
}

/// Initialize the global logger.
///
/// The first caller wins; subsequent calls are no-ops. `RUST_LOG` takes
/// precedence, then `TRUENAS_UNLOCK_LOG_LEVEL`, then `default_level`.
/// `TRUENAS_UNLOCK_LOG_FORMAT` (`json` or `plain`) overrides `default_format`.
pub fn init(default_level: &str, default_format: LogFormat) {
    let _ = INIT.get_or_init(|| configure(default_level, default_format));
}

fn configure(default_level: &str, default_format: LogFormat) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::resolve(env::var(FORMAT_ENV).ok().as_deref(), default_format);

    let mut builder = Builder::from_env(Env::default().default_filter_or(level));
    apply_format(&mut builder, format);

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {err}");
    }
}

fn apply_format(builder: &mut Builder, format: LogFormat) {
    match format {
        LogFormat::Json => builder.format(|buf, record| {
            let payload = json!({
                "timestamp": buf.timestamp().to_string(),
                "level": record.level().as_str().to_lowercase(),
                "target": record.target(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{payload}")
        }),
        LogFormat::Plain => {
            builder.format(|buf, record| writeln!(buf, "{:<5} {}", record.level(), record.args()))
        }
    };
}
